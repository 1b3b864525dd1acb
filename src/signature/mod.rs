// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EIP-191 message signatures.
//!
//! This module provides:
//! - Signer recovery and verification for personal-sign messages
//! - The `MessageSigner` capability consumed by the pipeline
//! - A local secp256k1 key signer (hex or PEM keys)

pub mod signer;
pub mod verify;

pub use signer::{LocalWalletSigner, MessageSigner, SignerError};
pub use verify::{
    checksum_address, is_valid_address, is_valid_signature_format, verify, VerificationResult,
};
