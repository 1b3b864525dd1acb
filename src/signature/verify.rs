// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer recovery for EIP-191 personal-sign messages.
//!
//! [`verify`] is pure: it never panics, never performs I/O and always
//! returns the same result for the same input, so callers can retry it
//! freely. Every failure is reported through [`VerificationResult::error`].

use std::str::FromStr;

use alloy::primitives::{eip191_hash_message, Address, Signature, SignatureError};
use serde::{Deserialize, Serialize};

use crate::models::{normalize_address, VerificationErrorKind};

/// Raw signature length: r (32) + s (32) + v (1).
pub const SIGNATURE_BYTES: usize = 65;

const SIGNATURE_HEX_LEN: usize = SIGNATURE_BYTES * 2;

/// Outcome of a verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_valid: bool,
    /// Lowercased recovered address; empty when recovery did not happen.
    pub recovered_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<VerificationErrorKind>,
}

impl VerificationResult {
    fn valid(recovered_address: String) -> Self {
        Self {
            is_valid: true,
            recovered_address,
            error: None,
        }
    }

    fn invalid(error: VerificationErrorKind) -> Self {
        Self {
            is_valid: false,
            recovered_address: String::new(),
            error: Some(error),
        }
    }

    fn mismatch(recovered_address: String) -> Self {
        Self {
            is_valid: false,
            recovered_address,
            error: Some(VerificationErrorKind::AddressMismatch),
        }
    }
}

/// Recover the signer of `message` from `signature` and optionally check it
/// against `expected_address`.
///
/// # Arguments
/// * `message` - The exact text that was signed
/// * `signature` - 130 hex digits, optionally `0x`-prefixed
/// * `expected_address` - Address the signature must recover to (any case)
pub fn verify(message: &str, signature: &str, expected_address: Option<&str>) -> VerificationResult {
    if message.is_empty() || signature.is_empty() {
        return VerificationResult::invalid(VerificationErrorKind::MissingInput);
    }

    let Some(raw) = decode_signature(signature) else {
        return VerificationResult::invalid(VerificationErrorKind::InvalidSignatureFormat);
    };

    let recovered = match recover_signer(message, &raw) {
        Ok(address) => format_address(&address),
        Err(_) => return VerificationResult::invalid(VerificationErrorKind::RecoveryFailed),
    };

    match expected_address {
        Some(expected) if normalize_address(expected) != recovered => {
            VerificationResult::mismatch(recovered)
        }
        _ => VerificationResult::valid(recovered),
    }
}

/// Whether `signature` is exactly 65 bytes of hex (optional `0x`).
pub fn is_valid_signature_format(signature: &str) -> bool {
    decode_signature(signature).is_some()
}

/// Whether `address` is `0x` followed by 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|digits| digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// EIP-55 mixed-case form of an address, for display.
pub fn checksum_address(address: &str) -> Option<String> {
    if !is_valid_address(address) {
        return None;
    }
    Address::from_str(address)
        .ok()
        .map(|addr| addr.to_checksum(None))
}

fn decode_signature(signature: &str) -> Option<[u8; SIGNATURE_BYTES]> {
    let digits = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);
    if digits.len() != SIGNATURE_HEX_LEN || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut raw = [0u8; SIGNATURE_BYTES];
    alloy::hex::decode_to_slice(digits, &mut raw).ok()?;
    Some(raw)
}

/// keccak256("\x19Ethereum Signed Message:\n" + len + message), then ecrecover.
fn recover_signer(message: &str, raw: &[u8; SIGNATURE_BYTES]) -> Result<Address, SignatureError> {
    let signature = Signature::from_raw_array(raw)?;
    let prehash = eip191_hash_message(message.as_bytes());
    signature.recover_address_from_prehash(&prehash)
}

fn format_address(address: &Address) -> String {
    format!("0x{}", alloy::hex::encode(address.as_slice()))
}
