// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Message Signer - EIP-191 Signed Message Service
//!
//! Signs arbitrary text with a wallet key, recovers and verifies the signer,
//! and keeps a bounded per-wallet history across a chain of storage backends.
//!
//! ## Modules
//!
//! - `signature` - EIP-191 verification and the signer capability
//! - `pipeline` - Optimistic pending → signed → verified/rejected lifecycle
//! - `storage` - Persistence providers and the fallback router
//! - `models` - Message records and lifecycle states
//! - `config` - Environment configuration
//! - `logging` - Tracing subscriber setup

pub mod config;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod signature;
pub mod storage;

pub use models::{LifecycleState, MessageRecord, VerificationErrorKind};
pub use pipeline::{MessagePipeline, PipelineError, RecordEvent, SignOutcome, SignRequest};
pub use signature::{verify, LocalWalletSigner, MessageSigner, SignerError, VerificationResult};
pub use storage::{PersistenceProvider, ProviderKind, StorageError, StorageRouter};
