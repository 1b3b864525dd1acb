// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Message Record Model
//!
//! A [`MessageRecord`] is one signed-message attempt by a wallet owner. It is
//! created `pending` the moment a sign request begins and then only ever moves
//! forward:
//!
//! ```text
//! pending ──► signed ──► verified
//!                   └──► rejected
//! ```
//!
//! Records serialize with camelCase field names (`recordId`, `ownerAddress`,
//! `messageText`, `signature`, `createdAt`, `lifecycleState`, ...) which is
//! the JSON shape every storage backend exchanges.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Number of records retained per owner.
pub const HISTORY_CAP: usize = 50;

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of a message record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Sign request started; no signature yet.
    Pending,
    /// Wallet returned a signature; verification not yet run.
    Signed,
    /// Signature recovered to the expected signer.
    Verified,
    /// Signature malformed, unrecoverable, or recovered to someone else.
    Rejected,
}

impl LifecycleState {
    /// Whether `next` is the immediate successor of `self`.
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Pending, Signed) | (Signed, Verified) | (Signed, Rejected)
        )
    }

    /// Verification has run; the record will not change again.
    pub fn is_settled(self) -> bool {
        matches!(self, LifecycleState::Verified | LifecycleState::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Signed => "signed",
            LifecycleState::Verified => "verified",
            LifecycleState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a signature failed verification.
///
/// These are returned as data, never raised: malformed signatures are
/// expected traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum VerificationErrorKind {
    /// Message or signature was empty.
    MissingInput,
    /// Signature is not 65 bytes of hex.
    InvalidSignatureFormat,
    /// Curve point or recovery id could not be recovered.
    RecoveryFailed,
    /// Recovered address differs from the expected signer.
    AddressMismatch,
}

impl fmt::Display for VerificationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VerificationErrorKind::MissingInput => "message and signature are required",
            VerificationErrorKind::InvalidSignatureFormat => "invalid signature format",
            VerificationErrorKind::RecoveryFailed => "failed to recover signer",
            VerificationErrorKind::AddressMismatch => "recovered signer does not match",
        };
        f.write_str(text)
    }
}

/// Illegal lifecycle move.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("record {record_id} cannot move from {from} to {to}")]
    InvalidTransition {
        record_id: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("record {0} cannot be signed with an empty signature")]
    EmptySignature(String),
}

// =============================================================================
// Message Record
// =============================================================================

/// A signed-message record scoped to one wallet owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Unique identifier, assigned once at creation.
    pub record_id: String,
    /// Wallet address the record belongs to.
    pub owner_address: String,
    /// Exact text that was signed.
    pub message_text: String,
    /// `0x`-prefixed 65-byte hex signature; empty while pending.
    #[serde(default)]
    pub signature: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    pub lifecycle_state: LifecycleState,
    /// Lowercased address recovered from the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_signer: Option<String>,
    /// Verification failure shown alongside rejected records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<VerificationErrorKind>,
    /// Retention horizon, epoch milliseconds. Advisory; not every backend
    /// honors it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
}

impl MessageRecord {
    /// Create a pending record stamped with the current time.
    pub fn pending(owner_address: &str, message_text: impl Into<String>) -> Self {
        Self::pending_at(owner_address, message_text, Utc::now().timestamp_millis())
    }

    /// Create a pending record with an explicit creation time.
    pub fn pending_at(owner_address: &str, message_text: impl Into<String>, created_at: i64) -> Self {
        let owner_address = normalize_address(owner_address);
        Self {
            record_id: generate_record_id(&owner_address, created_at),
            owner_address,
            message_text: message_text.into(),
            signature: String::new(),
            created_at,
            lifecycle_state: LifecycleState::Pending,
            recovered_signer: None,
            verification_error: None,
            expiry: None,
        }
    }

    /// Case-insensitive owner match.
    pub fn owned_by(&self, owner_address: &str) -> bool {
        self.owner_address.eq_ignore_ascii_case(owner_address.trim())
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// `pending → signed`, attaching the wallet's signature.
    pub fn into_signed(mut self, signature: impl Into<String>) -> Result<Self, TransitionError> {
        let signature = signature.into();
        if signature.is_empty() {
            return Err(TransitionError::EmptySignature(self.record_id));
        }
        self.advance(LifecycleState::Signed)?;
        self.signature = signature;
        Ok(self)
    }

    /// `signed → verified` with the recovered signer.
    pub fn into_verified(mut self, recovered_signer: &str) -> Result<Self, TransitionError> {
        self.advance(LifecycleState::Verified)?;
        self.recovered_signer = Some(normalize_address(recovered_signer));
        self.verification_error = None;
        Ok(self)
    }

    /// `signed → rejected`. `recovered_signer` is kept when recovery itself
    /// succeeded but the address did not match.
    pub fn into_rejected(
        mut self,
        recovered_signer: Option<&str>,
        error: VerificationErrorKind,
    ) -> Result<Self, TransitionError> {
        self.advance(LifecycleState::Rejected)?;
        self.recovered_signer = recovered_signer
            .filter(|addr| !addr.is_empty())
            .map(normalize_address);
        self.verification_error = Some(error);
        Ok(self)
    }

    fn advance(&mut self, next: LifecycleState) -> Result<(), TransitionError> {
        if !self.lifecycle_state.can_advance_to(next) {
            return Err(TransitionError::InvalidTransition {
                record_id: self.record_id.clone(),
                from: self.lifecycle_state,
                to: next,
            });
        }
        self.lifecycle_state = next;
        Ok(())
    }
}

/// Lowercase an address for keying and comparison.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// `{owner}-{created_at}-{random}`; the random suffix keeps ids unique for
/// records created in the same millisecond.
pub fn generate_record_id(owner_address: &str, created_at: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", normalize_address(owner_address), created_at, &suffix[..12])
}

/// Stable sort, newest `created_at` first.
pub fn sort_newest_first(records: &mut [MessageRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
