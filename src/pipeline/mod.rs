// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Message Pipeline
//!
//! Drives one signed message through its lifecycle with an optimistic view:
//!
//! 1. **Initiate**: validate input, insert a `pending` record into the
//!    visible set before any I/O.
//! 2. **Sign**: ask the wallet. A signer failure discards the optimistic
//!    record; it never becomes `rejected`.
//! 3. **Verify**: recover the signer. The record settles as `verified` or
//!    `rejected`; rejected records stay visible.
//! 4. **Persist**: write the settled record through the storage chain. A
//!    failure is reported on the outcome and does not undo visible state.
//! 5. **Reconcile**: replace the visible entry with the settled record.
//!
//! Observers follow along through [`MessagePipeline::subscribe`]. For a given
//! record, `Inserted` is always published before its final `Replaced`.

mod record_set;

pub use record_set::RecordSet;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::models::{
    normalize_address, LifecycleState, MessageRecord, TransitionError, VerificationErrorKind,
    MAX_MESSAGE_CHARS,
};
use crate::signature::{is_valid_address, verify, MessageSigner, SignerError, VerificationResult};
use crate::storage::{PersistenceProvider, StorageError};

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Types
// =============================================================================

/// A request to sign `message_text` on behalf of `owner_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub owner_address: String,
    pub message_text: String,
    /// When set, the recovered signer must equal this address.
    pub expected_signer: Option<String>,
}

impl SignRequest {
    pub fn new(owner_address: impl Into<String>, message_text: impl Into<String>) -> Self {
        Self {
            owner_address: owner_address.into(),
            message_text: message_text.into(),
            expected_signer: None,
        }
    }

    pub fn expecting(mut self, signer: impl Into<String>) -> Self {
        self.expected_signer = Some(signer.into());
        self
    }

    /// Require the signature to come from the owner's own address.
    pub fn bound_to_owner(mut self) -> Self {
        self.expected_signer = Some(self.owner_address.clone());
        self
    }
}

/// Change to the visible record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    Inserted(MessageRecord),
    Replaced(MessageRecord),
    Discarded { record_id: String },
}

/// An initiated request waiting for its signature. Completing consumes it,
/// so each record is signed and settled once.
#[derive(Debug)]
pub struct PendingSignature {
    record: MessageRecord,
    expected_signer: Option<String>,
}

impl PendingSignature {
    pub fn record(&self) -> &MessageRecord {
        &self.record
    }

    pub fn record_id(&self) -> &str {
        &self.record.record_id
    }
}

/// Result of a completed sign-and-verify run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutcome {
    /// Settled record (`verified` or `rejected`).
    pub record: MessageRecord,
    pub verification: VerificationResult,
    /// Persistence failure, if the settled record could not be stored.
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<StorageError>,
}

impl SignOutcome {
    pub fn is_verified(&self) -> bool {
        self.record.lifecycle_state == LifecycleState::Verified
    }

    pub fn is_persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<StorageError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_str(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

// =============================================================================
// Pipeline
// =============================================================================

/// Signing pipeline over an injected signer and storage chain.
#[derive(Clone)]
pub struct MessagePipeline {
    signer: Arc<dyn MessageSigner>,
    store: Arc<dyn PersistenceProvider>,
    visible: Arc<RwLock<RecordSet>>,
    events: broadcast::Sender<RecordEvent>,
}

impl MessagePipeline {
    pub fn new(signer: Arc<dyn MessageSigner>, store: Arc<dyn PersistenceProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            signer,
            store,
            visible: Arc::new(RwLock::new(RecordSet::new())),
            events,
        }
    }

    /// Use a per-owner visible cap other than the default.
    pub fn with_visible_cap(mut self, cap: usize) -> Self {
        self.visible = Arc::new(RwLock::new(RecordSet::with_cap(cap)));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    /// Run the whole lifecycle for `request`.
    pub async fn sign_and_verify(&self, request: SignRequest) -> Result<SignOutcome, PipelineError> {
        let pending = self.initiate(request).await?;
        self.complete(pending).await
    }

    /// Validate `request` and show its `pending` record.
    pub async fn initiate(&self, request: SignRequest) -> Result<PendingSignature, PipelineError> {
        validate(&request)?;

        let record = MessageRecord::pending(&request.owner_address, request.message_text);
        let evicted = self.visible.write().await.insert(record.clone());

        debug!(record_id = %record.record_id, owner = %record.owner_address, "sign request initiated");
        self.publish(RecordEvent::Inserted(record.clone()));
        for old in evicted {
            self.publish(RecordEvent::Discarded {
                record_id: old.record_id,
            });
        }

        Ok(PendingSignature {
            record,
            expected_signer: request.expected_signer.map(|s| normalize_address(&s)),
        })
    }

    /// Acquire the signature, verify, persist and reconcile.
    pub async fn complete(&self, pending: PendingSignature) -> Result<SignOutcome, PipelineError> {
        let PendingSignature {
            record,
            expected_signer,
        } = pending;

        let signature = match self.signer.sign(&record.message_text).await {
            Ok(signature) if !signature.trim().is_empty() => normalize_signature(&signature),
            Ok(_) => {
                let err = SignerError::Failed("wallet returned an empty signature".to_string());
                return Err(self.abandon(&record, err).await);
            }
            Err(err) => return Err(self.abandon(&record, err).await),
        };

        let signed = record.into_signed(signature)?;
        debug!(record_id = %signed.record_id, state = %signed.lifecycle_state, "signature acquired");
        self.reconcile(&signed).await;

        let verification = verify(
            &signed.message_text,
            &signed.signature,
            expected_signer.as_deref(),
        );
        let settled = if verification.is_valid {
            signed.into_verified(&verification.recovered_address)?
        } else {
            let kind = verification
                .error
                .unwrap_or(VerificationErrorKind::RecoveryFailed);
            signed.into_rejected(Some(verification.recovered_address.as_str()), kind)?
        };
        info!(
            record_id = %settled.record_id,
            owner = %settled.owner_address,
            state = %settled.lifecycle_state,
            recovered = %verification.recovered_address,
            "message verification finished"
        );

        let persist_error = match self.store.put(&settled).await {
            Ok(()) => None,
            Err(err) => {
                warn!(record_id = %settled.record_id, error = %err, "failed to persist message record");
                Some(err)
            }
        };

        self.reconcile(&settled).await;

        Ok(SignOutcome {
            record: settled,
            verification,
            persist_error,
        })
    }

    /// Visible records of `owner_address`, newest first.
    pub async fn history(&self, owner_address: &str) -> Vec<MessageRecord> {
        self.visible.read().await.for_owner(owner_address)
    }

    /// Merge the stored history of `owner_address` into the visible set.
    ///
    /// Stored records replace settled visible ones with the same id and fill
    /// in missing ones. In-flight records and records the store does not know
    /// about are left alone, a stored copy never moves a visible record back
    /// in its lifecycle, and records older than everything kept under the
    /// per-owner cap are not shown at all.
    pub async fn refresh(&self, owner_address: &str) -> Result<Vec<MessageRecord>, PipelineError> {
        if owner_address.trim().is_empty() {
            return Err(PipelineError::MissingInput("ownerAddress"));
        }

        let stored = self.store.list(owner_address).await?;
        let mut events = Vec::new();
        {
            let mut visible = self.visible.write().await;
            // Newest first, so a record that falls outside the cap is evicted
            // on its own insert and never shows up.
            for record in stored {
                match visible.get(&record.record_id) {
                    Some(current) if !current.lifecycle_state.is_settled() => {}
                    Some(current) if *current == record => {}
                    Some(_) => {
                        if visible.replace(record.clone()) {
                            events.push(RecordEvent::Replaced(record));
                        }
                    }
                    None => {
                        let evicted = visible.insert(record.clone());
                        if evicted.iter().any(|old| old.record_id == record.record_id) {
                            continue;
                        }
                        events.push(RecordEvent::Inserted(record));
                        events.extend(evicted.into_iter().map(|old| RecordEvent::Discarded {
                            record_id: old.record_id,
                        }));
                    }
                }
            }
        }

        debug!(owner = %normalize_address(owner_address), changes = events.len(), "history refreshed");
        for event in events {
            self.publish(event);
        }
        Ok(self.history(owner_address).await)
    }

    /// Delete the stored history of `owner_address`, then drop its visible
    /// records. Returns how many visible records were dropped.
    pub async fn clear_history(&self, owner_address: &str) -> Result<usize, PipelineError> {
        if owner_address.trim().is_empty() {
            return Err(PipelineError::MissingInput("ownerAddress"));
        }

        self.store.delete_all(owner_address).await?;
        let removed = self.visible.write().await.remove_owner(owner_address);

        info!(owner = %normalize_address(owner_address), removed = removed.len(), "history cleared");
        let count = removed.len();
        for record in removed {
            self.publish(RecordEvent::Discarded {
                record_id: record.record_id,
            });
        }
        Ok(count)
    }

    /// Drop the optimistic record after a signer failure.
    async fn abandon(&self, record: &MessageRecord, err: SignerError) -> PipelineError {
        warn!(record_id = %record.record_id, error = %err, "signature not obtained, discarding record");
        if self.visible.write().await.remove(&record.record_id).is_some() {
            self.publish(RecordEvent::Discarded {
                record_id: record.record_id.clone(),
            });
        }
        PipelineError::Signer(err)
    }

    /// Swap in the newer version of a visible record. Records removed in the
    /// meantime (cleared or evicted) are not brought back, and a version behind
    /// the visible one is ignored.
    async fn reconcile(&self, record: &MessageRecord) {
        let replaced = self.visible.write().await.replace(record.clone());
        if replaced {
            self.publish(RecordEvent::Replaced(record.clone()));
        } else {
            debug!(record_id = %record.record_id, state = %record.lifecycle_state, "visible record not replaced");
        }
    }

    fn publish(&self, event: RecordEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn validate(request: &SignRequest) -> Result<(), PipelineError> {
    if request.message_text.trim().is_empty() {
        return Err(PipelineError::MissingInput("messageText"));
    }
    if request.owner_address.trim().is_empty() {
        return Err(PipelineError::MissingInput("ownerAddress"));
    }
    if request.message_text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(PipelineError::InvalidInput(format!(
            "message exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    if !is_valid_address(request.owner_address.trim()) {
        return Err(PipelineError::InvalidInput(format!(
            "owner address `{}` is not a 20-byte hex address",
            request.owner_address
        )));
    }
    if let Some(expected) = &request.expected_signer {
        if !is_valid_address(expected.trim()) {
            return Err(PipelineError::InvalidInput(format!(
                "expected signer `{expected}` is not a 20-byte hex address"
            )));
        }
    }
    Ok(())
}

/// `0x`-prefixed lowercase hex, whatever casing the wallet used.
fn normalize_signature(signature: &str) -> String {
    let trimmed = signature.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", digits.to_ascii_lowercase())
}
