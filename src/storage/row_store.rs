// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Managed row store provider.
//!
//! ## Wire Format
//!
//! One row per `(ownerAddress, recordId)`:
//!
//! - `GET    {base}/messages?ownerAddress=..&limit=50` → `{ "success": true, "data": [...] }`
//! - `POST   {base}/messages` ← record + `ttl` (epoch seconds)
//! - `DELETE {base}/messages?ownerAddress=..`
//! - `DELETE {base}/messages/{recordId}?ownerAddress=..`
//! - `GET    {base}/health`
//!
//! The backend enforces no ordering or cap, so `list` sorts and truncates and
//! `put` prunes rows beyond the cap after the upsert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::transport::{
    classify_failure, unreachable, unreadable, Transport, TransportRequest, TransportResponse,
};
use super::{PersistenceProvider, ProviderKind, StorageError, StorageResult};
use crate::models::{normalize_address, sort_newest_first, MessageRecord, HISTORY_CAP};

const KIND: ProviderKind = ProviderKind::RowStore;

/// Default retention for rows written without an explicit expiry.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    data: Option<Vec<MessageRecord>>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

pub struct RowStoreProvider {
    transport: Arc<dyn Transport>,
    cap: usize,
    record_ttl: Duration,
}

impl RowStoreProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cap: HISTORY_CAP,
            record_ttl: DEFAULT_RECORD_TTL,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_record_ttl(mut self, record_ttl: Duration) -> Self {
        self.record_ttl = record_ttl;
        self
    }

    async fn send_checked(&self, request: TransportRequest) -> StorageResult<TransportResponse> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| unreachable(KIND, e))?;
        if !response.is_success() {
            return Err(classify_failure(KIND, &response));
        }
        Ok(response)
    }

    /// Row body: the record with a default expiry and the backend `ttl`.
    fn row_body(&self, record: &MessageRecord) -> StorageResult<Value> {
        let mut row = record.clone();
        row.owner_address = normalize_address(&record.owner_address);
        let ttl_millis = i64::try_from(self.record_ttl.as_millis()).unwrap_or(i64::MAX);
        let expiry = row
            .expiry
            .unwrap_or_else(|| row.created_at.saturating_add(ttl_millis));
        row.expiry = Some(expiry);

        let mut body = serde_json::to_value(&row)
            .map_err(|e| StorageError::rejected(KIND, None, e.to_string()))?;
        if let Value::Object(map) = &mut body {
            map.insert("ttl".to_string(), Value::from(expiry / 1000));
        }
        Ok(body)
    }

    /// Delete rows beyond the cap. Failures are logged, not returned: the
    /// upsert already succeeded and `list` truncates anyway.
    async fn prune(&self, owner: &str) {
        let mut records = match self.fetch(owner, None).await {
            Ok(records) => records,
            Err(e) => {
                warn!(owner = %owner, error = %e, "row store prune skipped");
                return;
            }
        };
        sort_newest_first(&mut records);
        if records.len() <= self.cap {
            return;
        }

        for stale in records.split_off(self.cap) {
            let request = TransportRequest::delete(format!("messages/{}", stale.record_id))
                .with_query("ownerAddress", owner);
            if let Err(e) = self.send_checked(request).await {
                warn!(record_id = %stale.record_id, error = %e, "row store prune failed");
            } else {
                debug!(record_id = %stale.record_id, "row store pruned record");
            }
        }
    }

    async fn fetch(&self, owner: &str, limit: Option<usize>) -> StorageResult<Vec<MessageRecord>> {
        let mut request = TransportRequest::get("messages").with_query("ownerAddress", owner);
        if let Some(limit) = limit {
            request = request.with_query("limit", limit.to_string());
        }

        let response = self.send_checked(request).await?;
        let envelope: Envelope = response.json().map_err(|e| unreadable(KIND, e))?;
        if !envelope.success {
            return Err(StorageError::rejected(
                KIND,
                Some(response.status),
                envelope.error.unwrap_or_else(|| "request failed".to_string()),
            ));
        }

        Ok(envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .filter(|record| record.owned_by(owner))
            .collect())
    }
}

#[async_trait]
impl PersistenceProvider for RowStoreProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn list(&self, owner_address: &str) -> StorageResult<Vec<MessageRecord>> {
        let owner = normalize_address(owner_address);
        let mut records = self.fetch(&owner, Some(self.cap)).await?;
        sort_newest_first(&mut records);
        records.truncate(self.cap);
        Ok(records)
    }

    async fn put(&self, record: &MessageRecord) -> StorageResult<()> {
        let owner = normalize_address(&record.owner_address);
        let body = self.row_body(record)?;
        self.send_checked(TransportRequest::post("messages", body)).await?;
        self.prune(&owner).await;
        Ok(())
    }

    async fn delete_all(&self, owner_address: &str) -> StorageResult<()> {
        let owner = normalize_address(owner_address);
        let request = TransportRequest::delete("messages").with_query("ownerAddress", owner);
        match self.send_checked(request).await {
            Err(StorageError::Rejected { status: Some(404), .. }) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn health_check(&self) -> bool {
        match self.transport.send(TransportRequest::get("health")).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!(error = %e, "row store health check failed");
                false
            }
        }
    }
}
