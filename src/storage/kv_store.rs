// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Managed key-value store provider.
//!
//! ## Wire Format
//!
//! One JSON array of records per owner, stored under the lowercased address:
//!
//! - `GET    {base}/messages/{owner}` → `[record, ...]` (404 = no history)
//! - `PUT    {base}/messages/{owner}` ← `[record, ...]`
//! - `DELETE {base}/messages/{owner}`
//! - `GET    {base}/health`
//!
//! `put` is a read-modify-write of the whole list. Writes for the same owner
//! are serialized in-process so two concurrent puts cannot drop each other's
//! record. A lock lives only while some task holds or waits on it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::history::upsert_capped;
use super::transport::{classify_failure, unreachable, unreadable, Transport, TransportRequest};
use super::{PersistenceProvider, ProviderKind, StorageError, StorageResult};
use crate::models::{normalize_address, sort_newest_first, MessageRecord, HISTORY_CAP};

const KIND: ProviderKind = ProviderKind::KvStore;

pub struct KvStoreProvider {
    transport: Arc<dyn Transport>,
    cap: usize,
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KvStoreProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cap: HISTORY_CAP,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    fn owner_path(owner: &str) -> String {
        format!("messages/{owner}")
    }

    async fn owner_lock(&self, owner: &str) -> Arc<Mutex<()>> {
        let mut locks = self.owner_locks.lock().await;
        locks
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the owner's lock once no other task holds a handle to it.
    async fn release_owner_lock(&self, owner: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.owner_locks.lock().await;
        // One handle in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(owner);
        }
    }

    async fn write_list(&self, owner: &str, record: &MessageRecord) -> StorageResult<()> {
        let mut records = self.fetch(owner).await?;
        let mut record = record.clone();
        record.owner_address = owner.to_string();
        let evicted = upsert_capped(&mut records, record, self.cap);

        let body = serde_json::to_value(&records)
            .map_err(|e| StorageError::rejected(KIND, None, e.to_string()))?;
        let response = self
            .transport
            .send(TransportRequest::put(Self::owner_path(owner), body))
            .await
            .map_err(|e| unreachable(KIND, e))?;

        if !response.is_success() {
            return Err(classify_failure(KIND, &response));
        }

        if !evicted.is_empty() {
            debug!(owner = %owner, evicted = evicted.len(), "kv store history trimmed");
        }
        Ok(())
    }

    async fn delete_list(&self, owner: &str) -> StorageResult<()> {
        let response = self
            .transport
            .send(TransportRequest::delete(Self::owner_path(owner)))
            .await
            .map_err(|e| unreachable(KIND, e))?;

        if response.is_success() || response.status == 404 {
            Ok(())
        } else {
            Err(classify_failure(KIND, &response))
        }
    }

    async fn fetch(&self, owner: &str) -> StorageResult<Vec<MessageRecord>> {
        let response = self
            .transport
            .send(TransportRequest::get(Self::owner_path(owner)))
            .await
            .map_err(|e| unreachable(KIND, e))?;

        if response.status == 404 {
            return Ok(Vec::new());
        }
        if !response.is_success() {
            return Err(classify_failure(KIND, &response));
        }
        if response.body.is_empty() {
            return Ok(Vec::new());
        }

        let records: Option<Vec<MessageRecord>> =
            response.json().map_err(|e| unreadable(KIND, e))?;
        Ok(records.unwrap_or_default())
    }
}

#[async_trait]
impl PersistenceProvider for KvStoreProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn list(&self, owner_address: &str) -> StorageResult<Vec<MessageRecord>> {
        let owner = normalize_address(owner_address);
        let mut records: Vec<MessageRecord> = self
            .fetch(&owner)
            .await?
            .into_iter()
            .filter(|record| record.owned_by(&owner))
            .collect();
        sort_newest_first(&mut records);
        records.truncate(self.cap);
        Ok(records)
    }

    async fn put(&self, record: &MessageRecord) -> StorageResult<()> {
        let owner = normalize_address(&record.owner_address);
        let lock = self.owner_lock(&owner).await;
        let result = {
            let _guard = lock.lock().await;
            self.write_list(&owner, record).await
        };
        self.release_owner_lock(&owner, lock).await;
        result
    }

    async fn delete_all(&self, owner_address: &str) -> StorageResult<()> {
        let owner = normalize_address(owner_address);
        let lock = self.owner_lock(&owner).await;
        let result = {
            let _guard = lock.lock().await;
            self.delete_list(&owner).await
        };
        self.release_owner_lock(&owner, lock).await;
        result
    }

    async fn health_check(&self) -> bool {
        match self.transport.send(TransportRequest::get("health")).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!(error = %e, "kv store health check failed");
                false
            }
        }
    }
}
