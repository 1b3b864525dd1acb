// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-local fallback store.
//!
//! Each owner maps to one JSON-serialized, newest-first list of at most
//! [`HISTORY_CAP`] records. The backing is either an in-process map or an
//! embedded redb file so history survives restarts.
//!
//! ## Table Layout
//!
//! - `messages`: lowercased owner address → JSON array of records

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, TableDefinition};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::history::upsert_capped;
use super::{PersistenceProvider, ProviderKind, StorageError, StorageResult};
use crate::models::{normalize_address, sort_newest_first, MessageRecord, HISTORY_CAP};

const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LocalStoreError> for StorageError {
    fn from(err: LocalStoreError) -> Self {
        StorageError::rejected(ProviderKind::Local, None, err.to_string())
    }
}

// =============================================================================
// LocalStore
// =============================================================================

enum Backing {
    Memory(RwLock<HashMap<String, String>>),
    Redb(Database),
}

/// Local fallback provider. Never reports a transport failure.
pub struct LocalStore {
    backing: Backing,
    cap: usize,
    // Serializes the load-modify-store cycle of `put` and `delete_all`.
    writes: Mutex<()>,
}

impl LocalStore {
    /// Volatile store; history lives as long as the process.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(RwLock::new(HashMap::new())),
            cap: HISTORY_CAP,
            writes: Mutex::new(()),
        }
    }

    /// Open (or create) a redb-backed store at `path`.
    pub fn open(path: &Path) -> Result<Self, LocalStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        // Pre-create the table so read transactions on a fresh file succeed.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES)?;
        }
        write_txn.commit()?;

        Ok(Self {
            backing: Backing::Redb(db),
            cap: HISTORY_CAP,
            writes: Mutex::new(()),
        })
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backing, Backing::Redb(_))
    }

    async fn load(&self, owner: &str) -> Result<Vec<MessageRecord>, LocalStoreError> {
        let raw = match &self.backing {
            Backing::Memory(map) => map.read().await.get(owner).cloned(),
            Backing::Redb(db) => {
                let read_txn = db.begin_read()?;
                let table = read_txn.open_table(MESSAGES)?;
                let value = table.get(owner)?;
                value.map(|v| String::from_utf8_lossy(v.value()).into_owned())
            }
        };

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, owner: &str, records: &[MessageRecord]) -> Result<(), LocalStoreError> {
        let json = serde_json::to_string(records)?;
        match &self.backing {
            Backing::Memory(map) => {
                map.write().await.insert(owner.to_string(), json);
            }
            Backing::Redb(db) => {
                let write_txn = db.begin_write()?;
                {
                    let mut table = write_txn.open_table(MESSAGES)?;
                    table.insert(owner, json.as_bytes())?;
                }
                write_txn.commit()?;
            }
        }
        Ok(())
    }

    async fn remove(&self, owner: &str) -> Result<(), LocalStoreError> {
        match &self.backing {
            Backing::Memory(map) => {
                map.write().await.remove(owner);
            }
            Backing::Redb(db) => {
                let write_txn = db.begin_write()?;
                {
                    let mut table = write_txn.open_table(MESSAGES)?;
                    table.remove(owner)?;
                }
                write_txn.commit()?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceProvider for LocalStore {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn list(&self, owner_address: &str) -> StorageResult<Vec<MessageRecord>> {
        let owner = normalize_address(owner_address);
        let mut records = self.load(&owner).await?;
        sort_newest_first(&mut records);
        records.truncate(self.cap);
        Ok(records)
    }

    async fn put(&self, record: &MessageRecord) -> StorageResult<()> {
        let owner = normalize_address(&record.owner_address);
        let _write = self.writes.lock().await;
        let mut records = self.load(&owner).await?;

        let mut record = record.clone();
        record.owner_address = owner.clone();
        let evicted = upsert_capped(&mut records, record, self.cap);
        if !evicted.is_empty() {
            debug!(owner = %owner, evicted = evicted.len(), "local history trimmed");
        }

        self.store(&owner, &records).await?;
        Ok(())
    }

    async fn delete_all(&self, owner_address: &str) -> StorageResult<()> {
        let owner = normalize_address(owner_address);
        let _write = self.writes.lock().await;
        self.remove(&owner).await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match &self.backing {
            Backing::Memory(_) => true,
            Backing::Redb(db) => db.begin_read().is_ok(),
        }
    }
}
