// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistence provider trait, implemented once per backend.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::StorageResult;
use crate::models::MessageRecord;

/// Storage backends, in the order they are usually preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Managed key-value store (one list per owner).
    KvStore,
    /// Managed row store (one row per record).
    RowStore,
    /// Process-local fallback.
    Local,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::KvStore => "kv-store",
            ProviderKind::RowStore => "row-store",
            ProviderKind::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kv" | "kv-store" => Ok(ProviderKind::KvStore),
            "rows" | "row" | "row-store" => Ok(ProviderKind::RowStore),
            "local" => Ok(ProviderKind::Local),
            other => Err(format!("unknown storage provider `{other}`")),
        }
    }
}

/// Owner-scoped record storage.
///
/// Owner addresses are matched case-insensitively by every implementation.
/// Failures are either [`StorageError::Transport`](super::StorageError::Transport)
/// (unreachable) or [`StorageError::Rejected`](super::StorageError::Rejected)
/// (refused).
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> ProviderKind;

    /// Records for `owner_address`, newest first. Unknown owners yield an
    /// empty list.
    async fn list(&self, owner_address: &str) -> StorageResult<Vec<MessageRecord>>;

    /// Insert or replace by `(ownerAddress, recordId)`, keeping at most the
    /// newest [`HISTORY_CAP`](crate::models::HISTORY_CAP) records.
    async fn put(&self, record: &MessageRecord) -> StorageResult<()>;

    /// Remove every record for `owner_address`. No-op when there are none.
    async fn delete_all(&self, owner_address: &str) -> StorageResult<()>;

    /// Liveness probe. Never errors.
    async fn health_check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_aliases() {
        assert_eq!("kv".parse::<ProviderKind>(), Ok(ProviderKind::KvStore));
        assert_eq!(" KV-Store ".parse::<ProviderKind>(), Ok(ProviderKind::KvStore));
        assert_eq!("rows".parse::<ProviderKind>(), Ok(ProviderKind::RowStore));
        assert_eq!("row-store".parse::<ProviderKind>(), Ok(ProviderKind::RowStore));
        assert_eq!("local".parse::<ProviderKind>(), Ok(ProviderKind::Local));
        assert!("redis".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for kind in [ProviderKind::KvStore, ProviderKind::RowStore, ProviderKind::Local] {
            assert_eq!(kind.to_string().parse::<ProviderKind>(), Ok(kind));
        }
    }
}
