// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Owner-scoped message history behind one [`PersistenceProvider`] trait,
//! with a [`StorageRouter`] that falls back across backends.
//!
//! ## Backends
//!
//! ```text
//! StorageRouter ──► kv-store   (managed, one JSON list per owner)
//!               ──► row-store  (managed, one row per record, honors expiry)
//!               ──► local      (in-process map or redb file; always last)
//! ```
//!
//! Every backend keeps at most [`HISTORY_CAP`](crate::models::HISTORY_CAP)
//! records per owner, newest first, and matches owners case-insensitively.

pub mod error;
pub mod history;
pub mod kv_store;
pub mod local;
pub mod provider;
pub mod router;
pub mod row_store;
pub mod transport;

pub use error::{StorageError, StorageResult};
pub use kv_store::KvStoreProvider;
pub use local::{LocalStore, LocalStoreError};
pub use provider::{PersistenceProvider, ProviderKind};
pub use router::{ProviderHealth, StorageRouter};
pub use row_store::RowStoreProvider;
pub use transport::{HttpTransport, Transport, TransportFailure, TransportRequest, TransportResponse};
