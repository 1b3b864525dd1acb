// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage error types.
//!
//! Only [`StorageError::Transport`] moves the router to the next provider;
//! a backend that answered with a refusal is reported as-is.

use super::provider::ProviderKind;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    /// Backend unreachable or unavailable.
    #[error("{provider} unreachable: {message}")]
    Transport {
        provider: ProviderKind,
        message: String,
    },

    /// Backend reachable but refused the request (quota, validation, ...).
    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },

    /// Every provider in the chain was unreachable.
    #[error("all storage providers failed after {} attempt(s): {last}", .attempted.len())]
    Exhausted {
        attempted: Vec<ProviderKind>,
        last: String,
    },
}

impl StorageError {
    pub fn transport(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Transport {
            provider,
            message: message.into(),
        }
    }

    pub fn rejected(provider: ProviderKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider,
            status,
            message: message.into(),
        }
    }

    /// Whether the next provider in the chain should be tried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
