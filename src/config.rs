// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`StorageConfig`] the storage
//! chain is built from. Configuration is loaded once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STORAGE_PROVIDERS` | Preference order of `kv`, `rows`, `local` | `kv,rows,local` |
//! | `KV_STORE_URL` | Managed key-value store endpoint | Unset (provider skipped) |
//! | `KV_STORE_TOKEN` | Bearer token for the key-value store | Unset (provider skipped) |
//! | `ROW_STORE_URL` | Managed row store endpoint | Unset (provider skipped) |
//! | `ROW_STORE_API_KEY` | `x-api-key` for the row store | Optional |
//! | `LOCAL_STORE_PATH` | redb file for the local fallback | Unset (in-memory) |
//! | `STORAGE_TIMEOUT_SECS` | Per-request timeout for managed stores | `10` |
//! | `HEALTH_TTL_SECS` | Lifetime of a cached provider health answer | `30` |
//! | `RECORD_TTL_DAYS` | Default record expiry honored by the row store | `30` |
//! | `SIGNER_PRIVATE_KEY` | Hex private key for the local signer | Optional |
//! | `SIGNER_KEY_PEM_PATH` | PEM private key file for the local signer | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::signature::{LocalWalletSigner, SignerError};
use crate::storage::ProviderKind;

pub const STORAGE_PROVIDERS_ENV: &str = "STORAGE_PROVIDERS";
pub const KV_STORE_URL_ENV: &str = "KV_STORE_URL";
pub const KV_STORE_TOKEN_ENV: &str = "KV_STORE_TOKEN";
pub const ROW_STORE_URL_ENV: &str = "ROW_STORE_URL";
pub const ROW_STORE_API_KEY_ENV: &str = "ROW_STORE_API_KEY";
pub const LOCAL_STORE_PATH_ENV: &str = "LOCAL_STORE_PATH";
pub const STORAGE_TIMEOUT_SECS_ENV: &str = "STORAGE_TIMEOUT_SECS";
pub const HEALTH_TTL_SECS_ENV: &str = "HEALTH_TTL_SECS";
pub const RECORD_TTL_DAYS_ENV: &str = "RECORD_TTL_DAYS";
pub const SIGNER_PRIVATE_KEY_ENV: &str = "SIGNER_PRIVATE_KEY";
pub const SIGNER_KEY_PEM_PATH_ENV: &str = "SIGNER_KEY_PEM_PATH";

/// Environment variable selecting the log output format.
///
/// `json` selects structured JSON lines; anything else is human-readable.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_STORAGE_PROVIDERS: &str = "kv,rows,local";
pub const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HEALTH_TTL_SECS: u64 = 30;
pub const DEFAULT_RECORD_TTL_DAYS: u64 = 30;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown storage provider in STORAGE_PROVIDERS: {0}")]
    UnknownProvider(String),

    #[error("Storage provider listed twice in STORAGE_PROVIDERS: {0}")]
    DuplicateProvider(ProviderKind),

    #[error("STORAGE_PROVIDERS lists no providers")]
    EmptyPreference,

    #[error("Invalid URL in {var}: {reason}")]
    InvalidUrl { var: &'static str, reason: String },

    #[error("Invalid number in {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Local store unavailable: {0}")]
    LocalStore(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("No signer key configured (set SIGNER_PRIVATE_KEY or SIGNER_KEY_PEM_PATH)")]
    MissingSignerKey,

    #[error("Signer key error: {0}")]
    SignerKey(String),
}

impl From<SignerError> for ConfigError {
    fn from(err: SignerError) -> Self {
        ConfigError::SignerKey(err.to_string())
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Endpoint and credential of a managed store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedStoreConfig {
    pub url: Url,
    /// Bearer token (key-value store) or API key (row store).
    pub credential: Option<String>,
}

/// Everything needed to build the storage chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Provider order; earlier entries win.
    pub preference: Vec<ProviderKind>,
    /// Present only when both URL and token are set.
    pub kv_store: Option<ManagedStoreConfig>,
    pub row_store: Option<ManagedStoreConfig>,
    /// redb file for the local fallback; `None` keeps history in memory.
    pub local_path: Option<PathBuf>,
    pub request_timeout: Duration,
    pub health_ttl: Duration,
    pub record_ttl: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preference: vec![ProviderKind::KvStore, ProviderKind::RowStore, ProviderKind::Local],
            kv_store: None,
            row_store: None,
            local_path: None,
            request_timeout: Duration::from_secs(DEFAULT_STORAGE_TIMEOUT_SECS),
            health_ttl: Duration::from_secs(DEFAULT_HEALTH_TTL_SECS),
            record_ttl: Duration::from_secs(DEFAULT_RECORD_TTL_DAYS * SECS_PER_DAY),
        }
    }
}

impl StorageConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_optional)
    }

    /// Load using `lookup` in place of the process environment.
    ///
    /// `lookup` should return `None` for unset or blank variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let providers = lookup(STORAGE_PROVIDERS_ENV)
            .unwrap_or_else(|| DEFAULT_STORAGE_PROVIDERS.to_string());
        let preference = parse_preference(&providers)?;

        let kv_store = match (lookup(KV_STORE_URL_ENV), lookup(KV_STORE_TOKEN_ENV)) {
            (Some(url), Some(token)) => Some(ManagedStoreConfig {
                url: parse_url(KV_STORE_URL_ENV, &url)?,
                credential: Some(token),
            }),
            _ => None,
        };

        let row_store = match lookup(ROW_STORE_URL_ENV) {
            Some(url) => Some(ManagedStoreConfig {
                url: parse_url(ROW_STORE_URL_ENV, &url)?,
                credential: lookup(ROW_STORE_API_KEY_ENV),
            }),
            None => None,
        };

        let seconds = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                Some(value) => value
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidNumber { var, value }),
                None => Ok(default),
            }
        };

        Ok(Self {
            preference,
            kv_store,
            row_store,
            local_path: lookup(LOCAL_STORE_PATH_ENV).map(PathBuf::from),
            request_timeout: Duration::from_secs(seconds(
                STORAGE_TIMEOUT_SECS_ENV,
                DEFAULT_STORAGE_TIMEOUT_SECS,
            )?),
            health_ttl: Duration::from_secs(seconds(HEALTH_TTL_SECS_ENV, DEFAULT_HEALTH_TTL_SECS)?),
            record_ttl: Duration::from_secs(
                seconds(RECORD_TTL_DAYS_ENV, DEFAULT_RECORD_TTL_DAYS)?.saturating_mul(SECS_PER_DAY),
            ),
        })
    }
}

/// Parse a comma-separated provider list, rejecting unknown names and
/// duplicates.
pub fn parse_preference(value: &str) -> Result<Vec<ProviderKind>, ConfigError> {
    let mut preference = Vec::new();
    for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let kind: ProviderKind = name
            .parse()
            .map_err(|_| ConfigError::UnknownProvider(name.to_string()))?;
        if preference.contains(&kind) {
            return Err(ConfigError::DuplicateProvider(kind));
        }
        preference.push(kind);
    }

    if preference.is_empty() {
        return Err(ConfigError::EmptyPreference);
    }
    Ok(preference)
}

fn parse_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        var,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            var,
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

// =============================================================================
// Signer Key
// =============================================================================

/// Build the local signer from `SIGNER_PRIVATE_KEY` or `SIGNER_KEY_PEM_PATH`.
pub fn signer_from_env() -> Result<LocalWalletSigner, ConfigError> {
    signer_from_lookup(env_optional)
}

pub fn signer_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<LocalWalletSigner, ConfigError> {
    if let Some(hex_key) = lookup(SIGNER_PRIVATE_KEY_ENV) {
        return Ok(LocalWalletSigner::from_hex(&hex_key)?);
    }

    let path = lookup(SIGNER_KEY_PEM_PATH_ENV).ok_or(ConfigError::MissingSignerKey)?;
    let pem = std::fs::read(&path)
        .map_err(|e| ConfigError::SignerKey(format!("failed to read {path}: {e}")))?;
    Ok(LocalWalletSigner::from_pem(&pem)?)
}

/// Whether `LOG_FORMAT` asks for JSON logs.
pub fn json_logs_requested() -> bool {
    env_or_default(LOG_FORMAT_ENV, "pretty").eq_ignore_ascii_case("json")
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}
