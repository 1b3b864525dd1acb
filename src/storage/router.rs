// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ordered fallback across persistence providers.
//!
//! Every call walks the chain from the top:
//!
//! - a provider is health-checked the first time a call reaches it, and the
//!   answer is cached for `health_ttl`; an unhealthy provider is skipped as if
//!   it had failed with a transport error (the local store is never skipped),
//! - a [`StorageError::Transport`] moves on to the next provider,
//! - a [`StorageError::Rejected`] ends the call with that error,
//! - running out of providers yields [`StorageError::Exhausted`].
//!
//! Nothing is sticky: a provider that failed one call is tried again first on
//! the next one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::kv_store::KvStoreProvider;
use super::local::LocalStore;
use super::row_store::RowStoreProvider;
use super::transport::HttpTransport;
use super::{PersistenceProvider, ProviderKind, StorageError, StorageResult};
use crate::config::{ConfigError, StorageConfig};
use crate::models::MessageRecord;

/// Default lifetime of a cached health answer.
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(30);

type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// Outcome of one provider in the chain.
#[derive(Debug)]
enum Attempt<T> {
    Done(T),
    /// Unreachable; try the next provider.
    Retryable(StorageError),
    /// Reachable but refused; stop here.
    Fatal(StorageError),
}

impl<T> From<StorageResult<T>> for Attempt<T> {
    fn from(result: StorageResult<T>) -> Self {
        match result {
            Ok(value) => Attempt::Done(value),
            Err(err) if err.is_retryable() => Attempt::Retryable(err),
            Err(err) => Attempt::Fatal(err),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
}

struct ProviderSlot {
    provider: Arc<dyn PersistenceProvider>,
    health: Mutex<Option<HealthEntry>>,
}

/// Health of one provider, as shown by `health_report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub healthy: bool,
}

pub struct StorageRouter {
    slots: Vec<ProviderSlot>,
    health_ttl: Duration,
}

impl StorageRouter {
    /// Router over `providers`, tried in the given order.
    pub fn new(providers: Vec<Arc<dyn PersistenceProvider>>) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                health: Mutex::new(None),
            })
            .collect();
        Self {
            slots,
            health_ttl: DEFAULT_HEALTH_TTL,
        }
    }

    pub fn with_health_ttl(mut self, health_ttl: Duration) -> Self {
        self.health_ttl = health_ttl;
        self
    }

    /// Build the chain described by `config`.
    ///
    /// Managed stores without an endpoint are left out. The local store always
    /// ends the chain, even when the preference list omits it.
    pub fn from_config(config: &StorageConfig) -> Result<Self, ConfigError> {
        let mut providers: Vec<Arc<dyn PersistenceProvider>> = Vec::new();

        for kind in &config.preference {
            match kind {
                ProviderKind::KvStore => match &config.kv_store {
                    Some(store) => {
                        let mut transport = HttpTransport::new(store.url.clone(), config.request_timeout)
                            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
                        if let Some(token) = &store.credential {
                            transport = transport.with_bearer_token(token);
                        }
                        providers.push(Arc::new(KvStoreProvider::new(Arc::new(transport))));
                    }
                    None => debug!("kv store not configured, leaving it out of the chain"),
                },
                ProviderKind::RowStore => match &config.row_store {
                    Some(store) => {
                        let mut transport = HttpTransport::new(store.url.clone(), config.request_timeout)
                            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
                        if let Some(key) = &store.credential {
                            transport = transport.with_api_key(key);
                        }
                        let provider = RowStoreProvider::new(Arc::new(transport))
                            .with_record_ttl(config.record_ttl);
                        providers.push(Arc::new(provider));
                    }
                    None => debug!("row store not configured, leaving it out of the chain"),
                },
                ProviderKind::Local => providers.push(Arc::new(local_store(config)?)),
            }
        }

        if !config.preference.contains(&ProviderKind::Local) {
            providers.push(Arc::new(local_store(config)?));
        }

        let router = Self::new(providers).with_health_ttl(config.health_ttl);
        info!(providers = ?router.providers(), "storage chain configured");
        Ok(router)
    }

    /// Providers in the order they are tried.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.slots.iter().map(|slot| slot.provider.kind()).collect()
    }

    /// Probe every provider now, refreshing the cached answers.
    pub async fn health_report(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let healthy = slot.provider.health_check().await;
            *slot.health.lock().await = Some(HealthEntry {
                healthy,
                checked_at: Instant::now(),
            });
            report.push(ProviderHealth {
                provider: slot.provider.kind(),
                healthy,
            });
        }
        report
    }

    async fn is_healthy(&self, slot: &ProviderSlot) -> bool {
        if slot.provider.kind() == ProviderKind::Local {
            return true;
        }

        let mut cached = slot.health.lock().await;
        if let Some(entry) = *cached {
            if entry.checked_at.elapsed() < self.health_ttl {
                return entry.healthy;
            }
        }

        let healthy = slot.provider.health_check().await;
        debug!(provider = %slot.provider.kind(), healthy, "storage provider health checked");
        *cached = Some(HealthEntry {
            healthy,
            checked_at: Instant::now(),
        });
        healthy
    }

    async fn route<'a, T, F>(&'a self, operation: &'static str, call: F) -> StorageResult<T>
    where
        F: Fn(&'a dyn PersistenceProvider) -> ProviderFuture<'a, T>,
    {
        let mut attempted = Vec::with_capacity(self.slots.len());
        let mut last_error: Option<StorageError> = None;

        for slot in &self.slots {
            let provider: &'a dyn PersistenceProvider = slot.provider.as_ref();
            let kind = provider.kind();
            attempted.push(kind);

            if !self.is_healthy(slot).await {
                warn!(provider = %kind, operation, "skipping unhealthy storage provider");
                last_error = Some(StorageError::transport(kind, "health check failed"));
                continue;
            }

            match Attempt::from(call(provider).await) {
                Attempt::Done(value) => {
                    if attempted.len() > 1 {
                        info!(provider = %kind, operation, "storage call served by fallback provider");
                    }
                    return Ok(value);
                }
                Attempt::Retryable(err) => {
                    warn!(provider = %kind, operation, error = %err, "storage provider unreachable, falling back");
                    last_error = Some(err);
                }
                Attempt::Fatal(err) => {
                    warn!(provider = %kind, operation, error = %err, "storage provider rejected request");
                    return Err(err);
                }
            }
        }

        Err(StorageError::Exhausted {
            attempted,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no storage providers configured".to_string()),
        })
    }
}

fn local_store(config: &StorageConfig) -> Result<LocalStore, ConfigError> {
    match &config.local_path {
        Some(path) => {
            LocalStore::open(path).map_err(|e| ConfigError::LocalStore(format!("{}: {e}", path.display())))
        }
        None => Ok(LocalStore::in_memory()),
    }
}

#[async_trait]
impl PersistenceProvider for StorageRouter {
    /// Kind of the preferred provider.
    fn kind(&self) -> ProviderKind {
        self.slots
            .first()
            .map(|slot| slot.provider.kind())
            .unwrap_or(ProviderKind::Local)
    }

    async fn list(&self, owner_address: &str) -> StorageResult<Vec<MessageRecord>> {
        self.route("list", |provider| provider.list(owner_address)).await
    }

    async fn put(&self, record: &MessageRecord) -> StorageResult<()> {
        self.route("put", |provider| provider.put(record)).await
    }

    async fn delete_all(&self, owner_address: &str) -> StorageResult<()> {
        self.route("delete_all", |provider| provider.delete_all(owner_address)).await
    }

    async fn health_check(&self) -> bool {
        self.health_report().await.iter().any(|status| status.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::config::ManagedStoreConfig;

    const OWNER: &str = "0xabc0000000000000000000000000000000000001";

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Unreachable,
        Refuse,
    }

    struct MockProvider {
        kind: ProviderKind,
        behavior: std::sync::Mutex<Behavior>,
        healthy: AtomicBool,
        calls: AtomicUsize,
        health_checks: AtomicUsize,
        inner: LocalStore,
    }

    impl MockProvider {
        fn new(kind: ProviderKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior: std::sync::Mutex::new(behavior),
                healthy: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                health_checks: AtomicUsize::new(0),
                inner: LocalStore::in_memory(),
            })
        }

        fn set_behavior(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn health_checks(&self) -> usize {
            self.health_checks.load(Ordering::SeqCst)
        }

        fn outcome(&self) -> StorageResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match *self.behavior.lock().unwrap() {
                Behavior::Succeed => Ok(()),
                Behavior::Unreachable => Err(StorageError::transport(self.kind, "connection refused")),
                Behavior::Refuse => Err(StorageError::rejected(self.kind, Some(429), "quota exceeded")),
            }
        }
    }

    #[async_trait]
    impl PersistenceProvider for MockProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn list(&self, owner_address: &str) -> StorageResult<Vec<MessageRecord>> {
            self.outcome()?;
            self.inner.list(owner_address).await
        }

        async fn put(&self, record: &MessageRecord) -> StorageResult<()> {
            self.outcome()?;
            self.inner.put(record).await
        }

        async fn delete_all(&self, owner_address: &str) -> StorageResult<()> {
            self.outcome()?;
            self.inner.delete_all(owner_address).await
        }

        async fn health_check(&self) -> bool {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn router(providers: &[Arc<MockProvider>]) -> StorageRouter {
        StorageRouter::new(
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn PersistenceProvider>)
                .collect(),
        )
    }

    fn record() -> MessageRecord {
        MessageRecord::pending(OWNER, "hello")
    }

    #[tokio::test]
    async fn healthy_primary_serves_the_call() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Succeed);
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        let router = router(&[kv.clone(), local.clone()]);

        router.put(&record()).await.unwrap();

        assert_eq!(kv.calls(), 1);
        assert_eq!(local.calls(), 0);
        assert_eq!(router.list(OWNER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_once() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Unreachable);
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        let router = router(&[kv.clone(), local.clone()]);

        router.put(&record()).await.unwrap();

        assert_eq!(kv.calls(), 1);
        assert_eq!(local.calls(), 1);
        assert_eq!(local.inner.list(OWNER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejection_stops_the_chain() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Refuse);
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        let router = router(&[kv.clone(), local.clone()]);

        let err = router.put(&record()).await.unwrap_err();

        assert!(matches!(err, StorageError::Rejected { status: Some(429), .. }));
        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_names_every_attempt() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Unreachable);
        let rows = MockProvider::new(ProviderKind::RowStore, Behavior::Unreachable);
        let router = router(&[kv.clone(), rows.clone()]);

        let err = router.list(OWNER).await.unwrap_err();
        match err {
            StorageError::Exhausted { attempted, last } => {
                assert_eq!(attempted, [ProviderKind::KvStore, ProviderKind::RowStore]);
                assert!(last.contains("row-store"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(kv.calls(), 1);
        assert_eq!(rows.calls(), 1);
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let router = StorageRouter::new(Vec::new());
        assert!(matches!(
            router.list(OWNER).await,
            Err(StorageError::Exhausted { ref attempted, .. }) if attempted.is_empty()
        ));
    }

    #[tokio::test]
    async fn unhealthy_provider_is_skipped() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Succeed);
        kv.healthy.store(false, Ordering::SeqCst);
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        let router = router(&[kv.clone(), local.clone()]);

        router.put(&record()).await.unwrap();

        assert_eq!(kv.calls(), 0);
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn health_answer_is_cached() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Succeed);
        let router = router(&[kv.clone()]);

        router.list(OWNER).await.unwrap();
        router.list(OWNER).await.unwrap();
        assert_eq!(kv.health_checks(), 1);

        let router = StorageRouter::new(vec![kv.clone() as Arc<dyn PersistenceProvider>])
            .with_health_ttl(Duration::ZERO);
        router.list(OWNER).await.unwrap();
        router.list(OWNER).await.unwrap();
        assert_eq!(kv.health_checks(), 3);
    }

    #[tokio::test]
    async fn local_store_is_never_health_checked() {
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        local.healthy.store(false, Ordering::SeqCst);
        let router = router(&[local.clone()]);

        router.put(&record()).await.unwrap();

        assert_eq!(local.health_checks(), 0);
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_sticky() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Unreachable);
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        let router = router(&[kv.clone(), local.clone()]);

        router.put(&record()).await.unwrap();
        kv.set_behavior(Behavior::Succeed);
        router.put(&record()).await.unwrap();

        assert_eq!(kv.calls(), 2);
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn health_report_covers_every_provider() {
        let kv = MockProvider::new(ProviderKind::KvStore, Behavior::Succeed);
        kv.healthy.store(false, Ordering::SeqCst);
        let local = MockProvider::new(ProviderKind::Local, Behavior::Succeed);
        let router = router(&[kv, local]);

        let report = router.health_report().await;
        assert_eq!(
            report,
            [
                ProviderHealth { provider: ProviderKind::KvStore, healthy: false },
                ProviderHealth { provider: ProviderKind::Local, healthy: true },
            ]
        );
        assert!(router.health_check().await);
        assert_eq!(router.kind(), ProviderKind::KvStore);
    }

    #[test]
    fn unconfigured_managed_stores_are_left_out() {
        let config = StorageConfig {
            preference: vec![ProviderKind::KvStore, ProviderKind::RowStore],
            ..StorageConfig::default()
        };
        let router = StorageRouter::from_config(&config).unwrap();
        assert_eq!(router.providers(), [ProviderKind::Local]);
    }

    #[test]
    fn local_store_is_appended_last() {
        let config = StorageConfig {
            preference: vec![ProviderKind::RowStore, ProviderKind::KvStore],
            kv_store: Some(ManagedStoreConfig {
                url: url::Url::parse("https://kv.example.com").unwrap(),
                credential: Some("token".into()),
            }),
            row_store: Some(ManagedStoreConfig {
                url: url::Url::parse("https://rows.example.com").unwrap(),
                credential: None,
            }),
            ..StorageConfig::default()
        };
        let router = StorageRouter::from_config(&config).unwrap();
        assert_eq!(
            router.providers(),
            [ProviderKind::RowStore, ProviderKind::KvStore, ProviderKind::Local]
        );
    }

    #[test]
    fn configured_local_path_opens_redb() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            preference: vec![ProviderKind::Local],
            local_path: Some(dir.path().join("history.redb")),
            ..StorageConfig::default()
        };
        let router = StorageRouter::from_config(&config).unwrap();
        assert_eq!(router.providers(), [ProviderKind::Local]);
        assert!(dir.path().join("history.redb").exists());
    }
}
