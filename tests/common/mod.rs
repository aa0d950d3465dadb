//! Shared fixtures for the integration tests: scripted recognition
//! providers and cache stores that count or fail their calls.

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use verdant_core::cache::{CacheError, CacheResult, CacheStore, MemoryCacheStore};
use verdant_core::config::VerdantConfig;
use verdant_core::executor::PoolSlot;
use verdant_core::models::{
    ContentHash, DiseaseFinding, IdentificationRequest, ImagePayload, ProviderResult,
    SpeciesCandidate,
};
use verdant_core::orchestration::IdentificationOrchestrator;
use verdant_core::providers::{ProviderError, RecognitionProvider, SharedProvider};

/// What a [`MockProvider`] answers with
#[derive(Debug, Clone)]
pub enum Scripted {
    Species(Vec<SpeciesCandidate>, Option<Vec<DiseaseFinding>>),
    Fail(ProviderError),
}

/// Provider that answers from a script, optionally after a delay
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    outcome: Mutex<Scripted>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn succeeding(name: &str, species: Vec<SpeciesCandidate>) -> Arc<Self> {
        Self::scripted(name, Scripted::Species(species, None), Duration::ZERO)
    }

    pub fn failing(name: &str, error: ProviderError) -> Arc<Self> {
        Self::scripted(name, Scripted::Fail(error), Duration::ZERO)
    }

    pub fn scripted(name: &str, outcome: Scripted, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            outcome: Mutex::new(outcome),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_outcome(&self, outcome: Scripted) {
        *self.outcome.lock() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(&self, request: &IdentificationRequest) -> Result<ProviderResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self.outcome.lock().clone();
        match outcome {
            Scripted::Species(species, diseases) => Ok(ProviderResult::new(
                self.name.clone(),
                species,
                diseases.filter(|_| request.include_disease_detection()),
            )),
            Scripted::Fail(error) => Err(error),
        }
    }
}

pub fn shared(providers: &[&Arc<MockProvider>]) -> Vec<SharedProvider> {
    providers
        .iter()
        .map(|p| Arc::clone(*p) as SharedProvider)
        .collect()
}

/// In-memory store that counts reads and writes
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryCacheStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub lock_attempts: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// `set_if_absent` calls, i.e. lock acquisition attempts
    pub fn lock_attempts(&self) -> usize {
        self.lock_attempts.load(Ordering::SeqCst)
    }
}

impl CacheStore for CountingStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.compare_and_expire(key, expected, ttl).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "counting"
    }
}

/// Store whose every operation fails, as if Redis were down
#[derive(Debug, Default)]
pub struct FailingStore;

fn down<T>() -> CacheResult<T> {
    Err(CacheError::ConnectionError("connection refused".to_string()))
}

impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        down()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        down()
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        down()
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
        down()
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> CacheResult<bool> {
        down()
    }

    async fn compare_and_expire(&self, _key: &str, _expected: &str, _ttl: Duration) -> CacheResult<bool> {
        down()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(false)
    }

    fn provider_name(&self) -> &'static str {
        "failing"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}

/// Defaults tightened for tests: short lock polling and call timeouts
pub fn test_config() -> VerdantConfig {
    let mut config = VerdantConfig::default();
    config.lock.timeout_ms = 2_000;
    config.lock.retry_interval_ms = 10;
    config.lock.max_retry_interval_ms = 20;
    config.worker_pool.call_timeout_ms = 1_000;
    config.worker_pool.shutdown_grace_ms = 100;
    config
}

pub fn orchestrator<S: CacheStore>(
    store: Arc<S>,
    providers: Vec<SharedProvider>,
    config: &VerdantConfig,
) -> IdentificationOrchestrator<S> {
    let pool = Arc::new(PoolSlot::new(config.worker_pool.clone()));
    IdentificationOrchestrator::new(store, providers, pool, config)
}

/// Request whose content hash is fixed, so cache keys are predictable
pub fn request(hash: &str, include_disease_detection: bool) -> IdentificationRequest {
    IdentificationRequest::with_content_hash(
        ContentHash::new(hash),
        ImagePayload::new(hash.as_bytes().to_vec(), "image/jpeg"),
        include_disease_detection,
    )
}

pub fn monstera_from_plant_id() -> Vec<SpeciesCandidate> {
    vec![
        SpeciesCandidate::new("Swiss cheese plant", "Monstera deliciosa", 0.92),
        SpeciesCandidate::new("Heartleaf philodendron", "Philodendron hederaceum", 0.05),
    ]
}

pub fn monstera_from_plantnet() -> Vec<SpeciesCandidate> {
    vec![
        SpeciesCandidate::new("Monstera", "Monstera deliciosa Liebm.", 0.88),
        SpeciesCandidate::new("Split-leaf philodendron", "Thaumatophyllum bipinnatifidum", 0.06),
    ]
}
