//! # Identification Orchestrator
//!
//! Implements the triple-check caching protocol around the provider
//! fan-out:
//!
//! 1. **Fast path**: read the cache; a hit returns without locking.
//! 2. **Lock**: acquire `lock:{cache_key}`, waiting up to the lock timeout.
//!    Timing out fails the request with `LockTimeout`.
//! 3. **Re-check**: another holder may have filled the entry while we
//!    waited; a hit releases the lock and returns.
//! 4. **Fan-out**: every provider whose breaker admits calls runs on the
//!    worker pool. One provider failing never aborts the others.
//! 5. **Merge** the survivors. No survivor is fatal.
//! 6. **Write** the merged result, then release the lock.
//!
//! When the shared store itself is unreachable the request skips caching
//! and locking entirely and goes straight to the providers; the result is
//! marked `cache_bypassed` in its provenance.
//!
//! Dropping the `identify` future cancels the provider tasks and releases
//! the lock in the background.

use crate::cache::{CacheError, CacheKey, CacheStore};
use crate::config::VerdantConfig;
use crate::coordination::{DistributedLockCoordinator, LockError, LockGuard, LockOptions};
use crate::error::{IdentificationError, IdentificationResult};
use crate::executor::{PoolSlot, WorkerPoolError, WorkerPoolMetrics};
use crate::logging::{log_error, log_identification_operation, log_provider_call};
use crate::models::{
    CacheEntry, FailureKind, IdentificationRequest, MergedResult, ProviderFailure,
    ProviderResult, ResultOrigin,
};
use crate::orchestration::merger::ResultMerger;
use crate::providers::{ProviderError, SharedProvider};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerManager, CircuitBreakerMetrics,
    CircuitState,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The pool's own deadline sits slightly past the provider deadline so a
/// slow provider is recorded as a timeout by its breaker before the pool
/// gives up on the task.
const POOL_DEADLINE_MARGIN: Duration = Duration::from_millis(100);

/// Breaker state for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    /// `None` when circuit breakers are disabled
    pub circuit_state: Option<CircuitState>,
    pub metrics: Option<CircuitBreakerMetrics>,
}

#[derive(Debug, Clone)]
struct GuardedProvider {
    provider: SharedProvider,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl GuardedProvider {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn admits_calls(&self) -> bool {
        self.breaker.as_ref().map_or(true, |b| b.should_allow())
    }
}

/// Entry point for identification requests
#[derive(Debug)]
pub struct IdentificationOrchestrator<S: CacheStore> {
    store: Arc<S>,
    locks: DistributedLockCoordinator<S>,
    lock_options: LockOptions,
    providers: Vec<GuardedProvider>,
    breakers: CircuitBreakerManager,
    pool: Arc<PoolSlot>,
    merger: ResultMerger,
    api_version: String,
    cache_ttl: Duration,
}

impl<S: CacheStore> IdentificationOrchestrator<S> {
    /// `providers` are given in priority order
    pub fn new(
        store: Arc<S>,
        providers: Vec<SharedProvider>,
        pool: Arc<PoolSlot>,
        config: &VerdantConfig,
    ) -> Self {
        let breakers = CircuitBreakerManager::from_config(&config.circuit_breakers);
        let providers = providers
            .into_iter()
            .map(|provider| GuardedProvider {
                breaker: breakers
                    .is_enabled()
                    .then(|| breakers.get_circuit_breaker(provider.name())),
                provider,
            })
            .collect::<Vec<_>>();

        info!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            cache_store = store.provider_name(),
            api_version = %config.api_version,
            "Identification orchestrator initialized"
        );

        Self {
            locks: DistributedLockCoordinator::new(Arc::clone(&store)),
            store,
            lock_options: config.lock.to_lock_options(),
            providers,
            breakers,
            pool,
            merger: ResultMerger::from_config(config),
            api_version: config.api_version.clone(),
            cache_ttl: config.cache.ttl(),
        }
    }

    /// Replace the merger (custom weights or result limits)
    pub fn with_merger(mut self, merger: ResultMerger) -> Self {
        self.merger = merger;
        self
    }

    pub fn cache_key(&self, request: &IdentificationRequest) -> CacheKey {
        CacheKey::for_request(&self.api_version, request)
    }

    /// Identify the plant in `request`
    pub async fn identify(&self, request: IdentificationRequest) -> IdentificationResult<MergedResult> {
        let started = Instant::now();
        let key = self.cache_key(&request);

        // 1. fast path
        match self.read_cache(&key).await {
            Ok(Some(hit)) => {
                log_identification_operation(
                    "identify",
                    key.as_str(),
                    "cache_hit",
                    Some(started.elapsed()),
                    None,
                );
                return Ok(hit);
            }
            Ok(None) => debug!(cache_key = %key, "Cache miss"),
            Err(e) => return self.identify_bypassing_cache(&request, &key, started, e).await,
        }

        // 2. coordinate with concurrent callers for the same key
        let guard = match self.locks.acquire(&key.lock_key(), &self.lock_options).await {
            Ok(guard) => guard,
            Err(LockError::Store(e)) => {
                return self.identify_bypassing_cache(&request, &key, started, e).await
            }
            Err(timeout @ LockError::Timeout { .. }) => {
                log_identification_operation(
                    "identify",
                    key.as_str(),
                    "lock_timeout",
                    Some(started.elapsed()),
                    None,
                );
                return Err(timeout.into());
            }
        };

        // 3. someone else may have filled the entry while we waited
        match self.read_cache(&key).await {
            Ok(Some(hit)) => {
                Self::release(guard).await;
                log_identification_operation(
                    "identify",
                    key.as_str(),
                    "cache_hit_after_lock",
                    Some(started.elapsed()),
                    None,
                );
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => {
                Self::release(guard).await;
                return self.identify_bypassing_cache(&request, &key, started, e).await;
            }
        }

        // 4 + 5. fan out and merge
        let merged = match self.fan_out(&request, &key).await {
            Ok(merged) => merged,
            Err(e) => {
                Self::release(guard).await;
                log_identification_operation(
                    "identify",
                    key.as_str(),
                    "failed",
                    Some(started.elapsed()),
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        };

        // 6. write, then release
        self.write_cache(&key, &merged).await;
        Self::release(guard).await;

        log_identification_operation(
            "identify",
            key.as_str(),
            if merged.is_partial() { "partial" } else { "complete" },
            Some(started.elapsed()),
            None,
        );
        Ok(merged)
    }

    /// [`identify`](Self::identify), abandoned as soon as `token` fires.
    ///
    /// Cancellation stops the provider tasks and lock renewal and returns
    /// [`IdentificationError::Cancelled`].
    pub async fn identify_with_cancellation(
        &self,
        request: IdentificationRequest,
        token: &CancellationToken,
    ) -> IdentificationResult<MergedResult> {
        let content_hash = request.content_hash().clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(content_hash = %content_hash, "Identification cancelled");
                Err(IdentificationError::Cancelled)
            }
            result = self.identify(request) => result,
        }
    }

    /// Remove the cached result for `request`
    pub async fn invalidate(&self, request: &IdentificationRequest) -> IdentificationResult<()> {
        let key = self.cache_key(request);
        self.store
            .delete(key.as_str())
            .await
            .map_err(|e| IdentificationError::CacheUnavailable(e.to_string()))?;
        log_identification_operation("invalidate", key.as_str(), "deleted", None, None);
        Ok(())
    }

    /// Breaker state per provider, in priority order
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.providers
            .iter()
            .map(|p| ProviderHealth {
                provider: p.name().to_string(),
                circuit_state: p.breaker.as_ref().map(|b| b.state()),
                metrics: p.breaker.as_ref().map(|b| b.metrics()),
            })
            .collect()
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// `None` until the first fan-out creates the pool
    pub fn pool_metrics(&self) -> Option<WorkerPoolMetrics> {
        self.pool.is_initialized().then(|| self.pool.get().metrics())
    }

    async fn identify_bypassing_cache(
        &self,
        request: &IdentificationRequest,
        key: &CacheKey,
        started: Instant,
        cause: CacheError,
    ) -> IdentificationResult<MergedResult> {
        warn!(
            cache_key = %key,
            error = %cause,
            "Cache store unavailable, bypassing cache and lock"
        );

        let mut merged = self.fan_out(request, key).await?;
        merged.provenance.cache_bypassed = true;

        log_identification_operation(
            "identify",
            key.as_str(),
            "cache_bypassed",
            Some(started.elapsed()),
            Some(&cause.to_string()),
        );
        Ok(merged)
    }

    /// A stored entry that cannot be decoded or has outlived its TTL is a miss
    async fn read_cache(&self, key: &CacheKey) -> Result<Option<MergedResult>, CacheError> {
        let Some(raw) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Discarding undecodable cache entry");
                return Ok(None);
            }
        };

        match entry.is_expired_at(Utc::now()) {
            Some(false) => {}
            Some(true) => {
                debug!(cache_key = %key, "Cache entry past its TTL");
                return Ok(None);
            }
            None => {
                warn!(
                    cache_key = %key,
                    ttl_seconds = entry.ttl_seconds,
                    "Discarding undecodable cache entry (TTL out of range)"
                );
                return Ok(None);
            }
        }

        let mut result = entry.result;
        result.provenance.origin = ResultOrigin::Cache;
        Ok(Some(result))
    }

    async fn write_cache(&self, key: &CacheKey, merged: &MergedResult) {
        let entry = CacheEntry::new(merged.clone(), self.cache_ttl.as_secs());
        let serialized = match serde_json::to_string(&entry) {
            Ok(serialized) => serialized,
            Err(e) => {
                log_error("orchestrator", "write_cache", &e.to_string(), Some(key.as_str()));
                return;
            }
        };

        if let Err(e) = self.store.set(key.as_str(), &serialized, self.cache_ttl).await {
            warn!(cache_key = %key, error = %e, "Failed to write identification result to cache");
        }
    }

    async fn release(guard: LockGuard<S>) {
        let key = guard.handle().key().clone();
        if let Err(e) = guard.release().await {
            warn!(lock_key = %key, error = %e, "Lock release failed, key will expire");
        }
    }

    /// Run every admitted provider on the pool and merge what comes back
    async fn fan_out(
        &self,
        request: &IdentificationRequest,
        key: &CacheKey,
    ) -> IdentificationResult<MergedResult> {
        let pool = self.pool.get();
        let call_timeout = pool.call_timeout();

        let mut outcomes: Vec<Option<Result<ProviderResult, ProviderFailure>>> =
            vec![None; self.providers.len()];
        let mut pending = Vec::new();

        for (index, guarded) in self.providers.iter().enumerate() {
            if !guarded.admits_calls() {
                debug!(provider = guarded.name(), "Circuit open, skipping provider");
                outcomes[index] = Some(Err(ProviderFailure::new(
                    guarded.name(),
                    FailureKind::CircuitOpen,
                    "circuit breaker open",
                )));
                continue;
            }

            let call = call_provider(
                guarded.clone(),
                request.clone(),
                key.to_string(),
                call_timeout,
            );
            match pool.submit_with_timeout(call, call_timeout + POOL_DEADLINE_MARGIN) {
                Ok(task) => pending.push((index, task)),
                Err(e) => {
                    outcomes[index] = Some(Err(pool_failure(guarded.name(), e)));
                }
            }
        }

        let joined = futures::future::join_all(
            pending
                .into_iter()
                .map(|(index, task)| async move { (index, task.await) }),
        )
        .await;

        for (index, outcome) in joined {
            let name = self.providers[index].name();
            outcomes[index] = Some(match outcome {
                Ok(result) => result,
                Err(e) => Err(pool_failure(name, e)),
            });
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(result) => results.push(result),
                Err(failure) => failures.push(failure),
            }
        }

        if results.is_empty() {
            return Err(self.no_survivors(failures));
        }

        Ok(self
            .merger
            .merge(&results, failures, request.include_disease_detection()))
    }

    fn no_survivors(&self, failures: Vec<ProviderFailure>) -> IdentificationError {
        let all_rejected = !failures.is_empty()
            && failures.iter().all(|f| f.kind == FailureKind::CircuitOpen);

        if all_rejected {
            let provider = failures
                .iter()
                .map(|f| f.provider.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            warn!(providers = %provider, "Every provider circuit is open");
            return IdentificationError::ProviderUnavailable {
                provider,
                reason: "circuit breaker open".to_string(),
            };
        }

        let summary = failures
            .iter()
            .map(|f| format!("{}: {}", f.provider, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        log_error("orchestrator", "fan_out", "all providers failed", Some(&summary));
        IdentificationError::AggregationFailed { failures }
    }
}

/// One provider call as run on the pool: breaker-guarded and bounded by
/// `call_timeout` so that slow calls count as breaker failures.
async fn call_provider(
    guarded: GuardedProvider,
    request: IdentificationRequest,
    cache_key: String,
    call_timeout: Duration,
) -> Result<ProviderResult, ProviderFailure> {
    let started = Instant::now();
    let provider = &guarded.provider;
    let request = &request;

    let bounded = move || async move {
        match tokio::time::timeout(call_timeout, provider.identify(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    };

    let outcome = match &guarded.breaker {
        Some(breaker) => breaker.call(bounded).await.map_err(|e| match e {
            CircuitBreakerError::CircuitOpen { .. } => ProviderFailure::new(
                provider.name(),
                FailureKind::CircuitOpen,
                "circuit breaker open",
            ),
            CircuitBreakerError::OperationFailed(e) => {
                ProviderFailure::new(provider.name(), e.kind(), e.to_string())
            }
        }),
        None => bounded()
            .await
            .map_err(|e| ProviderFailure::new(provider.name(), e.kind(), e.to_string())),
    };

    match &outcome {
        Ok(result) => log_provider_call(
            provider.name(),
            &cache_key,
            "success",
            started.elapsed(),
            Some(result.species.len()),
            None,
        ),
        Err(failure) => log_provider_call(
            provider.name(),
            &cache_key,
            &failure.kind.to_string(),
            started.elapsed(),
            None,
            Some(&failure.message),
        ),
    }

    outcome
}

fn pool_failure(provider: &str, error: WorkerPoolError) -> ProviderFailure {
    let kind = match error {
        WorkerPoolError::TimedOut { .. } => FailureKind::Timeout,
        WorkerPoolError::ShuttingDown | WorkerPoolError::Cancelled => FailureKind::Cancelled,
        WorkerPoolError::Panicked(_) => FailureKind::Unreachable,
    };
    ProviderFailure::new(provider, kind, error.to_string())
}
