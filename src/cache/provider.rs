//! Cache provider with integrated circuit breaker
//!
//! Uses enum dispatch for zero-cost abstraction over the concrete stores.
//! Circuit breaker protection is an internal implementation detail: consumers
//! use `CacheProvider` and get fail-fast behavior when Redis is unavailable.

use super::errors::{CacheError, CacheResult};
use super::providers::{MemoryCacheStore, NoOpCacheStore};
use super::traits::CacheStore;
use crate::config::{CacheConfig, CircuitBreakerComponentConfig};
use crate::resilience::{CircuitBreaker, CircuitState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "cache-redis")]
use super::providers::RedisCacheStore;

/// Internal backend enum for zero-cost dispatch
#[derive(Debug, Clone)]
enum CacheBackend {
    /// Redis store (boxed to reduce enum size)
    #[cfg(feature = "cache-redis")]
    Redis(Box<RedisCacheStore>),

    /// Process-local store
    Memory(MemoryCacheStore),

    /// Always miss, always succeed
    NoOp(NoOpCacheStore),
}

macro_rules! dispatch {
    ($backend:expr, $store:ident => $call:expr) => {
        match $backend {
            #[cfg(feature = "cache-redis")]
            CacheBackend::Redis($store) => $call,
            CacheBackend::Memory($store) => $call,
            CacheBackend::NoOp($store) => $call,
        }
    };
}

impl CacheBackend {
    fn is_distributed(&self) -> bool {
        dispatch!(self, s => s.is_distributed())
    }

    fn provider_name(&self) -> &'static str {
        dispatch!(self, s => s.provider_name())
    }

    fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }
}

/// Cache provider with circuit breaker protection for distributed backends
///
/// ## Backends
///
/// - **Redis/Dragonfly**: shared across the fleet; required for cross-instance dedup
/// - **Memory**: in-process; dedups concurrent requests within one instance
/// - **NoOp**: always-miss fallback when caching is disabled
///
/// ## Circuit Breaker
///
/// For distributed backends a breaker avoids paying a network timeout on
/// every request while the store is down:
///
/// - When open: `get()` returns `Ok(None)`, `set()`/`delete()` return `Ok(())`
/// - Lock primitives return `CacheError::CircuitOpen`, so callers notice the
///   store is unavailable and can degrade explicitly
#[derive(Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("backend", &self.backend)
            .field(
                "circuit_breaker",
                &self.circuit_breaker.as_ref().map(|cb| cb.state()),
            )
            .finish()
    }
}

impl CacheProvider {
    /// Create a cache provider from configuration with graceful degradation
    ///
    /// If Redis is configured but fails to connect, logs a warning and
    /// returns a NoOp provider instead. The system never fails to start
    /// due to cache issues.
    pub async fn from_config_graceful(
        config: &CacheConfig,
        cb_config: Option<&CircuitBreakerComponentConfig>,
    ) -> Self {
        let backend = Self::create_backend(config).await;

        let circuit_breaker = if backend.is_distributed() && backend.is_enabled() {
            cb_config.map(|cb_cfg| {
                info!(
                    open_threshold = cb_cfg.open_threshold,
                    cool_down_seconds = cb_cfg.cool_down_seconds,
                    "Cache circuit breaker initialized"
                );
                Arc::new(CircuitBreaker::new(
                    "cache".to_string(),
                    cb_cfg.to_resilience_config(),
                ))
            })
        } else {
            None
        };

        Self {
            backend,
            circuit_breaker,
        }
    }

    async fn create_backend(config: &CacheConfig) -> CacheBackend {
        if !config.enabled {
            info!("Identification cache disabled by configuration");
            return CacheBackend::NoOp(NoOpCacheStore::new());
        }

        match config.backend.as_str() {
            // Dragonfly speaks the Redis protocol
            "redis" | "dragonfly" => Self::create_redis_backend(config).await,
            "memory" | "in-memory" => {
                info!(backend = "memory", "In-process cache store initialized");
                CacheBackend::Memory(MemoryCacheStore::new())
            }
            "none" | "noop" => CacheBackend::NoOp(NoOpCacheStore::new()),
            other => {
                warn!(backend = other, "Unknown cache backend, falling back to NoOp");
                CacheBackend::NoOp(NoOpCacheStore::new())
            }
        }
    }

    #[cfg(feature = "cache-redis")]
    async fn create_redis_backend(config: &CacheConfig) -> CacheBackend {
        let redis_config = match &config.redis {
            Some(rc) => rc,
            None => {
                warn!("Redis cache enabled but no [cache.redis] config found, falling back to NoOp");
                return CacheBackend::NoOp(NoOpCacheStore::new());
            }
        };

        match RedisCacheStore::from_config(redis_config).await {
            Ok(store) => {
                info!(backend = "redis", "Distributed cache store initialized successfully");
                CacheBackend::Redis(Box::new(store))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis, falling back to NoOp cache (graceful degradation)"
                );
                CacheBackend::NoOp(NoOpCacheStore::new())
            }
        }
    }

    #[cfg(not(feature = "cache-redis"))]
    async fn create_redis_backend(_config: &CacheConfig) -> CacheBackend {
        warn!("Redis cache backend requested but 'cache-redis' feature not enabled, using NoOp");
        CacheBackend::NoOp(NoOpCacheStore::new())
    }

    /// Process-local provider
    pub fn memory() -> Self {
        Self {
            backend: CacheBackend::Memory(MemoryCacheStore::new()),
            circuit_breaker: None,
        }
    }

    /// NoOp provider (explicit opt-out or testing)
    pub fn noop() -> Self {
        Self {
            backend: CacheBackend::NoOp(NoOpCacheStore::new()),
            circuit_breaker: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_enabled()
    }

    /// Current circuit breaker state; `None` without a breaker
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    /// Run a backend operation through the breaker when one is configured.
    ///
    /// `when_open` is returned untouched if the circuit rejects the call.
    async fn guarded<T, Fut>(
        &self,
        operation: &'static str,
        key: &str,
        when_open: impl FnOnce() -> CacheResult<T>,
        call: Fut,
    ) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        let Some(cb) = self.circuit_breaker.as_ref() else {
            return call.await;
        };

        let Some(permit) = cb.try_acquire() else {
            debug!(key = key, operation = operation, "Cache circuit open, short-circuiting");
            return when_open();
        };

        let result = call.await;

        match &result {
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }

        result
    }
}

fn circuit_open<T>(operation: &'static str) -> CacheResult<T> {
    Err(CacheError::CircuitOpen(operation.to_string()))
}

impl CacheStore for CacheProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.guarded("get", key, || Ok(None), async {
            dispatch!(&self.backend, s => s.get(key).await)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.guarded("set", key, || Ok(()), async {
            dispatch!(&self.backend, s => s.set(key, value, ttl).await)
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.guarded("delete", key, || Ok(()), async {
            dispatch!(&self.backend, s => s.delete(key).await)
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.guarded("set_if_absent", key, || circuit_open("set_if_absent"), async {
            dispatch!(&self.backend, s => s.set_if_absent(key, value, ttl).await)
        })
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.guarded("compare_and_delete", key, || circuit_open("compare_and_delete"), async {
            dispatch!(&self.backend, s => s.compare_and_delete(key, expected).await)
        })
        .await
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> CacheResult<bool> {
        self.guarded("compare_and_expire", key, || circuit_open("compare_and_expire"), async {
            dispatch!(&self.backend, s => s.compare_and_expire(key, expected, ttl).await)
        })
        .await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        if let Some(cb) = self.circuit_breaker.as_ref() {
            if !cb.should_allow() {
                return Ok(false);
            }
        }
        dispatch!(&self.backend, s => s.health_check().await)
    }

    fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }
}
