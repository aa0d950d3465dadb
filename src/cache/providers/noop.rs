//! No-op cache store
//!
//! Always misses, always succeeds. Used when caching is disabled or when
//! Redis is unreachable at startup (graceful degradation). Lock acquisition
//! always succeeds, so no cross-request deduplication takes place.

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheStore;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct NoOpCacheStore;

impl NoOpCacheStore {
    pub fn new() -> Self {
        Self
    }
}

impl CacheStore for NoOpCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
        Ok(true)
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> CacheResult<bool> {
        Ok(true)
    }

    async fn compare_and_expire(&self, _key: &str, _expected: &str, _ttl: Duration) -> CacheResult<bool> {
        Ok(true)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}
