//! Cache store trait definition

use super::errors::CacheResult;
use std::future::Future;
use std::time::Duration;

/// Operations the identification core needs from the shared key/value store.
///
/// Besides plain get/set/delete, the distributed lock relies on three atomic
/// primitives. Backends must implement each as a single atomic step:
///
/// - `set_if_absent`: write only when the key is missing (or expired)
/// - `compare_and_delete`: delete only when the stored value matches
/// - `compare_and_expire`: reset the TTL only when the stored value matches
pub trait CacheStore: Send + Sync + 'static {
    /// Get a value by key. `Ok(None)` on miss.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<String>>> + Send;

    /// Set a value with a TTL, replacing any previous value
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Delete a key. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = CacheResult<()>> + Send;

    /// Returns `true` when the value was written
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Returns `true` when the key held `expected` and was deleted
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Returns `true` when the key held `expected` and its TTL was reset
    fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Check if the cache backend is healthy
    fn health_check(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared across processes
    fn is_distributed(&self) -> bool {
        true
    }
}
