//! In-memory cache store backed by `DashMap`
//!
//! Supports per-entry TTL and the atomic primitives the lock coordinator
//! needs. State lives in this process only, so it coordinates tasks within
//! one instance; multi-instance deployments use Redis.
//!
//! Reads ignore expired entries. Every [`SWEEP_EVERY`] writes the store
//! drops them, so keys that are never read again do not accumulate.

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Writes between sweeps of expired entries
pub const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    /// `None` when the TTL is past what the clock can represent
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: expiry_after(ttl),
        }
    }

    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => at > Instant::now(),
            None => true,
        }
    }
}

fn expiry_after(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// Process-local store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
    writes: Arc<AtomicU64>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; reads already ignore them
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        before.saturating_sub(self.entries.len())
    }

    /// Count a write and sweep on every `SWEEP_EVERY`th one.
    ///
    /// Callers must not hold a map guard.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged = purged, "Swept expired entries (memory)");
            }
        }
    }

    #[cfg(test)]
    fn stored_len(&self) -> usize {
        self.entries.len()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let result = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone());

        if result.is_some() {
            debug!(key = key, "Cache HIT (memory)");
        } else {
            debug!(key = key, "Cache MISS (memory)");
        }

        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value, ttl));
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Cache SET (memory)");
        self.record_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        debug!(key = key, "Cache DEL (memory)");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        // The entry guard holds the shard write lock, so check-and-insert is atomic
        let written = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    false
                } else {
                    occupied.insert(MemoryEntry::new(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(value, ttl));
                true
            }
        };
        if written {
            self.record_write();
        }
        Ok(written)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.is_live() && entry.value == expected);
        Ok(removed.is_some())
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> CacheResult<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live() && entry.value == expected => {
                entry.expires_at = expiry_after(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_get_delete() {
        let store = MemoryCacheStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("key", "value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));

        store.delete("key").await.unwrap();
        assert!(store.get("key").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_ttl_expiry() {
        let store = MemoryCacheStore::new();
        store
            .set("expiring", "value", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.get("expiring").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(store.get("expiring").await.unwrap().is_none());
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_live_entries_only() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_millis(100);

        assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_millis(150)).await;

        // Expired holder no longer blocks a new owner
        assert!(store.set_if_absent("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_compare_operations_check_ownership() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_secs(5);
        store.set_if_absent("lock", "owner-1", ttl).await.unwrap();

        assert!(!store.compare_and_expire("lock", "owner-2", ttl).await.unwrap());
        assert!(store.compare_and_expire("lock", "owner-1", ttl).await.unwrap());

        assert!(!store.compare_and_delete("lock", "owner-2").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_some());
        assert!(store.compare_and_delete("lock", "owner-1").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_set_if_absent_has_single_winner() {
        let store = MemoryCacheStore::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("contended", &format!("owner-{i}"), Duration::from_secs(5))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_entries() {
        let store = MemoryCacheStore::new();
        for i in 0..SWEEP_EVERY {
            store
                .set(&format!("short-{i}"), "v", Duration::from_millis(10))
                .await
                .unwrap();
        }
        assert_eq!(store.stored_len(), SWEEP_EVERY as usize);

        tokio::time::advance(Duration::from_millis(20)).await;

        for i in 0..SWEEP_EVERY {
            store
                .set_if_absent(&format!("long-{i}"), "v", Duration::from_secs(60))
                .await
                .unwrap();
        }

        // Never read again, yet gone after the second sweep
        assert_eq!(store.stored_len(), SWEEP_EVERY as usize);
        assert_eq!(store.len(), SWEEP_EVERY as usize);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_does_not_panic() {
        let store = MemoryCacheStore::new();
        store.set("forever", "v", Duration::MAX).await.unwrap();
        assert_eq!(store.get("forever").await.unwrap(), Some("v".to_string()));

        assert!(store.set_if_absent("lock", "owner", Duration::MAX).await.unwrap());
        assert!(store
            .compare_and_expire("lock", "owner", Duration::MAX)
            .await
            .unwrap());
        assert!(store.compare_and_delete("lock", "owner").await.unwrap());
    }

    #[test]
    fn test_memory_provider_name() {
        let store = MemoryCacheStore::new();
        assert_eq!(store.provider_name(), "memory");
        assert!(!store.is_distributed());
    }
}
