//! Distributed lock over a [`CacheStore`].
//!
//! A lock is a key written with `set_if_absent` whose value is the holder's
//! owner token. Release and renewal only touch the key while it still holds
//! that token, so a holder whose lock expired can never release or extend a
//! lock that someone else has since acquired.
//!
//! [`LockGuard`] owns the renewal task. Dropping the guard on any path
//! (early return, error, panic, cancellation) stops renewal and releases the
//! key in the background.

use crate::cache::{CacheError, CacheStore, LockKey};
use crate::logging::log_lock_operation;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock acquisition parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LockOptions {
    /// Maximum time to wait for the lock
    pub timeout: Duration,
    /// Expiry set on the key; bounds exposure to a crashed holder
    pub expiry: Duration,
    /// Extend the expiry every `expiry / 3` while the guard is alive
    pub auto_renew: bool,
    /// First delay between acquisition attempts
    pub retry_interval: Duration,
    /// Cap for the doubling retry delay
    pub max_retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            expiry: Duration::from_secs(30),
            auto_renew: true,
            retry_interval: Duration::from_millis(50),
            max_retry_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LockError {
    #[error("Lock {key} not acquired within {waited:?}")]
    Timeout { key: String, waited: Duration },

    #[error("Lock store error: {0}")]
    Store(#[from] CacheError),
}

/// Identity of an acquired lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: LockKey,
    owner: String,
    expiry: Duration,
    acquired_at: Instant,
}

impl LockHandle {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Token stored as the lock value
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Acquires and releases locks against a shared store
#[derive(Debug)]
pub struct DistributedLockCoordinator<S: CacheStore> {
    store: Arc<S>,
    owner_prefix: String,
}

impl<S: CacheStore> Clone for DistributedLockCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            owner_prefix: self.owner_prefix.clone(),
        }
    }
}

impl<S: CacheStore> DistributedLockCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
        Self {
            store,
            owner_prefix: format!("{host}:{}", std::process::id()),
        }
    }

    /// Unique per acquisition, so two tasks in one process never share a token
    fn next_owner_token(&self) -> String {
        format!("{}:{}", self.owner_prefix, Uuid::new_v4())
    }

    /// Acquire `key`, polling with capped exponential backoff until
    /// `options.timeout` elapses.
    ///
    /// Store errors abort immediately as [`LockError::Store`]; callers decide
    /// whether to degrade.
    pub async fn acquire(&self, key: &LockKey, options: &LockOptions) -> Result<LockGuard<S>, LockError> {
        let owner = self.next_owner_token();
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut delay = options.retry_interval;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if self
                .store
                .set_if_absent(key.as_str(), &owner, options.expiry)
                .await?
            {
                log_lock_operation(
                    "acquire",
                    key.as_str(),
                    &owner,
                    "acquired",
                    Some(&format!("attempts={attempts}")),
                );
                return Ok(LockGuard::new(
                    LockHandle {
                        key: key.clone(),
                        owner,
                        expiry: options.expiry,
                        acquired_at: Instant::now(),
                    },
                    Arc::clone(&self.store),
                    options.auto_renew,
                ));
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now.duration_since(started);
                warn!(
                    lock_key = %key,
                    waited_ms = waited.as_millis() as u64,
                    attempts = attempts,
                    "Lock acquisition timed out"
                );
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited,
                });
            }

            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(options.max_retry_interval);
        }
    }

    /// Release a held lock. Returns `false` if it had already been lost.
    pub async fn release(&self, guard: LockGuard<S>) -> Result<bool, LockError> {
        guard.release().await
    }

    /// Run `f` while holding `key`, releasing afterwards on every path
    pub async fn with_lock<T, F, Fut>(&self, key: &LockKey, options: &LockOptions, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire(key, options).await?;
        let output = f().await;
        if let Err(e) = guard.release().await {
            warn!(lock_key = %key, error = %e, "Lock release failed, key will expire");
        }
        Ok(output)
    }
}

/// Background expiry extension for one held lock
#[derive(Debug)]
struct RenewalTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// A held lock. Renewal stops and the key is released when the guard is
/// released or dropped.
#[derive(Debug)]
pub struct LockGuard<S: CacheStore> {
    handle: LockHandle,
    store: Arc<S>,
    renewal: Option<RenewalTask>,
    lost: Arc<AtomicBool>,
    released: bool,
}

impl<S: CacheStore> LockGuard<S> {
    fn new(handle: LockHandle, store: Arc<S>, auto_renew: bool) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let renewal = auto_renew.then(|| {
            spawn_renewal(handle.clone(), Arc::clone(&store), Arc::clone(&lost))
        });

        Self {
            handle,
            store,
            renewal,
            lost,
            released: false,
        }
    }

    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    /// Renewal found another owner on the key
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Stop renewal and delete the key if this guard still owns it
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.released = true;

        if let Some(renewal) = self.renewal.take() {
            renewal.cancel.cancel();
            let _ = renewal.join.await;
        }

        let released = self
            .store
            .compare_and_delete(self.handle.key.as_str(), &self.handle.owner)
            .await?;

        let status = if released { "released" } else { "already_lost" };
        log_lock_operation(
            "release",
            self.handle.key.as_str(),
            &self.handle.owner,
            status,
            Some(&format!("held_ms={}", self.handle.held_for().as_millis())),
        );
        if !released {
            warn!(
                lock_key = %self.handle.key,
                "Lock expired or was taken over before release"
            );
        }

        Ok(released)
    }
}

impl<S: CacheStore> Drop for LockGuard<S> {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.cancel.cancel();
        }
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = self.handle.key.clone();
        let owner = self.handle.owner.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match store.compare_and_delete(key.as_str(), &owner).await {
                        Ok(released) => log_lock_operation(
                            "release",
                            key.as_str(),
                            &owner,
                            if released { "released_on_drop" } else { "already_lost" },
                            None,
                        ),
                        Err(e) => warn!(
                            lock_key = %key,
                            error = %e,
                            "Lock release on drop failed, key will expire"
                        ),
                    }
                });
            }
            Err(_) => {
                debug!(lock_key = %key, "No runtime to release lock on drop, key will expire");
            }
        }
    }
}

fn spawn_renewal<S: CacheStore>(
    handle: LockHandle,
    store: Arc<S>,
    lost: Arc<AtomicBool>,
) -> RenewalTask {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = (handle.expiry / 3).max(Duration::from_millis(1));

    let join = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let renewed = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = store.compare_and_expire(handle.key.as_str(), &handle.owner, handle.expiry) => result,
            };

            match renewed {
                Ok(true) => {
                    log_lock_operation("renew", handle.key.as_str(), &handle.owner, "renewed", None);
                }
                Ok(false) => {
                    lost.store(true, Ordering::Release);
                    warn!(
                        lock_key = %handle.key,
                        owner = %handle.owner,
                        "Lock lost during renewal, another holder may run duplicate provider calls"
                    );
                    break;
                }
                Err(e) => {
                    // Transient store error: keep trying until the key expires
                    warn!(lock_key = %handle.key, error = %e, "Lock renewal failed");
                }
            }
        }
    });

    RenewalTask { cancel, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCacheStore};

    fn options(timeout_ms: u64, expiry_ms: u64, auto_renew: bool) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(timeout_ms),
            expiry: Duration::from_millis(expiry_ms),
            auto_renew,
            ..LockOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_release() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let guard = coordinator.acquire(&key, &options(100, 1_000, false)).await.unwrap();
        let owner = guard.handle().owner().to_string();
        assert_eq!(store.get(key.as_str()).await.unwrap(), Some(owner));

        assert!(coordinator.release(guard).await.unwrap());
        assert_eq!(store.get(key.as_str()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_acquire_times_out() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let _held = coordinator.acquire(&key, &options(100, 60_000, false)).await.unwrap();
        let result = coordinator.acquire(&key, &options(250, 60_000, false)).await;

        match result {
            Err(LockError::Timeout { key, waited }) => {
                assert_eq!(key, "lock:plant");
                assert!(waited >= Duration::from_millis(250));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_acquires_after_release() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let held = coordinator.acquire(&key, &options(100, 60_000, false)).await.unwrap();
        let waiter = {
            let coordinator = coordinator.clone();
            let key = key.clone();
            tokio::spawn(async move { coordinator.acquire(&key, &options(5_000, 60_000, false)).await })
        };

        sleep(Duration::from_millis(300)).await;
        held.release().await.unwrap();

        let guard = waiter.await.unwrap().unwrap();
        assert_eq!(store.get(key.as_str()).await.unwrap().as_deref(), Some(guard.handle().owner()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_does_not_delete_foreign_lock() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let guard = coordinator.acquire(&key, &options(100, 100, false)).await.unwrap();
        sleep(Duration::from_millis(150)).await;
        assert!(store.set_if_absent(key.as_str(), "someone-else", Duration::from_secs(60)).await.unwrap());

        assert!(!guard.release().await.unwrap());
        assert_eq!(store.get(key.as_str()).await.unwrap().as_deref(), Some("someone-else"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_renew_keeps_lock_alive() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let guard = coordinator.acquire(&key, &options(100, 300, true)).await.unwrap();
        sleep(Duration::from_millis(1_000)).await;

        assert!(!guard.is_lost());
        assert!(store.get(key.as_str()).await.unwrap().is_some());
        assert!(guard.release().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_detects_lost_lock() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let guard = coordinator.acquire(&key, &options(100, 300, true)).await.unwrap();
        store.set(key.as_str(), "intruder", Duration::from_secs(60)).await.unwrap();
        sleep(Duration::from_millis(150)).await;

        assert!(guard.is_lost());
        assert!(!guard.release().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_in_background() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        {
            let _guard = coordinator.acquire(&key, &options(100, 60_000, true)).await.unwrap();
        }
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(1)).await;

        assert_eq!(store.get(key.as_str()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_releases_after_closure() {
        let store = Arc::new(MemoryCacheStore::new());
        let coordinator = DistributedLockCoordinator::new(Arc::clone(&store));
        let key = LockKey::named("plant");

        let value = coordinator
            .with_lock(&key, &options(100, 60_000, true), || async { 42 })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(store.get(key.as_str()).await.unwrap(), None);
    }
}
