//! # Identification Cache
//!
//! Shared key/value store holding merged identification results and the
//! distributed lock entries that deduplicate concurrent misses.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (trait)              <- get/set/delete + atomic lock primitives
//! CacheProvider (enum dispatch)   <- what the orchestrator is built with
//!   ├── Redis(RedisCacheStore)      <- fleet-wide, circuit-breaker protected
//!   ├── Memory(MemoryCacheStore)    <- in-process DashMap
//!   └── NoOp(NoOpCacheStore)        <- always-miss fallback
//! ```
//!
//! ## Design Decisions
//!
//! - **Graceful degradation**: Redis failure at startup → NoOp, never blocks startup
//! - **Atomic entries**: one serialized value per key, written with a single SET
//! - **Versioned keys**: the provider API version prefixes every key

pub mod errors;
pub mod keys;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use keys::{CacheKey, LockKey};
pub use provider::CacheProvider;
pub use providers::{MemoryCacheStore, NoOpCacheStore};
pub use traits::CacheStore;

#[cfg(feature = "cache-redis")]
pub use providers::RedisCacheStore;
