//! # Request Coordination
//!
//! Cross-instance mutual exclusion over the shared cache store, used to make
//! sure only one caller per cache key pays for the provider calls.

pub mod lock;

pub use lock::{DistributedLockCoordinator, LockError, LockGuard, LockHandle, LockOptions};
