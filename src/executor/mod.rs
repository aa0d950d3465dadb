//! # Executor
//!
//! Bounded execution of provider calls. See [`worker_pool`].

pub mod worker_pool;

pub use worker_pool::{PoolSlot, PoolTask, WorkerPool, WorkerPoolError, WorkerPoolMetrics};
