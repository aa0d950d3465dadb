//! # Resilience Module
//!
//! Circuit breakers that isolate failing recognition providers and a failing
//! shared cache store, so a dead dependency costs a fast rejection instead of
//! a network timeout on every request.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use verdant_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     open_threshold: 5,
//!     cool_down: Duration::from_secs(60),
//!     close_threshold: 2,
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("plant_id".to_string(), config);
//!
//! let result = circuit_breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("identified")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
