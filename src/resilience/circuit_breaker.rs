//! # Circuit Breaker Implementation
//!
//! Fault isolation for calls to external recognition providers and the
//! shared cache store. Three states: Closed (normal operation), Open (failing
//! fast) and HalfOpen (admitting a bounded number of trial calls).
//!
//! Every admitted call holds a [`CallPermit`]. A permit that is dropped
//! without recording an outcome (the caller was cancelled) hands its trial
//! slot back, so an abandoned call never wedges the breaker in HalfOpen.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock-free counters updated on every recorded outcome
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, state: &BreakerState) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            let fr = failure_count as f64 / total_calls as f64;
            let sr = success_count as f64 / total_calls as f64;
            let avg = if success_count > 0 {
                Duration::from_nanos(total_duration_nanos / success_count)
            } else {
                Duration::ZERO
            };
            (fr, sr, avg)
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures: u64::from(state.consecutive_failures),
            half_open_calls: u64::from(state.trials_in_flight + state.trial_successes),
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state.state,
            last_failure_at: state.last_failure_at,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - a bounded number of trial calls are admitted
    HalfOpen,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        /// Remaining cool-down, when known
        retry_after: Option<Duration>,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Mutable breaker state. Transitions happen under one lock so that the
/// trial-slot accounting and the state flag never disagree.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Bumped on every transition; stale permits compare against it
    generation: u64,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trials_in_flight: u32,
    trial_successes: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            consecutive_failures: 0,
            opened_at: None,
            last_failure_at: None,
            trials_in_flight: 0,
            trial_successes: 0,
        }
    }
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerState>,

    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            open_threshold = config.open_threshold,
            cool_down_seconds = config.cool_down.as_secs(),
            close_threshold = config.close_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::new()),
            metrics: AtomicCircuitBreakerMetrics::new(),
        }
    }

    /// Current circuit state.
    ///
    /// An open circuit whose cool-down has elapsed reports HalfOpen.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_after: self.retry_after(),
            });
        };

        let result = operation().await;

        match &result {
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Admit a call, or return `None` when the circuit rejects it.
    ///
    /// The caller reports the outcome through the permit. Dropping the
    /// permit unreported releases any trial slot it holds.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        let state = inner.state;
        let trial = match state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                drop(inner);
                self.metrics.record_rejection();
                debug!(component = %self.name, "Call rejected, circuit open");
                return None;
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight + inner.trial_successes >= self.config.close_threshold {
                    drop(inner);
                    self.metrics.record_rejection();
                    debug!(component = %self.name, "Call rejected, no trial slot available");
                    return None;
                }
                inner.trials_in_flight += 1;
                Some(inner.generation)
            }
        };

        Some(CallPermit {
            breaker: self,
            trial,
            started: Instant::now(),
            settled: false,
        })
    }

    /// Whether a call made now would be admitted. Does not reserve a slot.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                inner.trials_in_flight + inner.trial_successes < self.config.close_threshold
            }
        }
    }

    /// Remaining cool-down while open
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.config.cool_down.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }

    /// Move Open to HalfOpen once the cool-down has elapsed
    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|opened_at| opened_at.elapsed())
            .unwrap_or(self.config.cool_down);
        if elapsed >= self.config.cool_down {
            self.transition_to_half_open(inner);
        }
    }

    fn on_success(&self, trial: Option<u64>, duration: Duration) {
        self.metrics.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "Operation succeeded"
        );

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                if trial == Some(inner.generation) {
                    inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                    inner.trial_successes += 1;
                    if inner.trial_successes >= self.config.close_threshold {
                        self.transition_to_closed(&mut inner);
                    }
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
            }
        }
    }

    fn on_failure(&self, trial: Option<u64>, duration: Duration) {
        self.metrics.record_failure(duration);

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "Operation failed"
        );

        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.open_threshold {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing reopens the circuit
                if trial == Some(inner.generation) || trial.is_none() {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_abandon(&self, trial: Option<u64>) {
        let Some(generation) = trial else {
            return;
        };
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            debug!(component = %self.name, "Trial call abandoned, slot released");
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;

        info!(
            component = %self.name,
            total_calls = self.metrics.total_calls.load(Ordering::Relaxed),
            "Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.generation += 1;
        inner.opened_at = Some(Instant::now());
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;

        error!(
            component = %self.name,
            consecutive_failures = inner.consecutive_failures,
            open_threshold = self.config.open_threshold,
            cool_down_seconds = self.config.cool_down.as_secs(),
            summary = %self.metrics.snapshot(inner).format_summary(),
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::HalfOpen;
        inner.generation += 1;
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;

        info!(
            component = %self.name,
            close_threshold = self.config.close_threshold,
            "Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.transition_to_open(&mut inner);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        self.metrics.snapshot(&inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closed with a low failure rate
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            return true;
        }

        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        (failure_count as f64 / total_calls as f64) < 0.1
    }
}

/// Admission ticket for one protected call
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Generation of the half-open episode this trial belongs to
    trial: Option<u64>,
    started: Instant,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial, self.started.elapsed());
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial, self.started.elapsed());
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.trial);
        }
    }
}
