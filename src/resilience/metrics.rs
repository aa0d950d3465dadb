//! # Circuit Breaker Metrics
//!
//! Snapshots of breaker counters for health reporting and logging.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls that reached the protected operation
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls rejected without executing
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Trial calls admitted in the current half-open episode
    pub half_open_calls: u64,

    pub total_duration: Duration,

    pub current_state: CircuitState,

    pub last_failure_at: Option<DateTime<Utc>>,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,

    /// Average duration of successful operations
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            last_failure_at: None,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing provider health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for every breaker owned by a manager, keyed by component name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: BTreeMap<String, CircuitBreakerMetrics>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
    }

    /// Names of breakers that are not healthy
    pub fn unhealthy_circuits(&self) -> Vec<&str> {
        self.circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Fraction of healthy breakers (1.0 when none are registered)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy as f64 / self.circuit_breakers.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_score() {
        let mut system = SystemCircuitBreakerMetrics::new();
        assert_eq!(system.health_score(), 1.0);

        system.add_circuit_breaker("plant_id".to_string(), CircuitBreakerMetrics::new());
        let mut open = CircuitBreakerMetrics::new();
        open.current_state = CircuitState::Open;
        system.add_circuit_breaker("plantnet".to_string(), open);

        assert_eq!(system.health_score(), 0.5);
        assert_eq!(system.unhealthy_circuits(), vec!["plantnet"]);
    }

    #[test]
    fn test_format_summary_mentions_state() {
        let metrics = CircuitBreakerMetrics::new();
        assert!(metrics.format_summary().starts_with("State: Healthy"));
    }
}
