//! # Circuit Breaker Configuration
//!
//! Runtime thresholds for a single breaker. The file-backed configuration in
//! `crate::config` converts into this type via `to_resilience_config()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub open_threshold: u32,

    /// Time spent open before trial calls are admitted
    pub cool_down: Duration,

    /// Successful trial calls needed to close the circuit again
    pub close_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Defaults for external recognition providers
    pub fn for_recognition_provider() -> Self {
        Self {
            open_threshold: 5,
            cool_down: Duration::from_secs(60),
            close_threshold: 2,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.open_threshold == 0 {
            return Err("open_threshold must be greater than 0".to_string());
        }

        if self.open_threshold > 100 {
            return Err("open_threshold should not exceed 100".to_string());
        }

        if self.cool_down.is_zero() {
            return Err("cool_down must be greater than 0".to_string());
        }

        if self.cool_down > Duration::from_secs(3600) {
            return Err("cool_down should not exceed 3600 seconds".to_string());
        }

        if self.close_threshold == 0 {
            return Err("close_threshold must be greater than 0".to_string());
        }

        if self.close_threshold > 50 {
            return Err("close_threshold should not exceed 50".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_recognition_provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let mut invalid = CircuitBreakerConfig {
            open_threshold: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        invalid = CircuitBreakerConfig {
            cool_down: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        invalid = CircuitBreakerConfig {
            close_threshold: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_provider_defaults() {
        let provider = CircuitBreakerConfig::for_recognition_provider();
        assert_eq!(provider.open_threshold, 5);
        assert_eq!(provider.cool_down, Duration::from_secs(60));
        assert_eq!(provider.close_threshold, 2);
        assert_eq!(provider, CircuitBreakerConfig::default());
    }
}
