//! # Circuit Breaker Manager
//!
//! One breaker per component (each recognition provider, the cache store).
//! Breakers are created lazily from configuration and shared by `Arc`.

use crate::config::CircuitBreakerConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Manager for the circuit breakers of every guarded component
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        info!(
            enabled = config.enabled,
            component_overrides = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: RwLock::new(HashMap::new()),
            config: config.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get or create the breaker for a component
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read();
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write();

        // Double-check: another caller may have created it
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        let component_config = self
            .config
            .config_for_component(component_name)
            .to_resilience_config();

        let breaker = Arc::new(CircuitBreaker::new(
            component_name.to_string(),
            component_config,
        ));

        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuit_breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .read()
            .get(component_name)
            .map(|breaker| breaker.metrics())
    }

    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system = SystemCircuitBreakerMetrics::new();
        for (name, breaker) in self.circuit_breakers.read().iter() {
            system.add_circuit_breaker(name.clone(), breaker.metrics());
        }
        system
    }

    /// Force every breaker closed (operator recovery)
    pub fn force_all_closed(&self) {
        for breaker in self.circuit_breakers.read().values() {
            breaker.force_closed();
        }
    }
}
