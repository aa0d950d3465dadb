//! # Identification System Bootstrap
//!
//! Wires the cache store, worker pool, provider clients and orchestrator
//! together from a loaded [`ConfigManager`], and owns their lifecycle.
//!
//! - **Graceful cache degradation**: an unreachable Redis at startup falls
//!   back to the NoOp store; startup never fails because of the cache
//! - **Fail fast on providers**: an enabled provider whose client cannot be
//!   built is a configuration error
//! - **Lazy pool**: the worker pool is created on the first fan-out and
//!   drained on shutdown

use crate::cache::{CacheProvider, CacheStore};
use crate::config::ConfigManager;
use crate::error::{IdentificationError, IdentificationResult};
use crate::executor::{PoolSlot, WorkerPoolMetrics};
use crate::orchestration::orchestrator::{IdentificationOrchestrator, ProviderHealth};
use crate::providers::{PlantIdClient, PlantNetClient, SharedProvider};
use crate::resilience::CircuitState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Running identification system
#[derive(Debug)]
pub struct IdentificationSystem {
    orchestrator: Arc<IdentificationOrchestrator<CacheProvider>>,
    cache: Arc<CacheProvider>,
    pool: Arc<PoolSlot>,
    config_manager: Arc<ConfigManager>,
    running: AtomicBool,
}

/// Snapshot returned by [`IdentificationSystem::status`]
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub api_version: String,
    pub cache_backend: String,
    pub cache_enabled: bool,
    pub cache_healthy: bool,
    pub cache_circuit_state: Option<CircuitState>,
    pub circuit_breakers_enabled: bool,
    pub providers: Vec<ProviderHealth>,
    /// `None` until the first request creates the pool
    pub worker_pool: Option<WorkerPoolMetrics>,
}

impl IdentificationSystem {
    /// Build the system with provider clients for every enabled provider
    pub async fn bootstrap(config_manager: Arc<ConfigManager>) -> IdentificationResult<Self> {
        info!(
            environment = config_manager.environment(),
            "Starting identification system bootstrap"
        );

        let providers = Self::build_providers(&config_manager)?;
        Self::bootstrap_with_providers(config_manager, providers).await
    }

    /// Build the system around caller-supplied providers (priority order)
    pub async fn bootstrap_with_providers(
        config_manager: Arc<ConfigManager>,
        providers: Vec<SharedProvider>,
    ) -> IdentificationResult<Self> {
        let config = config_manager.config();

        if providers.is_empty() {
            warn!("No recognition providers configured, every identification will fail");
        }

        let cache_breaker = config
            .circuit_breakers
            .enabled
            .then(|| config.circuit_breakers.config_for_component("cache"));
        let cache = Arc::new(
            CacheProvider::from_config_graceful(&config.cache, cache_breaker.as_ref()).await,
        );

        let pool = Arc::new(PoolSlot::new(config.worker_pool.clone()));
        let orchestrator = Arc::new(IdentificationOrchestrator::new(
            Arc::clone(&cache),
            providers,
            Arc::clone(&pool),
            config,
        ));

        info!(
            cache_backend = cache.provider_name(),
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            max_workers = config.worker_pool.max_workers,
            "Identification system bootstrap completed"
        );

        Ok(Self {
            orchestrator,
            cache,
            pool,
            config_manager,
            running: AtomicBool::new(true),
        })
    }

    fn build_providers(config_manager: &ConfigManager) -> IdentificationResult<Vec<SharedProvider>> {
        let providers = &config_manager.config().providers;
        let mut built: Vec<SharedProvider> = Vec::new();

        if providers.plant_id.enabled {
            let client = PlantIdClient::new(&providers.plant_id).map_err(|e| {
                IdentificationError::ConfigurationError(format!("providers.plant_id: {e}"))
            })?;
            built.push(Arc::new(client));
        }
        if providers.plantnet.enabled {
            let client = PlantNetClient::new(&providers.plantnet).map_err(|e| {
                IdentificationError::ConfigurationError(format!("providers.plantnet: {e}"))
            })?;
            built.push(Arc::new(client));
        }

        info!(
            providers = ?built.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            "Recognition providers initialized"
        );
        Ok(built)
    }

    pub fn orchestrator(&self) -> &Arc<IdentificationOrchestrator<CacheProvider>> {
        &self.orchestrator
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SystemStatus {
        let config = self.config_manager.config();
        let cache_healthy = self.cache.health_check().await.unwrap_or(false);

        SystemStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            api_version: config.api_version.clone(),
            cache_backend: self.cache.provider_name().to_string(),
            cache_enabled: self.cache.is_enabled(),
            cache_healthy,
            cache_circuit_state: self.cache.circuit_state(),
            circuit_breakers_enabled: config.circuit_breakers.enabled,
            providers: self.orchestrator.provider_health(),
            worker_pool: self.orchestrator.pool_metrics(),
        }
    }

    /// Stop accepting pool work and drain in-flight provider calls.
    ///
    /// Returns `false` if calls were still running when the grace period
    /// ended and had to be cancelled.
    pub async fn shutdown(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Identification system already stopped");
            return true;
        }

        info!("Identification system shutdown requested");
        let drained = self.pool.shutdown().await;
        if drained {
            info!("Identification system stopped");
        } else {
            warn!("Shutdown grace period elapsed, remaining provider calls cancelled");
        }
        drained
    }
}
