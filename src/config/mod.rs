//! # Verdant Configuration
//!
//! Every tunable of the identification core lives here: cache backend and
//! TTL, lock timing, worker pool sizing, per-provider breaker thresholds,
//! provider endpoints and merge weights.
//!
//! Sections deserialize with `#[serde(default)]`, so a configuration file
//! only needs to name what it changes. [`ConfigManager`] layers a TOML file
//! and `VERDANT__*` environment variables over those defaults.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use verdant_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let ttl = manager.config().cache.ttl();
//! let lock_timeout = manager.config().lock.timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::coordination::LockOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Longest cache TTL accepted (365 days)
pub const MAX_CACHE_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Longest lock expiry accepted (1 hour)
pub const MAX_LOCK_EXPIRY_MS: u64 = 60 * 60 * 1000;

/// Root configuration for the identification core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdantConfig {
    /// Provider contract version; part of every cache key
    pub api_version: String,
    pub cache: CacheConfig,
    pub lock: LockConfig,
    pub worker_pool: WorkerPoolConfig,
    pub circuit_breakers: CircuitBreakerConfig,
    pub providers: ProvidersConfig,
    pub merger: MergerConfig,
}

impl Default for VerdantConfig {
    fn default() -> Self {
        Self {
            api_version: "v1".to_string(),
            cache: CacheConfig::default(),
            lock: LockConfig::default(),
            worker_pool: WorkerPoolConfig::default(),
            circuit_breakers: CircuitBreakerConfig::default(),
            providers: ProvidersConfig::default(),
            merger: MergerConfig::default(),
        }
    }
}

impl VerdantConfig {
    /// Validate every section, stopping at the first problem
    pub fn validate(&self) -> ConfigResult<()> {
        if self.api_version.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "api_version",
                "root configuration",
            ));
        }
        if self.api_version.contains(':') {
            return Err(ConfigurationError::invalid_value(
                "api_version",
                &self.api_version,
                "must not contain ':' (cache key separator)",
            ));
        }

        self.cache.validate()?;
        self.lock.validate()?;
        self.worker_pool.validate()?;
        self.circuit_breakers.validate()?;
        self.providers.validate()?;
        self.merger.validate()?;
        Ok(())
    }
}

/// Identification result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `redis`, `dragonfly`, `memory` or `none`
    pub backend: String,
    pub ttl_seconds: u64,
    pub redis: Option<RedisConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "memory".to_string(),
            ttl_seconds: 24 * 60 * 60,
            redis: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.enabled && self.ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.ttl_seconds",
                "0",
                "TTL must be greater than 0 when the cache is enabled",
            ));
        }
        if self.ttl_seconds > MAX_CACHE_TTL_SECONDS {
            return Err(ConfigurationError::invalid_value(
                "cache.ttl_seconds",
                self.ttl_seconds.to_string(),
                format!("TTL must not exceed {MAX_CACHE_TTL_SECONDS} seconds"),
            ));
        }
        if let Some(redis) = &self.redis {
            if redis.url.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "cache.redis.url",
                    "redis cache configuration",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

/// Distributed lock timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Maximum time to wait for acquisition
    pub timeout_ms: u64,
    /// Lock expiry in the shared store
    pub expiry_ms: u64,
    /// Extend the expiry while the holder is still working
    pub auto_renew: bool,
    /// First retry delay while polling for a held lock
    pub retry_interval_ms: u64,
    /// Retry delay cap
    pub max_retry_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            expiry_ms: 30_000,
            auto_renew: true,
            retry_interval_ms: 50,
            max_retry_interval_ms: 500,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn to_lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: self.timeout(),
            expiry: self.expiry(),
            auto_renew: self.auto_renew,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_retry_interval: Duration::from_millis(self.max_retry_interval_ms),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "lock.timeout_ms",
                "0",
                "acquisition timeout must be greater than 0",
            ));
        }
        if self.expiry_ms < 3 {
            return Err(ConfigurationError::invalid_value(
                "lock.expiry_ms",
                self.expiry_ms.to_string(),
                "expiry must leave room for a renewal tick",
            ));
        }
        if self.expiry_ms > MAX_LOCK_EXPIRY_MS {
            return Err(ConfigurationError::invalid_value(
                "lock.expiry_ms",
                self.expiry_ms.to_string(),
                format!("expiry must not exceed {MAX_LOCK_EXPIRY_MS} ms"),
            ));
        }
        if self.retry_interval_ms == 0 || self.retry_interval_ms > self.max_retry_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "lock.retry_interval_ms",
                self.retry_interval_ms.to_string(),
                "must be greater than 0 and not exceed lock.max_retry_interval_ms",
            ));
        }
        Ok(())
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    /// Bound on queueing plus execution for one submitted call
    pub call_timeout_ms: u64,
    /// How long shutdown waits for in-flight calls
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            call_timeout_ms: 20_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl WorkerPoolConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker_pool.max_workers",
                "0",
                "pool needs at least one worker",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker_pool.call_timeout_ms",
                "0",
                "call timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker configuration with per-component overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When disabled, providers are called without breaker protection
    pub enabled: bool,

    /// Configuration for components without an override
    pub default_config: CircuitBreakerComponentConfig,

    /// Overrides keyed by component name (`plant_id`, `plantnet`, `cache`)
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.default_config
            .to_resilience_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("circuit_breakers.default_config: {e}")))?;

        for (component, config) in &self.component_configs {
            config.to_resilience_config().validate().map_err(|e| {
                ConfigurationError::validation_error(format!(
                    "circuit_breakers.component_configs.{component}: {e}"
                ))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub open_threshold: u32,
    pub cool_down_seconds: u64,
    pub close_threshold: u32,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            open_threshold: 5,
            cool_down_seconds: 60,
            close_threshold: 2,
        }
    }
}

impl CircuitBreakerComponentConfig {
    /// Convert to the resilience module's runtime format
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            open_threshold: self.open_threshold,
            cool_down: Duration::from_secs(self.cool_down_seconds),
            close_threshold: self.close_threshold,
        }
    }
}

/// Recognition provider endpoints, in priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub plant_id: ProviderConfig,
    pub plantnet: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            plant_id: ProviderConfig::with_base_url("https://plant.id/api/v3"),
            plantnet: ProviderConfig::with_base_url("https://my-api.plantnet.org"),
        }
    }
}

impl ProvidersConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.plant_id.validate("providers.plant_id")?;
        self.plantnet.validate("providers.plantnet")?;
        Ok(())
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Client-side HTTP timeout
    pub timeout_ms: u64,
    /// Merge weight applied to this provider's confidences
    pub weight: f64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout_ms", &self.timeout_ms)
            .field("weight", &self.weight)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: None,
            timeout_ms: 15_000,
            weight: 1.0,
        }
    }
}

impl ProviderConfig {
    fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        if !self.weight.is_finite() || self.weight <= 0.0 || self.weight > 1.0 {
            return Err(ConfigurationError::invalid_value(
                format!("{section}.weight"),
                self.weight.to_string(),
                "weight must be in (0.0, 1.0]",
            ));
        }
        if !self.enabled {
            return Ok(());
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                format!("{section}.base_url"),
                "enabled provider",
            ));
        }
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ConfigurationError::missing_required_field(
                format!("{section}.api_key"),
                "enabled provider",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{section}.timeout_ms"),
                "0",
                "timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Ranked species kept in a merged result
    pub max_results: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self { max_results: 10 }
    }
}

impl MergerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_results == 0 {
            return Err(ConfigurationError::invalid_value(
                "merger.max_results",
                "0",
                "at least one result must be kept",
            ));
        }
        Ok(())
    }
}
