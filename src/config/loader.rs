//! Configuration Loader
//!
//! Layers configuration sources with the `config` crate:
//!
//! 1. Section defaults (`#[serde(default)]` on every struct)
//! 2. An optional TOML file (`VERDANT_CONFIG_PATH`, or an explicit path)
//! 3. An optional environment overlay next to it (`verdant.production.toml`)
//! 4. `VERDANT__SECTION__FIELD` environment variables
//!
//! The merged result is validated before a manager is handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::VerdantConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "VERDANT_CONFIG_PATH";

const ENV_PREFIX: &str = "VERDANT";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: VerdantConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// Reads the file named by `VERDANT_CONFIG_PATH` when set; otherwise
    /// only defaults and environment variables apply.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let path = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_with_env(path, &Self::detect_environment(), None)
    }

    /// Load configuration from an explicit file
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env(
            Some(path.as_ref().to_path_buf()),
            &Self::detect_environment(),
            None,
        )
    }

    /// Load with an explicit environment name and, optionally, an explicit
    /// set of `VERDANT__*` overrides in place of the process environment.
    ///
    /// Useful for tests that must not mutate global environment variables.
    pub fn load_with_env(
        path: Option<PathBuf>,
        environment: &str,
        env_overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Config::builder();

        if let Some(path) = &path {
            if !path.exists() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
            debug!(path = %path.display(), environment = environment, "Loading configuration file");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));

            if let Some(overlay) = Self::environment_overlay_path(path, environment) {
                debug!(path = %overlay.display(), "Applying environment configuration overlay");
                builder = builder.add_source(
                    File::from(overlay.as_path())
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env_overrides),
        );

        let config: VerdantConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                let source_name = path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "environment".to_string());
                ConfigurationError::load_error(source_name, e)
            })?;

        Self::from_config_with_env(config, environment, path)
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: VerdantConfig) -> ConfigResult<Arc<ConfigManager>> {
        Self::from_config_with_env(config, &Self::detect_environment(), None)
    }

    fn from_config_with_env(
        config: VerdantConfig,
        environment: &str,
        source_path: Option<PathBuf>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        info!(
            environment = environment,
            source = %source_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            cache_backend = %config.cache.backend,
            max_workers = config.worker_pool.max_workers,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source_path,
        }))
    }

    pub fn config(&self) -> &VerdantConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Configuration as JSON with secrets masked, for logging and the
    /// validator binary
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn sanitize_config_for_logging(config: &VerdantConfig) -> serde_json::Value {
        let mut sanitized = config.clone();
        for provider in [
            &mut sanitized.providers.plant_id,
            &mut sanitized.providers.plantnet,
        ] {
            if provider.api_key.is_some() {
                provider.api_key = Some("***REDACTED***".to_string());
            }
        }
        if let Some(redis) = sanitized.cache.redis.as_mut() {
            redis.url = redact_credentials(&redis.url);
        }

        serde_json::to_value(&sanitized).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("failed to serialize configuration: {e}") })
        })
    }

    /// `verdant.toml` + `production` -> `verdant.production.toml`, if present
    fn environment_overlay_path(path: &Path, environment: &str) -> Option<PathBuf> {
        let stem = path.file_stem()?.to_str()?;
        let overlay = path.with_file_name(format!("{stem}.{environment}.toml"));
        overlay.exists().then_some(overlay)
    }

    /// Detect the runtime environment
    pub fn detect_environment() -> String {
        env::var("VERDANT_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

/// Mask `user:password@` in connection URLs
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
