//! # Structured Logging Module
//!
//! Environment-aware structured logging for the identification core. Console
//! output by default; JSON lines when `VERDANT_LOG_FORMAT=json` so log
//! shippers can index the structured fields.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// `RUST_LOG` takes precedence over the environment's default level.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = use_json_format();

        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
        };

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter())
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter())
                .boxed()
        };

        // Embedding applications may have installed their own subscriber
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("VERDANT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "test" => "debug",
        "development" => "debug",
        "production" => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("VERDANT_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for identification requests
pub fn log_identification_operation(
    operation: &str,
    cache_key: &str,
    status: &str,
    duration: Option<Duration>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        cache_key = %cache_key,
        status = %status,
        duration_ms = duration.map(|d| d.as_millis() as u64),
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🌿 IDENTIFICATION_OPERATION"
    );
}

/// Log structured data for a single provider call
pub fn log_provider_call(
    provider: &str,
    cache_key: &str,
    status: &str,
    duration: Duration,
    candidates: Option<usize>,
    details: Option<&str>,
) {
    tracing::info!(
        provider = %provider,
        cache_key = %cache_key,
        status = %status,
        duration_ms = duration.as_millis() as u64,
        candidates = candidates,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔭 PROVIDER_CALL"
    );
}

/// Log structured data for distributed lock operations
pub fn log_lock_operation(
    operation: &str,
    lock_key: &str,
    owner: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        lock_key = %lock_key,
        owner = %owner,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔒 LOCK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_lock_operation("acquire", "lock:v1:abc:false", "host:1:uuid", "acquired", None);
    }
}
