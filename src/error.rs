//! Error types for the identification core.
//!

use crate::coordination::LockError;
use crate::models::ProviderFailure;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced to callers of the orchestrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentificationError {
    /// Shared store unreachable. Only surfaced by operations that cannot
    /// degrade (invalidation); `identify` bypasses the cache instead.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Lock {key} not acquired within {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    /// Every provider was rejected by its circuit breaker without network contact
    #[error("Provider unavailable: {provider} ({reason})")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Aggregation failed: {}", summarize_failures(.failures))]
    AggregationFailed { failures: Vec<ProviderFailure> },

    #[error("Identification cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

impl IdentificationError {
    /// Whether the caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IdentificationError::LockTimeout { .. }
                | IdentificationError::ProviderUnavailable { .. }
                | IdentificationError::AggregationFailed { .. }
                | IdentificationError::CacheUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for IdentificationError {
    fn from(error: serde_json::Error) -> Self {
        IdentificationError::SerializationError(error.to_string())
    }
}

impl From<LockError> for IdentificationError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Timeout { key, waited } => IdentificationError::LockTimeout { key, waited },
            LockError::Store(e) => IdentificationError::CacheUnavailable(e.to_string()),
        }
    }
}

impl From<crate::config::ConfigurationError> for IdentificationError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        IdentificationError::ConfigurationError(error.to_string())
    }
}

pub type IdentificationResult<T> = std::result::Result<T, IdentificationError>;
