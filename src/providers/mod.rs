//! # Recognition Providers
//!
//! Clients for the external plant recognition services. Each client turns
//! one [`IdentificationRequest`] into one normalized [`ProviderResult`] or a
//! classified [`ProviderError`]. Clients never retry; the orchestrator's
//! circuit breakers and the caller own retry policy.

pub mod http;
pub mod plant_id;
pub mod plantnet;

#[cfg(test)]
pub(crate) mod test_server;

use crate::models::{FailureKind, IdentificationRequest, ProviderResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use plant_id::PlantIdClient;
pub use plantnet::PlantNetClient;

/// Classified provider call failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider rate limit reached")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider unreachable: {0}")]
    Unreachable(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Timeout => FailureKind::Timeout,
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::InvalidResponse(_) => FailureKind::InvalidResponse,
            ProviderError::Unreachable(_) => FailureKind::Unreachable,
        }
    }
}

/// A plant recognition service
#[async_trait]
pub trait RecognitionProvider: Send + Sync + std::fmt::Debug {
    /// Stable identifier; names the breaker and appears in provenance
    fn name(&self) -> &str;

    async fn identify(&self, request: &IdentificationRequest) -> Result<ProviderResult, ProviderError>;
}

pub type SharedProvider = Arc<dyn RecognitionProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ProviderError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            ProviderError::InvalidResponse("bad json".into()).kind(),
            FailureKind::InvalidResponse
        );
        assert_eq!(
            ProviderError::Unreachable("refused".into()).kind(),
            FailureKind::Unreachable
        );
    }
}
