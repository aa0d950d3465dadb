//! # Identification Orchestration
//!
//! Request handling on top of the cache, lock, breaker and pool layers.
//!
//! ## Core Components
//!
//! - **IdentificationOrchestrator**: triple-check cache protocol around the
//!   provider fan-out
//! - **ResultMerger**: ranks species across providers by agreement and
//!   combined confidence
//! - **IdentificationSystem**: builds everything from configuration and
//!   owns shutdown

pub mod bootstrap;
pub mod merger;
pub mod orchestrator;

pub use bootstrap::{IdentificationSystem, SystemStatus};
pub use merger::{normalize_species_name, ResultMerger};
pub use orchestrator::{IdentificationOrchestrator, ProviderHealth};
