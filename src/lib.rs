#![allow(clippy::doc_markdown)] // Allow technical terms like PlantNet, Dragonfly in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Verdant Core
//!
//! Plant identification aggregation core.
//!
//! ## Overview
//!
//! A request carries one image. The core asks every configured recognition
//! service about it in parallel, merges their species suggestions into one
//! ranked list and caches that list under a key derived from the image
//! content, so the same photo is never sent to the paid services twice.
//!
//! ## Architecture
//!
//! ```text
//! identify(request)
//!   ├── cache read                  (fast path)
//!   ├── distributed lock            (one fan-out per key across the fleet)
//!   ├── cache re-check              (another holder may have filled it)
//!   ├── worker pool fan-out         (one task per provider)
//!   │     └── circuit breaker → provider client
//!   ├── result merger
//!   └── cache write → lock release
//! ```
//!
//! ## Module Organization
//!
//! - [`models`] - Requests, provider results and merged results
//! - [`cache`] - Store trait, Redis/memory/NoOp backends, cache keys
//! - [`coordination`] - Distributed lock with owner tokens and renewal
//! - [`resilience`] - Circuit breakers and their metrics
//! - [`executor`] - Bounded worker pool for provider calls
//! - [`providers`] - Plant.id and PlantNet clients
//! - [`orchestration`] - Orchestrator, merger and system bootstrap
//! - [`config`] - TOML plus environment configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Caller-facing errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use verdant_core::config::ConfigManager;
//! use verdant_core::models::{IdentificationRequest, ImagePayload};
//! use verdant_core::orchestration::IdentificationSystem;
//!
//! # async fn example(photo: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! verdant_core::logging::init_structured_logging();
//!
//! let system = IdentificationSystem::bootstrap(ConfigManager::load()?).await?;
//! let request = IdentificationRequest::new(ImagePayload::new(photo, "image/jpeg"), true);
//!
//! let result = system.orchestrator().identify(request).await?;
//! if let Some(top) = result.top() {
//!     println!("{} ({:.0}%)", top.species_name, top.confidence * 100.0);
//! }
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod coordination;
pub mod error;
pub mod executor;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod providers;
pub mod resilience;

pub use config::{ConfigManager, VerdantConfig};
pub use error::{IdentificationError, IdentificationResult};
pub use models::{
    Completeness, IdentificationRequest, ImagePayload, MergedResult, ProviderFailure,
    RankedSpecies, ResultOrigin,
};
pub use orchestration::{IdentificationOrchestrator, IdentificationSystem, ResultMerger};
pub use providers::{RecognitionProvider, SharedProvider};
