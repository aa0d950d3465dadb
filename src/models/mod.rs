//! # Identification Data Model
//!
//! Value types exchanged between the orchestrator, the provider clients and
//! the merger. Requests are immutable once built; provider results are owned
//! by the call that produced them until handed to the merger.

pub mod request;
pub mod result;

pub use request::{ContentHash, IdentificationRequest, ImagePayload};
pub use result::{
    CacheEntry, Completeness, DiseaseFinding, FailureKind, MergedResult, Provenance,
    ProviderFailure, ProviderResult, RankedSpecies, ResultOrigin, SourceConfidence,
    SpeciesCandidate,
};
