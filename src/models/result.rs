//! Provider outputs, merged results and their provenance.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One species suggestion, normalized across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesCandidate {
    /// Display name (common name when the provider has one)
    pub species_name: String,
    pub scientific_name: String,
    /// Confidence in `[0.0, 1.0]`
    pub confidence: f64,
}

impl SpeciesCandidate {
    pub fn new(
        species_name: impl Into<String>,
        scientific_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            species_name: species_name.into(),
            scientific_name: scientific_name.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseFinding {
    pub name: String,
    pub probability: f64,
}

impl DiseaseFinding {
    pub fn new(name: impl Into<String>, probability: f64) -> Self {
        Self {
            name: name.into(),
            probability,
        }
    }
}

/// Normalized output of one provider call.
///
/// Construction drops candidates with non-finite confidence, clamps the rest
/// into `[0.0, 1.0]` and orders them by descending confidence (stable, so the
/// provider's own order breaks ties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    pub species: Vec<SpeciesCandidate>,
    pub diseases: Option<Vec<DiseaseFinding>>,
}

impl ProviderResult {
    pub fn new(
        provider: impl Into<String>,
        species: Vec<SpeciesCandidate>,
        diseases: Option<Vec<DiseaseFinding>>,
    ) -> Self {
        let mut species: Vec<SpeciesCandidate> = species
            .into_iter()
            .filter(|s| s.confidence.is_finite() && !s.scientific_name.trim().is_empty())
            .map(|mut s| {
                s.confidence = s.confidence.clamp(0.0, 1.0);
                s
            })
            .collect();
        species.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let diseases = diseases.map(|findings| {
            let mut findings: Vec<DiseaseFinding> = findings
                .into_iter()
                .filter(|d| d.probability.is_finite())
                .map(|mut d| {
                    d.probability = d.probability.clamp(0.0, 1.0);
                    d
                })
                .collect();
            findings.sort_by(|a, b| b.probability.total_cmp(&a.probability));
            findings
        });

        Self {
            provider: provider.into(),
            species,
            diseases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

/// Why a provider did not contribute to a merged result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by the circuit breaker without network contact
    CircuitOpen,
    Timeout,
    RateLimited,
    InvalidResponse,
    Unreachable,
    /// Abandoned because the worker pool shut down
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// Every configured provider contributed
    Full,
    /// At least one provider failed; the list comes from the survivors
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Fresh,
    Cache,
}

/// Per-provider confidence behind a ranked species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfidence {
    pub provider: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSpecies {
    pub species_name: String,
    pub scientific_name: String,
    /// Combined confidence after merging
    pub confidence: f64,
    /// Number of providers that suggested this species
    pub agreement: usize,
    pub sources: Vec<SourceConfidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Providers whose results were merged, in priority order
    pub contributors: Vec<String>,
    pub failures: Vec<ProviderFailure>,
    pub completeness: Completeness,
    pub origin: ResultOrigin,
    /// The shared store was unreachable and the result was neither
    /// read from nor written to the cache
    pub cache_bypassed: bool,
    pub api_version: String,
    pub generated_at: DateTime<Utc>,
}

/// Final ranked result handed back to callers and persisted in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub candidates: Vec<RankedSpecies>,
    pub diseases: Vec<DiseaseFinding>,
    pub provenance: Provenance,
}

impl MergedResult {
    pub fn top(&self) -> Option<&RankedSpecies> {
        self.candidates.first()
    }

    pub fn is_partial(&self) -> bool {
        self.provenance.completeness == Completeness::Partial
    }

    pub fn is_from_cache(&self) -> bool {
        self.provenance.origin == ResultOrigin::Cache
    }
}

/// Value persisted under a cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: MergedResult,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(result: MergedResult, ttl_seconds: u64) -> Self {
        Self {
            result,
            cached_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// Deadline embedded in the entry.
    ///
    /// `None` when `cached_at + ttl_seconds` is outside the representable
    /// range; such an entry cannot be trusted and reads as undecodable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.ttl_seconds).ok()?;
        let ttl = TimeDelta::try_seconds(seconds)?;
        self.cached_at.checked_add_signed(ttl)
    }

    /// Stores without native TTL support may hand back stale entries;
    /// readers check the embedded deadline as well.
    ///
    /// `None` when the deadline cannot be computed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> Option<bool> {
        self.expires_at().map(|deadline| deadline <= now)
    }
}
