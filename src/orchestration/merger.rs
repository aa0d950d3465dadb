//! Deterministic merging of provider results into one ranked list.
//!
//! Species are grouped by a normalized scientific name. Each group's
//! combined confidence is a weighted noisy-OR over the providers that
//! suggested it, `1 - Π(1 - w·c)`, so agreement lifts a species above what
//! either provider reported alone.
//!
//! Ranking, first difference wins:
//!
//! 1. more agreeing providers
//! 2. higher combined confidence
//! 3. higher raw confidence from any single provider
//! 4. earlier provider in priority order
//! 5. normalized name, ascending

use crate::config::VerdantConfig;
use crate::models::{
    Completeness, DiseaseFinding, MergedResult, Provenance, ProviderFailure, ProviderResult,
    RankedSpecies, ResultOrigin, SourceConfidence,
};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Normalize a scientific name for grouping.
///
/// Lowercases and collapses whitespace, and drops author citations: every
/// token after the genus that starts with an uppercase letter or `(` ends
/// the name (`Monstera deliciosa Liebm.` → `monstera deliciosa`).
pub fn normalize_species_name(name: &str) -> String {
    let mut tokens = name.split_whitespace();
    let Some(genus) = tokens.next() else {
        return String::new();
    };

    let mut normalized = genus.to_lowercase();
    for token in tokens {
        let first = token.chars().next().unwrap_or(' ');
        if first.is_uppercase() || first == '(' {
            break;
        }
        normalized.push(' ');
        normalized.push_str(&token.to_lowercase());
    }
    normalized
}

fn normalize_disease_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accumulates one species across providers
#[derive(Debug)]
struct SpeciesGroup {
    key: String,
    species_name: String,
    scientific_name: String,
    sources: Vec<SourceConfidence>,
    /// `Π(1 - w·c)` over the sources so far
    miss_product: f64,
    max_raw: f64,
    best_priority: usize,
}

impl SpeciesGroup {
    fn combined(&self) -> f64 {
        (1.0 - self.miss_product).clamp(0.0, 1.0)
    }

    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .sources
            .len()
            .cmp(&self.sources.len())
            .then_with(|| other.combined().total_cmp(&self.combined()))
            .then_with(|| other.max_raw.total_cmp(&self.max_raw))
            .then_with(|| self.best_priority.cmp(&other.best_priority))
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Merges per-provider results
#[derive(Debug, Clone)]
pub struct ResultMerger {
    api_version: String,
    max_results: usize,
    weights: HashMap<String, f64>,
}

impl ResultMerger {
    pub fn new(api_version: impl Into<String>, max_results: usize) -> Self {
        Self {
            api_version: api_version.into(),
            max_results: max_results.max(1),
            weights: HashMap::new(),
        }
    }

    pub fn from_config(config: &VerdantConfig) -> Self {
        Self::new(config.api_version.clone(), config.merger.max_results)
            .with_weight(
                crate::providers::plant_id::PROVIDER_NAME,
                config.providers.plant_id.weight,
            )
            .with_weight(
                crate::providers::plantnet::PROVIDER_NAME,
                config.providers.plantnet.weight,
            )
    }

    /// Scale a provider's confidences before combining (default 1.0)
    pub fn with_weight(mut self, provider: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(provider.into(), weight.clamp(0.0, 1.0));
        self
    }

    fn weight(&self, provider: &str) -> f64 {
        self.weights.get(provider).copied().unwrap_or(1.0)
    }

    /// Merge successful results (given in provider priority order) and
    /// record the failures alongside them.
    ///
    /// The result is `Partial` whenever any provider failed. With a single
    /// successful provider its list is passed through whole, in its own
    /// order; `max_results` only bounds ranked multi-provider output.
    pub fn merge(
        &self,
        results: &[ProviderResult],
        failures: Vec<ProviderFailure>,
        include_disease: bool,
    ) -> MergedResult {
        let candidates = match results {
            [single] => self.pass_through(single),
            _ => self.rank(results),
        };

        let diseases = if include_disease {
            self.merge_diseases(results)
        } else {
            Vec::new()
        };

        let completeness = if failures.is_empty() {
            Completeness::Full
        } else {
            Completeness::Partial
        };

        MergedResult {
            candidates,
            diseases,
            provenance: Provenance {
                contributors: results.iter().map(|r| r.provider.clone()).collect(),
                failures,
                completeness,
                origin: ResultOrigin::Fresh,
                cache_bypassed: false,
                api_version: self.api_version.clone(),
                generated_at: Utc::now(),
            },
        }
    }

    fn pass_through(&self, result: &ProviderResult) -> Vec<RankedSpecies> {
        result
            .species
            .iter()
            .map(|s| RankedSpecies {
                species_name: s.species_name.clone(),
                scientific_name: s.scientific_name.clone(),
                confidence: s.confidence,
                agreement: 1,
                sources: vec![SourceConfidence {
                    provider: result.provider.clone(),
                    confidence: s.confidence,
                }],
            })
            .collect()
    }

    fn rank(&self, results: &[ProviderResult]) -> Vec<RankedSpecies> {
        let mut groups: Vec<SpeciesGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (priority, result) in results.iter().enumerate() {
            let weight = self.weight(&result.provider);

            // One source per provider: its best suggestion for each species
            let mut best: Vec<(String, usize)> = Vec::new();
            for (position, candidate) in result.species.iter().enumerate() {
                let key = normalize_species_name(&candidate.scientific_name);
                if key.is_empty() || best.iter().any(|(k, _)| *k == key) {
                    continue;
                }
                best.push((key, position));
            }

            for (key, position) in best {
                let candidate = &result.species[position];
                let slot = *index.entry(key.clone()).or_insert_with(|| {
                    groups.push(SpeciesGroup {
                        key,
                        species_name: candidate.species_name.clone(),
                        scientific_name: candidate.scientific_name.clone(),
                        sources: Vec::new(),
                        miss_product: 1.0,
                        max_raw: 0.0,
                        best_priority: priority,
                    });
                    groups.len() - 1
                });

                let group = &mut groups[slot];
                group.sources.push(SourceConfidence {
                    provider: result.provider.clone(),
                    confidence: candidate.confidence,
                });
                group.miss_product *= 1.0 - weight * candidate.confidence;
                group.max_raw = group.max_raw.max(candidate.confidence);
                group.best_priority = group.best_priority.min(priority);
            }
        }

        groups.sort_by(SpeciesGroup::rank_cmp);
        groups.truncate(self.max_results);

        groups
            .into_iter()
            .map(|g| RankedSpecies {
                confidence: g.combined(),
                agreement: g.sources.len(),
                species_name: g.species_name,
                scientific_name: g.scientific_name,
                sources: g.sources,
            })
            .collect()
    }

    /// Union by normalized name, keeping the highest probability
    fn merge_diseases(&self, results: &[ProviderResult]) -> Vec<DiseaseFinding> {
        let mut merged: Vec<(String, DiseaseFinding)> = Vec::new();

        for finding in results.iter().filter_map(|r| r.diseases.as_ref()).flatten() {
            let key = normalize_disease_name(&finding.name);
            if key.is_empty() {
                continue;
            }
            match merged.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => {
                    existing.probability = existing.probability.max(finding.probability);
                }
                None => merged.push((key, finding.clone())),
            }
        }

        merged.sort_by(|(ka, a), (kb, b)| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| ka.cmp(kb))
        });
        merged.into_iter().map(|(_, finding)| finding).collect()
    }
}
