use proptest::prelude::*;
use verdant_core::models::{ProviderResult, SpeciesCandidate};

/// Small name pool so independent providers often agree
const SPECIES: &[&str] = &[
    "Monstera deliciosa",
    "Ficus lyrata",
    "Ficus elastica",
    "Philodendron hederaceum",
    "Epipremnum aureum",
    "Sansevieria trifasciata",
    "Calathea orbifolia",
];

/// Species name, sometimes with an author citation or stray whitespace
pub fn scientific_name_strategy() -> impl Strategy<Value = String> {
    (0..SPECIES.len(), 0u8..3).prop_map(|(index, variant)| {
        let name = SPECIES[index];
        match variant {
            0 => name.to_string(),
            1 => format!("{name} L."),
            _ => format!(" {} ", name.replace(' ', "  ")),
        }
    })
}

pub fn candidate_strategy() -> impl Strategy<Value = SpeciesCandidate> {
    (scientific_name_strategy(), 0.0f64..=1.0)
        .prop_map(|(name, confidence)| SpeciesCandidate::new(name.clone(), name, confidence))
}

pub fn provider_result_strategy(provider: &'static str) -> impl Strategy<Value = ProviderResult> {
    prop::collection::vec(candidate_strategy(), 0..8)
        .prop_map(move |species| ProviderResult::new(provider, species, None))
}

/// One or two provider results in priority order
pub fn provider_results_strategy() -> impl Strategy<Value = Vec<ProviderResult>> {
    prop_oneof![
        provider_result_strategy("plant_id").prop_map(|r| vec![r]),
        (
            provider_result_strategy("plant_id"),
            provider_result_strategy("plantnet")
        )
            .prop_map(|(a, b)| vec![a, b]),
    ]
}
