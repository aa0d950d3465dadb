//! Plant.id client.
//!
//! `POST {base_url}/identification?details=common_names` with a JSON body
//! carrying the image as a base64 data URI. The `Api-Key` header
//! authenticates. Health assessment is requested only when the caller asked
//! for disease detection.

use super::http::{build_client, classify_status, classify_transport_error, decode_json};
use super::{ProviderError, RecognitionProvider};
use crate::config::ProviderConfig;
use crate::models::{DiseaseFinding, IdentificationRequest, ProviderResult, SpeciesCandidate};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PROVIDER_NAME: &str = "plant_id";

#[derive(Debug, Serialize)]
struct IdentificationBody {
    images: Vec<String>,
    similar_images: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct IdentificationResponse {
    result: Option<ResultSection>,
}

#[derive(Debug, Deserialize)]
struct ResultSection {
    classification: Option<Suggestions>,
    disease: Option<Suggestions>,
}

#[derive(Debug, Deserialize)]
struct Suggestions {
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    name: String,
    probability: f64,
    #[serde(default)]
    details: Option<SuggestionDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct SuggestionDetails {
    #[serde(default)]
    common_names: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct PlantIdClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for PlantIdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantIdClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PlantIdClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: build_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
        })
    }

    fn body_for(request: &IdentificationRequest) -> IdentificationBody {
        let image = request.image();
        IdentificationBody {
            images: vec![format!(
                "data:{};base64,{}",
                image.mime_type(),
                STANDARD.encode(image.bytes())
            )],
            similar_images: false,
            health: request.include_disease_detection().then_some("all"),
        }
    }

    fn into_result(response: IdentificationResponse, include_disease: bool) -> ProviderResult {
        let Some(result) = response.result else {
            return ProviderResult::new(PROVIDER_NAME, Vec::new(), include_disease.then(Vec::new));
        };

        let species = result
            .classification
            .map(|c| c.suggestions)
            .unwrap_or_default()
            .into_iter()
            .map(|s| {
                let common = s
                    .details
                    .and_then(|d| d.common_names)
                    .and_then(|names| names.into_iter().find(|n| !n.trim().is_empty()));
                let display = common.unwrap_or_else(|| s.name.clone());
                SpeciesCandidate::new(display, s.name, s.probability)
            })
            .collect();

        let diseases = include_disease.then(|| {
            result
                .disease
                .map(|d| d.suggestions)
                .unwrap_or_default()
                .into_iter()
                .map(|s| DiseaseFinding::new(s.name, s.probability))
                .collect()
        });

        ProviderResult::new(PROVIDER_NAME, species, diseases)
    }
}

#[async_trait]
impl RecognitionProvider for PlantIdClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn identify(&self, request: &IdentificationRequest) -> Result<ProviderResult, ProviderError> {
        let url = format!("{}/identification", self.base_url);
        debug!(provider = PROVIDER_NAME, content_hash = %request.content_hash(), "Submitting identification");

        let response = self
            .http_client
            .post(url)
            .query(&[("details", "common_names")])
            .header("Api-Key", &self.api_key)
            .json(&Self::body_for(request))
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }

        let body: IdentificationResponse = decode_json(response).await?;
        Ok(Self::into_result(body, request.include_disease_detection()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentHash, ImagePayload};
    use crate::providers::test_server::serve_once_capturing;

    const RESPONSE: &str = r#"{
        "access_token": "abc",
        "result": {
            "is_plant": {"probability": 0.99, "binary": true},
            "classification": {
                "suggestions": [
                    {"id": "1", "name": "Monstera deliciosa", "probability": 0.92,
                     "details": {"common_names": ["Swiss cheese plant", "Split-leaf philodendron"]}},
                    {"id": "2", "name": "Philodendron bipinnatifidum", "probability": 0.05,
                     "details": {"common_names": null}}
                ]
            },
            "disease": {
                "suggestions": [
                    {"id": "d1", "name": "water deficiency", "probability": 0.31}
                ]
            }
        }
    }"#;

    fn request(disease: bool) -> IdentificationRequest {
        IdentificationRequest::with_content_hash(
            ContentHash::new("H1"),
            ImagePayload::new(b"leaf".to_vec(), "image/jpeg"),
            disease,
        )
    }

    fn client(base_url: &str) -> PlantIdClient {
        PlantIdClient::new(&ProviderConfig {
            enabled: true,
            base_url: base_url.to_string(),
            api_key: Some("test-key".to_string()),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parses_suggestions() {
        let parsed: IdentificationResponse = serde_json::from_str(RESPONSE).unwrap();
        let result = PlantIdClient::into_result(parsed, true);

        assert_eq!(result.provider, "plant_id");
        assert_eq!(result.species.len(), 2);
        assert_eq!(result.species[0].species_name, "Swiss cheese plant");
        assert_eq!(result.species[0].scientific_name, "Monstera deliciosa");
        assert_eq!(result.species[1].species_name, "Philodendron bipinnatifidum");
        assert_eq!(
            result.diseases,
            Some(vec![DiseaseFinding::new("water deficiency", 0.31)])
        );
    }

    #[test]
    fn test_disease_findings_dropped_when_not_requested() {
        let parsed: IdentificationResponse = serde_json::from_str(RESPONSE).unwrap();
        assert!(PlantIdClient::into_result(parsed, false).diseases.is_none());
    }

    #[test]
    fn test_body_embeds_data_uri() {
        let body = serde_json::to_value(PlantIdClient::body_for(&request(false))).unwrap();
        assert_eq!(body["images"][0], "data:image/jpeg;base64,bGVhZg==");
        assert!(body.get("health").is_none());

        let body = serde_json::to_value(PlantIdClient::body_for(&request(true))).unwrap();
        assert_eq!(body["health"], "all");
    }

    #[tokio::test]
    async fn test_identify_over_http() {
        let (base_url, captured) = serve_once_capturing(201, &[("Content-Type", "application/json")], RESPONSE).await;

        let result = client(&base_url).identify(&request(false)).await.unwrap();
        assert_eq!(result.species[0].scientific_name, "Monstera deliciosa");

        let request = captured.await.unwrap();
        assert!(request.request_line().starts_with("POST /identification?details=common_names"));
        assert_eq!(request.header("api-key"), Some("test-key"));
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let (base_url, _captured) = serve_once_capturing(429, &[], "").await;
        let error = client(&base_url).identify(&request(false)).await.unwrap_err();
        assert_eq!(error, ProviderError::RateLimited { retry_after: None });
    }
}
