//! Pl@ntNet client.
//!
//! `POST {base_url}/v2/identify/all?api-key=...` with a multipart body
//! (`images` file part, `organs=auto`). Pl@ntNet answers 404 when nothing
//! matched; that is an empty result, not a failure. Pl@ntNet has no disease
//! detection, so `diseases` is always empty when requested.

use super::http::{build_client, classify_status, classify_transport_error, decode_json};
use super::{ProviderError, RecognitionProvider};
use crate::config::ProviderConfig;
use crate::models::{IdentificationRequest, ProviderResult, SpeciesCandidate};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

pub const PROVIDER_NAME: &str = "plantnet";

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    results: Vec<IdentifyResult>,
}

#[derive(Debug, Deserialize)]
struct IdentifyResult {
    score: f64,
    species: Species,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Species {
    scientific_name_without_author: String,
    #[serde(default)]
    common_names: Vec<String>,
}

#[derive(Clone)]
pub struct PlantNetClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for PlantNetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantNetClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PlantNetClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: build_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
        })
    }

    fn form_for(request: &IdentificationRequest) -> Result<Form, ProviderError> {
        let image = request.image();
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name())
            .mime_str(image.mime_type())
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid image MIME type: {e}")))?;

        Ok(Form::new().part("images", part).text("organs", "auto"))
    }

    fn into_result(response: IdentifyResponse, include_disease: bool) -> ProviderResult {
        let species = response
            .results
            .into_iter()
            .map(|r| {
                let scientific = r.species.scientific_name_without_author;
                let display = r
                    .species
                    .common_names
                    .into_iter()
                    .find(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| scientific.clone());
                SpeciesCandidate::new(display, scientific, r.score)
            })
            .collect();

        ProviderResult::new(PROVIDER_NAME, species, include_disease.then(Vec::new))
    }
}

#[async_trait]
impl RecognitionProvider for PlantNetClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn identify(&self, request: &IdentificationRequest) -> Result<ProviderResult, ProviderError> {
        let url = format!("{}/v2/identify/all", self.base_url);
        debug!(provider = PROVIDER_NAME, content_hash = %request.content_hash(), "Submitting identification");

        let response = self
            .http_client
            .post(url)
            .query(&[("api-key", self.api_key.as_str())])
            .multipart(Self::form_for(request)?)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let include_disease = request.include_disease_detection();

        if response.status() == StatusCode::NOT_FOUND {
            debug!(provider = PROVIDER_NAME, "No species matched");
            return Ok(Self::into_result(
                IdentifyResponse { results: Vec::new() },
                include_disease,
            ));
        }

        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }

        let body: IdentifyResponse = decode_json(response).await?;
        Ok(Self::into_result(body, include_disease))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentHash, ImagePayload};
    use crate::providers::test_server::serve_once_capturing;

    const RESPONSE: &str = r#"{
        "query": {"project": "all", "organs": ["auto"]},
        "bestMatch": "Monstera deliciosa Liebm.",
        "results": [
            {"score": 0.81,
             "species": {"scientificNameWithoutAuthor": "Monstera deliciosa",
                         "scientificName": "Monstera deliciosa Liebm.",
                         "commonNames": ["Swiss cheese plant"]}},
            {"score": 0.07,
             "species": {"scientificNameWithoutAuthor": "Monstera adansonii",
                         "scientificName": "Monstera adansonii Schott",
                         "commonNames": []}}
        ],
        "remainingIdentificationRequests": 498
    }"#;

    fn request() -> IdentificationRequest {
        IdentificationRequest::with_content_hash(
            ContentHash::new("H1"),
            ImagePayload::new(b"leaf".to_vec(), "image/png"),
            false,
        )
    }

    fn client(base_url: &str) -> PlantNetClient {
        PlantNetClient::new(&ProviderConfig {
            enabled: true,
            base_url: base_url.to_string(),
            api_key: Some("net-key".to_string()),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parses_results() {
        let parsed: IdentifyResponse = serde_json::from_str(RESPONSE).unwrap();
        let result = PlantNetClient::into_result(parsed, false);

        assert_eq!(result.provider, "plantnet");
        assert_eq!(result.species[0].species_name, "Swiss cheese plant");
        assert_eq!(result.species[0].scientific_name, "Monstera deliciosa");
        assert_eq!(result.species[1].species_name, "Monstera adansonii");
        assert!(result.diseases.is_none());
    }

    #[tokio::test]
    async fn test_identify_sends_multipart_with_key() {
        let (base_url, captured) = serve_once_capturing(200, &[("Content-Type", "application/json")], RESPONSE).await;

        let result = client(&base_url).identify(&request()).await.unwrap();
        assert_eq!(result.species.len(), 2);

        let request = captured.await.unwrap();
        assert!(request.request_line().starts_with("POST /v2/identify/all?api-key=net-key"));
        assert!(request
            .header("content-type")
            .is_some_and(|v| v.starts_with("multipart/form-data")));
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains("name=\"organs\""));
        assert!(body.contains("filename=\"image.png\""));
    }

    #[tokio::test]
    async fn test_not_found_is_empty_result() {
        let (base_url, _captured) =
            serve_once_capturing(404, &[], r#"{"statusCode":404,"error":"Not Found","message":"Species not found"}"#).await;

        let result = client(&base_url).identify(&request()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let (base_url, _captured) = serve_once_capturing(502, &[], "bad gateway").await;
        let error = client(&base_url).identify(&request()).await.unwrap_err();
        assert!(matches!(error, ProviderError::Unreachable(_)));
    }
}
