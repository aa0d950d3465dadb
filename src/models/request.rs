//! Identification request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Deterministic digest of the image bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap a digest computed by the caller
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// SHA-256 hex digest of the given bytes
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image bytes shared between the request and every provider call.
///
/// Cloning is cheap: the bytes live behind an `Arc`.
#[derive(Clone)]
pub struct ImagePayload {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File name used for multipart uploads, derived from the MIME type
    pub fn file_name(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "image.png",
            "image/webp" => "image.webp",
            "image/heic" => "image.heic",
            _ => "image.jpg",
        }
    }
}

/// A single identification request.
///
/// Built by the caller and never mutated afterwards; every accessor borrows.
#[derive(Debug, Clone)]
pub struct IdentificationRequest {
    content_hash: ContentHash,
    include_disease_detection: bool,
    requested_at: DateTime<Utc>,
    image: ImagePayload,
}

impl IdentificationRequest {
    /// Build a request, hashing the image bytes
    pub fn new(image: ImagePayload, include_disease_detection: bool) -> Self {
        let content_hash = ContentHash::of(image.bytes());
        Self::with_content_hash(content_hash, image, include_disease_detection)
    }

    /// Build a request for which the caller already holds the content hash
    pub fn with_content_hash(
        content_hash: ContentHash,
        image: ImagePayload,
        include_disease_detection: bool,
    ) -> Self {
        Self {
            content_hash,
            include_disease_detection,
            requested_at: Utc::now(),
            image,
        }
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn include_disease_detection(&self) -> bool {
        self.include_disease_detection
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn image(&self) -> &ImagePayload {
        &self.image
    }
}
