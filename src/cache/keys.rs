//! Cache and lock key derivation

use crate::models::IdentificationRequest;
use std::fmt;

const LOCK_PREFIX: &str = "lock";

/// `{api_version}:{content_hash}:{disease_flag}`
///
/// The provider contract version is part of the key, so bumping it orphans
/// every entry written under the previous contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(api_version: &str, request: &IdentificationRequest) -> Self {
        Self(format!(
            "{}:{}:{}",
            api_version,
            request.content_hash(),
            request.include_disease_detection()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lock guarding recomputation of this entry
    pub fn lock_key(&self) -> LockKey {
        LockKey(format!("{}:{}", LOCK_PREFIX, self.0))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock name, `lock:{cache_key}`; always in 1:1 correspondence with a `CacheKey`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Name a lock that is not tied to a cache entry
    pub fn named(name: impl AsRef<str>) -> Self {
        Self(format!("{}:{}", LOCK_PREFIX, name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentHash, ImagePayload};

    fn request(hash: &str, disease: bool) -> IdentificationRequest {
        IdentificationRequest::with_content_hash(
            ContentHash::new(hash),
            ImagePayload::new(vec![0u8; 4], "image/jpeg"),
            disease,
        )
    }

    #[test]
    fn test_cache_key_format() {
        let key = CacheKey::for_request("v1", &request("H1", false));
        assert_eq!(key.as_str(), "v1:H1:false");

        let key = CacheKey::for_request("v2", &request("H1", true));
        assert_eq!(key.as_str(), "v2:H1:true");
    }

    #[test]
    fn test_lock_key_derives_from_cache_key() {
        let key = CacheKey::for_request("v1", &request("H1", false));
        assert_eq!(key.lock_key().as_str(), "lock:v1:H1:false");
        assert_eq!(LockKey::named("maintenance").as_str(), "lock:maintenance");
    }
}
