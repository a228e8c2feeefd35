//! Cache key derivation

use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::{CacheParams, DownloadRequest};

/// Separator written after every field so that ("ab", "c") and ("a", "bc") differ
const FIELD_SEPARATOR: u8 = 0x1f;

/// Hex SHA-256 digest identifying one exact fetch parameter tuple
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest over (identifier, namespace, translation, episode, quality), in that order
    pub fn compute(params: &CacheParams) -> Self {
        let episode = params.episode.to_string();
        let fields: [&str; 5] = [
            &params.identifier,
            params.namespace.as_str(),
            &params.translation_id,
            &episode,
            params.quality.as_str(),
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update([FIELD_SEPARATOR]);
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Key for the fetch part of a request
    pub fn for_request(request: &DownloadRequest) -> Self {
        Self::compute(&request.cache_params())
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
