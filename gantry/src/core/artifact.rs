//! Content-addressed artifact references.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

/// Prefix of every content key.
pub const KEY_PREFIX: &str = "sha256:";

/// Computes the content key for a payload.
///
/// The key is stable for identical content: `sha256:` followed by the
/// lowercase hex digest.
#[must_use]
pub fn content_key(bytes: &[u8]) -> String {
    format!("{KEY_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
}

/// A reference to an artifact stored by content hash.
///
/// Equality and hashing consider only `key`: two jobs producing the same
/// bytes hold interchangeable references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Content hash of the payload.
    pub key: String,
    /// The job that produced this reference.
    pub produced_by: String,
    /// The output name the producer declared.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
}

impl ArtifactRef {
    /// Creates a reference for a payload.
    #[must_use]
    pub fn for_content(bytes: &[u8], produced_by: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: content_key(bytes),
            produced_by: produced_by.into(),
            name: name.into(),
            size: bytes.len() as u64,
        }
    }

    /// Returns the hex digest without the algorithm prefix.
    #[must_use]
    pub fn digest(&self) -> &str {
        self.key.strip_prefix(KEY_PREFIX).unwrap_or(&self.key)
    }
}

impl PartialEq for ArtifactRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ArtifactRef {}

impl Hash for ArtifactRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
