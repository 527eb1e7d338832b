//! In-memory artifact store.

use super::ArtifactStore;
use crate::core::{content_key, ArtifactRef};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
struct StoredObject {
    bytes: Arc<[u8]>,
    refs: u64,
}

/// In-memory content-addressed store.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: DashMap<String, StoredObject>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total size of stored objects in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.bytes.len() as u64).sum()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, bytes: &[u8], produced_by: &str, name: &str) -> Result<ArtifactRef, StoreError> {
        let artifact = ArtifactRef::for_content(bytes, produced_by, name);
        match self.objects.entry(artifact.key.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().refs += 1;
                trace!(key = %artifact.key, refs = existing.get().refs, "Artifact already stored");
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredObject {
                    bytes: Arc::from(bytes),
                    refs: 1,
                });
                trace!(key = %artifact.key, size = artifact.size, "Artifact stored");
            }
        }
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let bytes = self
            .objects
            .get(&artifact.key)
            .map(|o| Arc::clone(&o.bytes))
            .ok_or_else(|| StoreError::NotFound {
                key: artifact.key.clone(),
            })?;
        let actual = content_key(&bytes);
        if actual != artifact.key {
            return Err(StoreError::Corrupt {
                key: artifact.key.clone(),
                actual,
            });
        }
        Ok(bytes.to_vec())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.contains_key(key))
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn ref_count(&self, key: &str) -> u64 {
        self.objects.get(key).map_or(0, |o| o.refs)
    }
}
