//! Content-addressed artifact storage.
//!
//! Objects are keyed by the SHA-256 of their bytes, so storing identical
//! content twice keeps one object and bumps its reference count. Two
//! backends are provided: [`InMemoryArtifactStore`] for tests and embedded
//! use, and [`FsArtifactStore`] which survives process restarts.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::core::ArtifactRef;
use crate::errors::StoreError;
use async_trait::async_trait;

/// Backend for content-addressed artifact storage.
///
/// `put` is idempotent: concurrent puts of the same bytes leave one stored
/// object. `get` either returns the exact bytes that were stored or an error.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Stores `bytes` and returns a reference to them.
    async fn put(&self, bytes: &[u8], produced_by: &str, name: &str) -> Result<ArtifactRef, StoreError>;

    /// Returns the bytes for a reference.
    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError>;

    /// Returns true if an object is stored under `key`.
    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns the number of distinct stored objects.
    fn len(&self) -> usize;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many puts have referenced `key`.
    fn ref_count(&self, key: &str) -> u64;
}
