//! Artifact store wrapper that injects transient failures.

use crate::artifacts::ArtifactStore;
use crate::core::ArtifactRef;
use crate::errors::StoreError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Fails the first `failures` store calls with [`StoreError::Transient`],
/// then delegates to the wrapped store.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn ArtifactStore>,
    remaining: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ArtifactStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Returns how many `put`/`get` calls were made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Transient("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    async fn put(&self, bytes: &[u8], produced_by: &str, name: &str) -> Result<ArtifactRef, StoreError> {
        self.maybe_fail()?;
        self.inner.put(bytes, produced_by, name).await
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        self.maybe_fail()?;
        self.inner.get(artifact).await
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.contains(key).await
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn ref_count(&self, key: &str) -> u64 {
        self.inner.ref_count(key)
    }
}
