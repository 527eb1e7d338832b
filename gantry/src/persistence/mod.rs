//! Run history.
//!
//! Runs are persisted keyed by run id so that a finished run can be audited
//! and an interrupted one closed out after a restart.

mod fs;

pub use fs::FsRunStore;

use crate::core::Run;
use crate::errors::PersistenceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Storage for run records.
#[async_trait]
pub trait RunStore: Send + Sync + std::fmt::Debug {
    /// Saves (or replaces) a run record.
    async fn save(&self, run: &Run) -> Result<(), PersistenceError>;

    /// Loads a run by id.
    async fn load(&self, run_id: &str) -> Result<Run, PersistenceError>;

    /// Lists stored run ids in ascending order.
    async fn list(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Keeps runs in memory.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<BTreeMap<String, Run>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Returns true if no run is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &Run) -> Result<(), PersistenceError> {
        self.runs.write().insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Run, PersistenceError> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(run_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>, PersistenceError> {
        Ok(self.runs.read().keys().cloned().collect())
    }
}
