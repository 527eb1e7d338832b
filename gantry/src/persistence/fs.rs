//! JSON-file run store.

use super::RunStore;
use crate::core::Run;
use crate::errors::PersistenceError;
use crate::utils::generate_uuid;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Stores each run as `<root>/runs/<run_id>.json`.
///
/// Writes go to a temporary file that is renamed over the record, so a
/// crash leaves either the previous or the new version on disk.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    dir: PathBuf,
}

impl FsRunStore {
    /// Opens (creating if needed) a store under `root`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = root.as_ref().join("runs");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Returns the path of a run's record.
    #[must_use]
    pub fn record_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

fn validate_id(run_id: &str) -> Result<(), PersistenceError> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidId(run_id.to_string()))
    }
}

#[async_trait]
impl RunStore for FsRunStore {
    async fn save(&self, run: &Run) -> Result<(), PersistenceError> {
        validate_id(&run.run_id)?;
        let json = serde_json::to_vec_pretty(run)?;
        let tmp = self.dir.join(format!(".{}.tmp", generate_uuid()));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.record_path(&run.run_id)).await?;
        trace!(run_id = %run.run_id, status = %run.status, "Run saved");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Run, PersistenceError> {
        validate_id(run_id)?;
        match tokio::fs::read(self.record_path(run_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(PersistenceError::NotFound(run_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                if !id.starts_with('.') {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobStatus, RunStatus};

    #[tokio::test]
    async fn test_save_and_reload_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Run::new("run-1", "web", "v1.0.0", vec!["build".to_string()]);
        run.start().unwrap();
        run.mark_running("build").unwrap();

        FsRunStore::open(dir.path()).await.unwrap().save(&run).await.unwrap();

        let reopened = FsRunStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load("run-1").await.unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.job_status("build"), Some(JobStatus::Running));
        assert_eq!(reopened.list().await.unwrap(), vec!["run-1"]);
    }

    #[tokio::test]
    async fn test_save_overwrites_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::open(dir.path()).await.unwrap();
        let mut run = Run::new("run-1", "web", "main", Vec::new());
        store.save(&run).await.unwrap();

        run.start().unwrap();
        run.finish(RunStatus::Succeeded, "0 succeeded, 0 skipped").unwrap();
        store.save(&run).await.unwrap();

        assert_eq!(store.load("run-1").await.unwrap().status, RunStatus::Succeeded);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::open(dir.path()).await.unwrap();

        assert!(matches!(store.load("absent").await, Err(PersistenceError::NotFound(_))));
        assert!(matches!(store.load("../etc/passwd").await, Err(PersistenceError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::open(dir.path()).await.unwrap();
        let run = Run::new("nightly/42", "web", "main", Vec::new());

        let err = store.save(&run).await.unwrap_err();

        assert!(matches!(err, PersistenceError::InvalidId(ref id) if id == "nightly/42"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
