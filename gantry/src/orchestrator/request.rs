//! The trigger interface.

use crate::core::JobDefinition;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a run's job definitions come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// Definitions supplied with the request.
    Inline(Vec<JobDefinition>),
    /// A JSON file holding either an array of definitions or an object
    /// with a `jobs` array.
    File(PathBuf),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobFile {
    Bare(Vec<JobDefinition>),
    Wrapped { jobs: Vec<JobDefinition> },
}

impl JobSource {
    /// Loads the definitions.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` or `ConfigError::Parse` for file sources.
    pub async fn load(&self) -> Result<Vec<JobDefinition>, ConfigError> {
        match self {
            Self::Inline(jobs) => Ok(jobs.clone()),
            Self::File(path) => {
                let display = path.display().to_string();
                let raw = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
                    path: display.clone(),
                    source,
                })?;
                let parsed: JobFile =
                    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: display, source })?;
                Ok(match parsed {
                    JobFile::Bare(jobs) | JobFile::Wrapped { jobs } => jobs,
                })
            }
        }
    }
}

/// A request to run a pipeline, as supplied by a CI runner or event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// The pipeline name.
    pub pipeline: String,
    /// The ref or tag that triggered the run.
    pub trigger_ref: String,
    /// The job definitions.
    pub jobs: JobSource,
    /// A caller-chosen run id. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl RunRequest {
    /// Creates a request with inline definitions.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, trigger_ref: impl Into<String>, jobs: Vec<JobDefinition>) -> Self {
        Self {
            pipeline: pipeline.into(),
            trigger_ref: trigger_ref.into(),
            jobs: JobSource::Inline(jobs),
            run_id: None,
        }
    }

    /// Creates a request whose definitions are read from a file.
    #[must_use]
    pub fn from_file(pipeline: impl Into<String>, trigger_ref: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: pipeline.into(),
            trigger_ref: trigger_ref.into(),
            jobs: JobSource::File(path.into()),
            run_id: None,
        }
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}
