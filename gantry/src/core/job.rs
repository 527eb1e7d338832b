//! Declarative job definitions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// The unit of work a job performs.
///
/// Steps are a closed set; runners dispatch on the variant instead of
/// interpreting free-form configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStep {
    /// Run an external program. The exit status decides the outcome.
    Shell {
        /// Program to execute.
        program: String,
        /// Arguments passed verbatim.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory, relative to the workspace root.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    /// Read a file from the workspace and publish it as an output.
    ArtifactUpload {
        /// Output name to publish under.
        name: String,
        /// File path, relative to the workspace root.
        path: PathBuf,
    },
    /// Hand the job's inputs to a deploy target.
    Deploy {
        /// The environment to deploy to.
        environment: String,
    },
}

impl JobStep {
    /// Returns a short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shell { .. } => "shell",
            Self::ArtifactUpload { .. } => "artifact_upload",
            Self::Deploy { .. } => "deploy",
        }
    }
}

/// An input consumed from an upstream job's declared output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputSpec {
    /// The producing job. Must be listed in `needs`.
    pub job: String,
    /// The producer's output name.
    pub name: String,
    /// When true, a missing artifact is not fatal.
    #[serde(default)]
    pub optional: bool,
}

/// Declarative description of a unit of work.
///
/// Definitions are immutable once the graph is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job id.
    pub id: String,
    /// What the job runs.
    pub step: JobStep,
    /// Artifacts consumed from upstream jobs.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Names of the artifacts the step must produce.
    #[serde(default)]
    pub outputs: BTreeSet<String>,
    /// Jobs that must finish before this one starts.
    #[serde(default)]
    pub needs: BTreeSet<String>,
    /// Environment variables passed to the step.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// A failure of this job does not fail the run.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Dependencies whose (tolerable) failure does not skip this job.
    #[serde(default)]
    pub tolerates: BTreeSet<String>,
    /// Maximum duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl JobDefinition {
    /// Creates a job definition for a step.
    #[must_use]
    pub fn new(id: impl Into<String>, step: JobStep) -> Self {
        Self {
            id: id.into(),
            step,
            inputs: Vec::new(),
            outputs: BTreeSet::new(),
            needs: BTreeSet::new(),
            environment: BTreeMap::new(),
            continue_on_error: false,
            tolerates: BTreeSet::new(),
            timeout_ms: None,
        }
    }

    /// Creates a shell job.
    #[must_use]
    pub fn shell<I, S>(id: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            id,
            JobStep::Shell {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
                working_dir: None,
            },
        )
    }

    /// Creates an artifact upload job.
    #[must_use]
    pub fn upload(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self::new(
            id,
            JobStep::ArtifactUpload {
                name: name.clone(),
                path: path.into(),
            },
        )
        .with_output(name)
    }

    /// Creates a deploy job.
    #[must_use]
    pub fn deploy(id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self::new(
            id,
            JobStep::Deploy {
                environment: environment.into(),
            },
        )
    }

    /// Adds a dependency.
    #[must_use]
    pub fn needs(mut self, dep: impl Into<String>) -> Self {
        self.needs.insert(dep.into());
        self
    }

    /// Adds a required input and the matching dependency.
    #[must_use]
    pub fn with_input(mut self, job: impl Into<String>, name: impl Into<String>) -> Self {
        let job = job.into();
        self.needs.insert(job.clone());
        self.inputs.push(InputSpec {
            job,
            name: name.into(),
            optional: false,
        });
        self
    }

    /// Adds an optional input and the matching dependency.
    #[must_use]
    pub fn with_optional_input(mut self, job: impl Into<String>, name: impl Into<String>) -> Self {
        let job = job.into();
        self.needs.insert(job.clone());
        self.inputs.push(InputSpec {
            job,
            name: name.into(),
            optional: true,
        });
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into());
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Marks the job's failure as tolerable.
    #[must_use]
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Keeps this job runnable when `dep` fails tolerably.
    #[must_use]
    pub fn tolerating(mut self, dep: impl Into<String>) -> Self {
        self.tolerates.insert(dep.into());
        self
    }

    /// Sets the maximum duration.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the maximum duration, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_job_builder() {
        let job = JobDefinition::shell("test", "cargo", ["test", "--all"])
            .needs("build")
            .with_env("RUST_BACKTRACE", "1")
            .with_timeout(Duration::from_secs(2));

        assert_eq!(job.id, "test");
        assert_eq!(job.step.kind(), "shell");
        assert!(job.needs.contains("build"));
        assert_eq!(job.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(job.environment.get("RUST_BACKTRACE"), Some(&"1".to_string()));
    }

    #[test]
    fn test_with_input_adds_dependency() {
        let job = JobDefinition::deploy("deploy", "staging")
            .with_input("build", "app.tar")
            .with_optional_input("docs", "site.zip");

        assert_eq!(job.needs.len(), 2);
        assert!(!job.inputs[0].optional);
        assert!(job.inputs[1].optional);
    }

    #[test]
    fn test_upload_declares_output() {
        let job = JobDefinition::upload("package", "app.tar", "dist/app.tar");
        assert!(job.outputs.contains("app.tar"));
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = serde_json::json!({
            "id": "lint",
            "step": {"type": "shell", "program": "npm", "args": ["run", "lint"]},
            "needs": ["install"],
            "continue_on_error": true
        });

        let job: JobDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(job.id, "lint");
        assert!(job.continue_on_error);
        assert!(job.outputs.is_empty());
        assert_eq!(
            job.step,
            JobStep::Shell {
                program: "npm".to_string(),
                args: vec!["run".to_string(), "lint".to_string()],
                working_dir: None,
            }
        );
    }
}
