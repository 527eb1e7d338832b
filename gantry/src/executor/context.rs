//! Per-job execution context.

use crate::cancellation::CancellationToken;
use crate::core::{ArtifactRef, JobDefinition};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable carrying the run id.
pub const ENV_RUN_ID: &str = "GANTRY_RUN_ID";
/// Environment variable carrying the job id.
pub const ENV_JOB_ID: &str = "GANTRY_JOB_ID";
/// Environment variable carrying the triggering ref.
pub const ENV_REF: &str = "GANTRY_REF";
/// Environment variable carrying the attempt number.
pub const ENV_ATTEMPT: &str = "GANTRY_ATTEMPT";

/// An input artifact fetched for a job.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    /// The stored reference.
    pub reference: ArtifactRef,
    /// The artifact bytes.
    pub bytes: Arc<[u8]>,
}

/// Everything a step runner needs to execute one attempt of a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The run this job belongs to.
    pub run_id: String,
    /// The pipeline name.
    pub pipeline: String,
    /// The ref or tag that triggered the run.
    pub trigger_ref: String,
    /// The job definition.
    pub job: Arc<JobDefinition>,
    /// Environment for the step: the job's own variables plus `GANTRY_*`.
    pub environment: BTreeMap<String, String>,
    /// Fetched inputs keyed by input name.
    pub inputs: BTreeMap<String, ResolvedInput>,
    /// Workspace root directory.
    pub workspace: PathBuf,
    /// The run's cancellation token.
    pub token: Arc<CancellationToken>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl JobContext {
    /// Creates a context for the first attempt.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        pipeline: impl Into<String>,
        trigger_ref: impl Into<String>,
        job: Arc<JobDefinition>,
        workspace: impl Into<PathBuf>,
        token: Arc<CancellationToken>,
    ) -> Self {
        let run_id = run_id.into();
        let trigger_ref = trigger_ref.into();

        let mut environment = job.environment.clone();
        environment.insert(ENV_RUN_ID.to_string(), run_id.clone());
        environment.insert(ENV_JOB_ID.to_string(), job.id.clone());
        environment.insert(ENV_REF.to_string(), trigger_ref.clone());
        environment.insert(ENV_ATTEMPT.to_string(), "1".to_string());

        Self {
            run_id,
            pipeline: pipeline.into(),
            trigger_ref,
            job,
            environment,
            inputs: BTreeMap::new(),
            workspace: workspace.into(),
            token,
            attempt: 1,
        }
    }

    /// Sets the fetched inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: BTreeMap<String, ResolvedInput>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Returns a copy of this context for another attempt.
    #[must_use]
    pub fn for_attempt(&self, attempt: u32) -> Self {
        let mut ctx = self.clone();
        ctx.attempt = attempt;
        ctx.environment.insert(ENV_ATTEMPT.to_string(), attempt.to_string());
        ctx
    }

    /// Returns the job id.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Returns an input's bytes.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&[u8]> {
        self.inputs.get(name).map(|i| &*i.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_environment() {
        let job = Arc::new(JobDefinition::shell("test", "cargo", ["test"]).with_env("CI", "true"));
        let ctx = JobContext::new("run-1", "web", "refs/heads/main", job, "/tmp/ws", Arc::default());

        assert_eq!(ctx.environment.get("CI").map(String::as_str), Some("true"));
        assert_eq!(ctx.environment.get(ENV_RUN_ID).map(String::as_str), Some("run-1"));
        assert_eq!(ctx.environment.get(ENV_JOB_ID).map(String::as_str), Some("test"));
        assert_eq!(ctx.environment.get(ENV_REF).map(String::as_str), Some("refs/heads/main"));
        assert_eq!(ctx.job_id(), "test");
    }

    #[test]
    fn test_for_attempt_updates_environment() {
        let job = Arc::new(JobDefinition::shell("build", "make", Vec::<String>::new()));
        let ctx = JobContext::new("run-1", "web", "main", job, ".", Arc::default()).for_attempt(3);

        assert_eq!(ctx.attempt, 3);
        assert_eq!(ctx.environment.get(ENV_ATTEMPT).map(String::as_str), Some("3"));
    }

    #[test]
    fn test_input_lookup() {
        let job = Arc::new(JobDefinition::deploy("deploy", "staging"));
        let bytes: &[u8] = b"payload";
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "app.tar".to_string(),
            ResolvedInput {
                reference: ArtifactRef::for_content(bytes, "build", "app.tar"),
                bytes: Arc::from(bytes),
            },
        );

        let ctx = JobContext::new("r", "p", "main", job, ".", Arc::default()).with_inputs(inputs);
        assert_eq!(ctx.input("app.tar"), Some(bytes));
        assert!(ctx.input("missing").is_none());
    }
}
