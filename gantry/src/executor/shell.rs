//! Runs shell steps as child processes.
//!
//! Inputs are staged as files under
//! `<workspace>/.gantry/inputs/<run>/<job>/<name>` and the directory is
//! exported as `GANTRY_INPUTS_DIR`. After a zero exit each declared output is
//! read from `<workspace>/<name>`.

use super::{JobContext, StepOutcome, StepRunner};
use crate::core::JobStep;
use crate::errors::StepError;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Environment variable naming the staged inputs directory.
pub const ENV_INPUTS_DIR: &str = "GANTRY_INPUTS_DIR";

/// Executes [`JobStep::Shell`] steps.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    /// Clears the inherited process environment before applying the job's.
    clean_env: bool,
}

impl ShellRunner {
    /// Creates a runner that inherits the parent environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts children with only the job's environment.
    #[must_use]
    pub fn with_clean_env(mut self) -> Self {
        self.clean_env = true;
        self
    }

    async fn stage_inputs(&self, ctx: &JobContext) -> Result<PathBuf, StepError> {
        let dir = ctx
            .workspace
            .join(".gantry")
            .join("inputs")
            .join(&ctx.run_id)
            .join(ctx.job_id());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        for (name, input) in &ctx.inputs {
            let path = dir.join(name);
            tokio::fs::write(&path, &input.bytes)
                .await
                .with_context(|| format!("staging input {name}"))?;
            trace!(input = %name, path = %path.display(), "Staged input");
        }
        Ok(dir)
    }

    async fn collect_outputs(&self, ctx: &JobContext, mut outcome: StepOutcome) -> Result<StepOutcome, StepError> {
        for name in &ctx.job.outputs {
            let path = ctx.workspace.join(name);
            match tokio::fs::read(&path).await {
                Ok(bytes) => outcome = outcome.with_output(name.clone(), bytes),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(job = %ctx.job_id(), output = %name, "Declared output not found");
                }
                Err(err) => {
                    return Err(anyhow!(err)
                        .context(format!("reading output {}", path.display()))
                        .into())
                }
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, ctx: &JobContext) -> Result<StepOutcome, StepError> {
        let JobStep::Shell {
            program,
            args,
            working_dir,
        } = &ctx.job.step
        else {
            return Err(anyhow!("shell runner cannot run a '{}' step", ctx.job.step.kind()).into());
        };

        let inputs_dir = self.stage_inputs(ctx).await?;
        let cwd = working_dir
            .as_ref()
            .map_or_else(|| ctx.workspace.clone(), |dir| ctx.workspace.join(dir));

        let mut command = Command::new(program);
        if self.clean_env {
            command.env_clear();
        }
        command
            .args(args)
            .current_dir(&cwd)
            .envs(&ctx.environment)
            .env(ENV_INPUTS_DIR, &inputs_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(job = %ctx.job_id(), program = %program, attempt = ctx.attempt, "Spawning step");
        let child = command.spawn().map_err(|source| StepError::Spawn {
            program: program.clone(),
            source,
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.context("waiting for step process")?,
            () = ctx.token.cancelled() => return Err(StepError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            debug!(job = %ctx.job_id(), stdout = %stdout.trim_end(), "Step stdout");
        }
        if !stderr.is_empty() {
            debug!(job = %ctx.job_id(), stderr = %stderr.trim_end(), "Step stderr");
        }

        // Killed by a signal when there is no code.
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            let mut outcome = StepOutcome::exited(exit_code);
            if let Some(line) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                outcome = outcome.with_message(line.trim());
            }
            return Ok(outcome);
        }

        self.collect_outputs(ctx, StepOutcome::success()).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::core::{ArtifactRef, JobDefinition};
    use crate::executor::ResolvedInput;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(job: JobDefinition, workspace: &std::path::Path) -> JobContext {
        JobContext::new("run-1", "web", "main", Arc::new(job), workspace, Arc::new(CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::shell("fail", "sh", ["-c", "echo broken >&2; exit 3"]);

        let outcome = ShellRunner::new().run(&context(job, dir.path())).await.unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.message.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn test_outputs_read_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::shell("build", "sh", ["-c", "printf tarball > app.tar"]).with_output("app.tar");

        let outcome = ShellRunner::new().run(&context(job, dir.path())).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.outputs.len(), 1);
        assert_eq!(outcome.outputs[0].bytes, b"tarball");
    }

    #[tokio::test]
    async fn test_inputs_and_environment_visible_to_step() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::shell(
            "test",
            "sh",
            ["-c", "cat \"$GANTRY_INPUTS_DIR/app.tar\" > seen.txt; printf \"$GANTRY_JOB_ID\" >> seen.txt"],
        )
        .with_output("seen.txt");
        let bytes: &[u8] = b"payload-";
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "app.tar".to_string(),
            ResolvedInput {
                reference: ArtifactRef::for_content(bytes, "build", "app.tar"),
                bytes: Arc::from(bytes),
            },
        );

        let ctx = context(job, dir.path()).with_inputs(inputs);
        let outcome = ShellRunner::new().run(&ctx).await.unwrap();

        assert_eq!(outcome.outputs[0].bytes, b"payload-test");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_step_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::shell("x", "/definitely/not/a/program", Vec::<String>::new());

        let err = ShellRunner::new().run(&context(job, dir.path())).await.unwrap_err();
        assert!(matches!(err, StepError::Spawn { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_cancellation_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::shell("hang", "sleep", ["30"]);
        let ctx = context(job, dir.path());
        let token = ctx.token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel("stop");
        });

        let result = tokio::time::timeout(Duration::from_secs(5), ShellRunner::new().run(&ctx))
            .await
            .unwrap();
        assert!(matches!(result, Err(StepError::Cancelled)));
    }

    #[tokio::test]
    async fn test_rejects_non_shell_steps() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDefinition::deploy("deploy", "prod");

        assert!(ShellRunner::new().run(&context(job, dir.path())).await.is_err());
    }
}
