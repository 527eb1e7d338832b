//! Dispatches each step variant to the component that runs it.

use super::{JobContext, ShellRunner, StepOutcome, StepRunner};
use crate::core::JobStep;
use crate::errors::{DeployError, StepError};
use crate::promotion::{DeployArtifact, DeployTarget};
use anyhow::Context;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The default [`StepRunner`]: shell steps run as processes, uploads read a
/// workspace file, deploy steps call the configured [`DeployTarget`].
#[derive(Clone, Default)]
pub struct StepDispatcher {
    shell: ShellRunner,
    deploy: Option<Arc<dyn DeployTarget>>,
}

impl StepDispatcher {
    /// Creates a dispatcher without a deploy target.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shell runner.
    #[must_use]
    pub fn with_shell(mut self, shell: ShellRunner) -> Self {
        self.shell = shell;
        self
    }

    /// Sets the deploy target used by deploy steps.
    #[must_use]
    pub fn with_deploy_target(mut self, target: Arc<dyn DeployTarget>) -> Self {
        self.deploy = Some(target);
        self
    }

    async fn upload(&self, ctx: &JobContext, name: &str, path: &std::path::Path) -> Result<StepOutcome, StepError> {
        let full = ctx.workspace.join(path);
        let bytes = tokio::fs::read(&full)
            .await
            .with_context(|| format!("reading {}", full.display()))?;
        Ok(StepOutcome::success().with_output(name, bytes))
    }

    async fn deploy(&self, ctx: &JobContext, environment: &str) -> Result<StepOutcome, StepError> {
        let target = self.deploy.as_ref().ok_or_else(|| DeployError::Rejected {
            environment: environment.to_string(),
            message: "no deploy target configured".to_string(),
        })?;
        let artifacts: Vec<DeployArtifact> = ctx
            .inputs
            .iter()
            .map(|(name, input)| DeployArtifact {
                name: name.clone(),
                key: input.reference.key.clone(),
                bytes: input.bytes.to_vec(),
            })
            .collect();

        let receipt = target.deploy(environment, &artifacts).await?;
        info!(
            job = %ctx.job_id(),
            environment = %environment,
            deployment_id = %receipt.deployment_id,
            "Deploy step finished"
        );
        Ok(StepOutcome::success().with_message(format!("deployment {}", receipt.deployment_id)))
    }
}

impl fmt::Debug for StepDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDispatcher")
            .field("shell", &self.shell)
            .field("has_deploy_target", &self.deploy.is_some())
            .finish()
    }
}

#[async_trait]
impl StepRunner for StepDispatcher {
    async fn run(&self, ctx: &JobContext) -> Result<StepOutcome, StepError> {
        match &ctx.job.step {
            JobStep::Shell { .. } => self.shell.run(ctx).await,
            JobStep::ArtifactUpload { name, path } => self.upload(ctx, name, path).await,
            JobStep::Deploy { environment } => self.deploy(ctx, environment).await,
        }
    }
}
