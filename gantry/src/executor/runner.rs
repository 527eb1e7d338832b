//! The step runner seam.

use super::JobContext;
use crate::errors::StepError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Bytes a step produced under a declared output name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedOutput {
    /// The output name.
    pub name: String,
    /// The payload.
    pub bytes: Vec<u8>,
}

/// What a step reported when it ran to completion.
///
/// A non-zero `exit_code` is a normal outcome, not an error: the job fails
/// but nothing is retried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// The step's exit code. Zero means success.
    pub exit_code: i32,
    /// Outputs the step produced.
    pub outputs: Vec<ProducedOutput>,
    /// Optional detail for logs and failure reasons.
    pub message: Option<String>,
}

impl StepOutcome {
    /// A successful outcome with no outputs.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// An outcome with the given exit code.
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.outputs.push(ProducedOutput {
            name: name.into(),
            bytes: bytes.into(),
        });
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if the step exited with zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one job step.
///
/// Implementations must be safe to call concurrently for different jobs.
/// They should return [`StepError::Cancelled`] promptly once
/// `ctx.token` is cancelled, and [`StepError::Transient`] only for problems
/// that a retry could fix.
#[async_trait]
pub trait StepRunner: Send + Sync + Debug {
    /// Executes the step described by `ctx.job`.
    async fn run(&self, ctx: &JobContext) -> Result<StepOutcome, StepError>;
}
