//! Scripted step runner.

use crate::errors::StepError;
use crate::executor::{JobContext, StepOutcome, StepRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// What a scripted job does when run.
#[derive(Debug, Clone, Default)]
pub struct JobScript {
    exit_code: i32,
    delay: Duration,
    outputs: Vec<(String, Vec<u8>)>,
    transient_failures: u32,
    error: Option<String>,
    hang: bool,
    ignore_cancel: bool,
}

impl JobScript {
    /// Exits zero.
    #[must_use]
    pub fn succeed() -> Self {
        Self::default()
    }

    /// Exits with `code`.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Fails with a permanent step error.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Waits until cancelled.
    #[must_use]
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Sleeps for `delay` before finishing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Produces an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.outputs.push((name.into(), bytes.into()));
        self
    }

    /// Fails transiently on the first `count` attempts.
    #[must_use]
    pub fn failing_transiently(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Keeps sleeping through cancellation.
    #[must_use]
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    running: usize,
    max_running: usize,
    calls: Vec<String>,
    attempts: HashMap<String, u32>,
    inputs: HashMap<String, BTreeMap<String, String>>,
}

/// A [`StepRunner`] that follows per-job scripts.
///
/// Jobs without a script succeed immediately.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: HashMap<String, JobScript>,
    state: Mutex<RunnerState>,
}

struct RunningGuard<'a>(&'a Mutex<RunnerState>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().running -= 1;
    }
}

impl ScriptedRunner {
    /// Creates a runner with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the script for `job`.
    #[must_use]
    pub fn script(mut self, job: impl Into<String>, script: JobScript) -> Self {
        self.scripts.insert(job.into(), script);
        self
    }

    /// Returns the highest number of steps that were running at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().max_running
    }

    /// Returns job ids in the order their attempts started.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns how many attempts `job` made.
    #[must_use]
    pub fn attempts(&self, job: &str) -> u32 {
        self.state.lock().attempts.get(job).copied().unwrap_or_default()
    }

    /// Returns the input name to content key map `job` last saw.
    #[must_use]
    pub fn inputs_seen(&self, job: &str) -> BTreeMap<String, String> {
        self.state.lock().inputs.get(job).cloned().unwrap_or_default()
    }

    fn enter(&self, ctx: &JobContext) -> (RunningGuard<'_>, u32) {
        let mut state = self.state.lock();
        state.running += 1;
        state.max_running = state.max_running.max(state.running);
        state.calls.push(ctx.job_id().to_string());
        let attempt = {
            let count = state.attempts.entry(ctx.job_id().to_string()).or_default();
            *count += 1;
            *count
        };
        let seen = ctx
            .inputs
            .iter()
            .map(|(name, input)| (name.clone(), input.reference.key.clone()))
            .collect();
        state.inputs.insert(ctx.job_id().to_string(), seen);
        (RunningGuard(&self.state), attempt)
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(&self, ctx: &JobContext) -> Result<StepOutcome, StepError> {
        let script = self.scripts.get(ctx.job_id()).cloned().unwrap_or_default();
        let (_guard, attempt) = self.enter(ctx);

        if script.hang {
            ctx.token.cancelled().await;
            return Err(StepError::Cancelled);
        }
        if !script.delay.is_zero() {
            if script.ignore_cancel {
                tokio::time::sleep(script.delay).await;
            } else {
                tokio::select! {
                    () = tokio::time::sleep(script.delay) => {}
                    () = ctx.token.cancelled() => return Err(StepError::Cancelled),
                }
            }
        }

        if attempt <= script.transient_failures {
            return Err(StepError::Transient(format!("attempt {attempt} hit a flaky runner")));
        }
        if let Some(message) = script.error {
            return Err(anyhow::anyhow!(message).into());
        }

        let mut outcome = StepOutcome::exited(script.exit_code);
        for (name, bytes) in script.outputs {
            outcome = outcome.with_output(name, bytes);
        }
        Ok(outcome)
    }
}
