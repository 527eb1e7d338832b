//! Job execution.
//!
//! This module provides:
//! - `StepRunner`, the seam between the scheduler and whatever runs a step
//! - `ShellRunner` and `StepDispatcher`, the built-in runners
//! - `Scheduler`, the run coordinator that dispatches ready jobs with
//!   bounded concurrency, retries transient errors and enforces timeouts

mod context;
mod dispatch;
mod runner;
mod scheduler;
mod shell;

pub use context::{JobContext, ResolvedInput, ENV_ATTEMPT, ENV_JOB_ID, ENV_REF, ENV_RUN_ID};
pub use dispatch::StepDispatcher;
pub use runner::{ProducedOutput, StepOutcome, StepRunner};
pub use scheduler::{JobOutcome, Scheduler, SchedulerOptions};
pub use shell::{ShellRunner, ENV_INPUTS_DIR};
