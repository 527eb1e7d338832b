//! Core domain model types for gantry.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Job definitions and their typed steps
//! - Content-addressed artifact references
//! - Job and run status enums
//! - The run record and per-job state

mod artifact;
mod job;
mod run;
#[cfg(test)]
mod run_tests;
mod status;

pub use artifact::{content_key, ArtifactRef, KEY_PREFIX};
pub use job::{InputSpec, JobDefinition, JobStep};
pub use run::{JobState, Run};
pub use status::{JobStatus, RunStatus};
