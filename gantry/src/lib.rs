//! # Gantry
//!
//! A build, test and deploy pipeline orchestrator.
//!
//! Gantry runs a declared set of jobs as a dependency graph with:
//!
//! - **Validated graphs**: unknown dependencies, duplicate ids, unsatisfiable
//!   inputs and cycles are rejected before any job runs
//! - **Bounded scheduling**: ready jobs run in parallel up to a concurrency
//!   limit, with timeouts, transient-error retries and cooperative cancellation
//! - **Content-addressed artifacts**: outputs are stored by SHA-256 and handed
//!   to downstream jobs by key
//! - **Promotion gates**: finished runs advance through an environment ladder
//!   only when their required checks passed
//! - **Durable history**: runs are persisted so they can be audited, and
//!   closed out after a crash
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gantry::prelude::*;
//!
//! let orchestrator = Orchestrator::from_config(&GantryConfig::from_env()?, None).await?;
//!
//! let jobs = vec![
//!     JobDefinition::shell("build", "make", ["dist"]).with_output("app.tar"),
//!     JobDefinition::shell("test", "make", ["test"]).with_input("build", "app.tar"),
//! ];
//! let run = orchestrator.trigger(RunRequest::new("web", "refs/tags/v1.0.0", jobs)).await?;
//!
//! let decision = orchestrator.evaluate(&run, "staging").await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod orchestrator;
pub mod persistence;
pub mod promotion;
pub mod retry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{GantryConfig, LogConfig};
    pub use crate::core::{
        ArtifactRef, InputSpec, JobDefinition, JobState, JobStatus, JobStep, Run, RunStatus,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, DeployError, GantryError, GraphError, JobFailure,
        StepError, StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{
        JobContext, Scheduler, SchedulerOptions, ShellRunner, StepDispatcher, StepOutcome, StepRunner,
    };
    pub use crate::graph::{GraphBuilder, JobGraph};
    pub use crate::observability::init_tracing;
    pub use crate::orchestrator::{JobSource, Orchestrator, Promotion, RunRequest};
    pub use crate::persistence::{FsRunStore, InMemoryRunStore, RunStore};
    pub use crate::promotion::{
        DeployTarget, DirectoryDeployTarget, PromotionDecision, PromotionGate, PromotionPolicy,
    };
    pub use crate::retry::RetryConfig;
}
