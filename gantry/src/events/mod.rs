//! Run lifecycle events.
//!
//! The scheduler reports progress through an [`EventSink`]. Sinks are
//! passed explicitly to each orchestrator rather than installed globally, so
//! concurrent runs in one process can report to different places.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the scheduler.
pub mod kinds {
    /// A run entered `Running`.
    pub const RUN_STARTED: &str = "run.started";
    /// A run reached a terminal status.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A job was dispatched.
    pub const JOB_STARTED: &str = "job.started";
    /// A job succeeded.
    pub const JOB_SUCCEEDED: &str = "job.succeeded";
    /// A job failed.
    pub const JOB_FAILED: &str = "job.failed";
    /// A job was skipped without running.
    pub const JOB_SKIPPED: &str = "job.skipped";
    /// A job step is being retried after a transient error.
    pub const JOB_RETRYING: &str = "job.retrying";
    /// A promotion was evaluated.
    pub const PROMOTION_EVALUATED: &str = "promotion.evaluated";
    /// A promotion was deployed and recorded.
    pub const PROMOTION_DEPLOYED: &str = "promotion.deployed";
}
