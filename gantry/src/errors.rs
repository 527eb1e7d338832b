//! Error types for the gantry orchestrator.
//!
//! Graph-build errors are fatal and abort a run before any job executes.
//! Job-level failures are not errors at all from the caller's point of view:
//! they are recorded on the job's state as a [`JobFailure`] and propagate as
//! skipped dependents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for gantry operations.
#[derive(Debug, Error)]
pub enum GantryError {
    /// The job graph failed validation.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// An artifact store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A step runner reported an error outside of a normal exit.
    #[error("{0}")]
    Step(#[from] StepError),

    /// A deploy target rejected or failed a deployment.
    #[error("{0}")]
    Deploy(#[from] DeployError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Run history could not be read or written.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// A run or job state transition was rejected.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a cycle is detected in the job graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cyclic dependency: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The jobs forming the cycle; the first id is repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors raised while building the dependency graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The pipeline declares no jobs.
    #[error("Pipeline '{pipeline}' has no jobs")]
    EmptyPipeline {
        /// The pipeline name.
        pipeline: String,
    },

    /// Two jobs share an id.
    #[error("Duplicate job id '{job}'")]
    DuplicateJob {
        /// The duplicated id.
        job: String,
    },

    /// A job needs (or tolerates) a job that does not exist.
    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency {
        /// The declaring job.
        job: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The `needs` relation contains a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CycleDetectedError),

    /// A declared input cannot be satisfied by the graph.
    #[error("Job '{job}' has an invalid input: {message}")]
    InvalidInput {
        /// The declaring job.
        job: String,
        /// What is wrong with the input.
        message: String,
    },
}

impl GraphError {
    /// Returns diagnostic information for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::EmptyPipeline { pipeline } => {
                ContractErrorInfo::new("GRAPH-004-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Declare at least one job.")
                    .with_context_entry("pipeline", pipeline)
            }
            Self::DuplicateJob { job } => {
                ContractErrorInfo::new("GRAPH-003-DUPLICATE", format!("Job '{job}' is declared twice"))
                    .with_fix_hint("Job ids must be unique within a pipeline.")
                    .with_context_entry("job", job)
            }
            Self::UnknownDependency { job, dependency } => ContractErrorInfo::new(
                "GRAPH-002-UNKNOWN_DEP",
                format!("Dependency '{dependency}' not found"),
            )
            .with_fix_hint("Check the `needs` list for typos.")
            .with_context_entry("job", job)
            .with_context_entry("dependency", dependency),
            Self::CyclicDependency(err) => ContractErrorInfo::new(
                "GRAPH-001-CYCLE",
                format!("Pipeline contains a dependency cycle: {}", err.cycle_path.join(" -> ")),
            )
            .with_fix_hint("Remove one of the dependencies in the cycle to break it."),
            Self::InvalidInput { job, message } => {
                ContractErrorInfo::new("GRAPH-005-INPUT", message.clone())
                    .with_fix_hint("Inputs must name an output declared by a job listed in `needs`.")
                    .with_context_entry("job", job)
            }
        }
    }
}

/// Errors raised by an artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object is stored under the key.
    #[error("Artifact not found: {key}")]
    NotFound {
        /// The missing content key.
        key: String,
    },

    /// The store is temporarily unavailable.
    #[error("Artifact store unavailable: {0}")]
    Transient(String),

    /// Stored bytes no longer hash to their key.
    #[error("Artifact {key} is corrupt (content hashes to {actual})")]
    Corrupt {
        /// The requested key.
        key: String,
        /// The key the stored bytes actually hash to.
        actual: String,
    },

    /// IO error.
    #[error("Artifact store IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            Self::NotFound { .. } | Self::Corrupt { .. } => false,
        }
    }
}

/// Errors raised by a step runner.
///
/// A non-zero exit is not a `StepError`; runners report it through the
/// returned outcome.
#[derive(Debug, Error)]
pub enum StepError {
    /// A temporary infrastructure problem; the step may be retried.
    #[error("Transient step error: {0}")]
    Transient(String),

    /// The step's program could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The step observed cancellation and stopped.
    #[error("Step cancelled")]
    Cancelled,

    /// An artifact store error surfaced inside the step.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A deploy target error surfaced inside the step.
    #[error("{0}")]
    Deploy(#[from] DeployError),

    /// Any other runner-specific failure.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Returns true if retrying the step may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Store(err) => err.is_transient(),
            Self::Deploy(err) => err.is_transient(),
            Self::Spawn { .. } | Self::Cancelled | Self::Other(_) => false,
        }
    }
}

/// Errors raised by a deploy target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    /// The target refused the deployment.
    #[error("Deployment to '{environment}' rejected: {message}")]
    Rejected {
        /// The target environment.
        environment: String,
        /// The target's explanation.
        message: String,
    },

    /// The target could not be reached.
    #[error("Deploy target unavailable: {0}")]
    Unavailable(String),

    /// The deployment failed for another reason.
    #[error("Deployment failed: {0}")]
    Failed(String),
}

impl DeployError {
    /// Returns true if retrying the deployment may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the schema.
    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range or malformed.
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// The setting name.
        key: String,
        /// The rejected value.
        value: String,
    },
}

/// Errors raised by a run store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// No run is recorded under the id.
    #[error("Run not found: {0}")]
    NotFound(String),

    /// The run id cannot name a record.
    #[error("Invalid run id: {0:?}")]
    InvalidId(String),

    /// A run record could not be (de)serialized.
    #[error("Run record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("Run store IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when a run or job is moved to a state it cannot reach.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition for {subject}: {from} -> {to}")]
pub struct TransitionError {
    /// The run or job id.
    pub subject: String,
    /// The current state.
    pub from: String,
    /// The requested state.
    pub to: String,
}

impl TransitionError {
    /// Creates a new transition error.
    #[must_use]
    pub fn new(subject: impl Into<String>, from: impl ToString, to: impl ToString) -> Self {
        Self {
            subject: subject.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The step exited with a non-zero status.
    #[error("exit code {code}")]
    NonZeroExit {
        /// The exit code.
        code: i32,
        /// Runner-provided detail, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The job exceeded its maximum duration.
    #[error("Timeout after {}s", *timeout_ms as f64 / 1000.0)]
    Timeout {
        /// The limit that was exceeded.
        timeout_ms: u64,
    },

    /// A required input artifact could not be found.
    #[error("artifact not found: {name} ({key})")]
    ArtifactNotFound {
        /// The input name.
        name: String,
        /// The content key, or the producing job if none was recorded.
        key: String,
    },

    /// A declared output was not produced by the step.
    #[error("declared output '{name}' was not produced")]
    MissingOutput {
        /// The output name.
        name: String,
    },

    /// Transient errors persisted past the retry budget.
    #[error("transient error after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The last error.
        message: String,
    },

    /// The step runner reported a non-retryable error.
    #[error("step error: {message}")]
    StepError {
        /// The error message.
        message: String,
    },

    /// The job was interrupted by run cancellation.
    #[error("cancelled")]
    Cancelled,

    /// The job's task ended abnormally, or the process stopped while it was running.
    #[error("interrupted: {message}")]
    Interrupted {
        /// What happened.
        message: String,
    },
}
