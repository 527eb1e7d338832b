//! The run coordinator.
//!
//! [`Scheduler::execute`] is the only code that mutates a [`Run`] while it is
//! in flight. Each dispatched job runs in its own tokio task which reports a
//! [`JobOutcome`] back through a `FuturesUnordered` of join handles; the
//! coordinator applies the outcome, recomputes readiness and dispatches
//! again. A job is therefore dispatched at most once and only after every
//! dependency has been finalized.

use super::{JobContext, ResolvedInput, StepOutcome, StepRunner};
use crate::artifacts::ArtifactStore;
use crate::cancellation::CancellationToken;
use crate::core::{ArtifactRef, InputSpec, JobDefinition, JobStatus, Run, RunStatus};
use crate::errors::{GantryError, JobFailure, StepError, StoreError};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::graph::JobGraph;
use crate::persistence::RunStore;
use crate::retry::{with_retry, RetryConfig, RetryError};
use crate::utils::timestamps::elapsed_ms;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, info, warn};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum jobs running at once. Values below one are treated as one.
    pub concurrency: usize,
    /// Retry policy for transient step errors.
    pub retry: RetryConfig,
    /// Retry policy for transient artifact store errors.
    pub store_retry: RetryConfig,
    /// Timeout for jobs that do not declare one.
    pub default_timeout: Option<Duration>,
    /// Workspace root handed to step runners.
    pub workspace_root: PathBuf,
    /// How long running jobs get to stop after cancellation before they are aborted.
    pub cancel_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryConfig::default(),
            store_retry: RetryConfig::new().with_max_attempts(3).with_base_delay_ms(100),
            default_timeout: None,
            workspace_root: PathBuf::from("."),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl SchedulerOptions {
    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the step retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the store retry policy.
    #[must_use]
    pub fn with_store_retry(mut self, retry: RetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    /// Sets the default job timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

/// How a job task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The step exited zero and every declared output was published.
    Succeeded {
        /// The step's exit code.
        exit_code: i32,
        /// Step attempts made.
        attempts: u32,
        /// Published outputs.
        outputs: Vec<ArtifactRef>,
    },
    /// The job failed.
    Failed {
        /// Why.
        failure: JobFailure,
        /// The step's exit code, when it ran to completion.
        exit_code: Option<i32>,
        /// Step attempts made.
        attempts: u32,
    },
}

impl JobOutcome {
    fn failed(failure: JobFailure, exit_code: Option<i32>, attempts: u32) -> Self {
        Self::Failed {
            failure,
            exit_code,
            attempts,
        }
    }
}

type InFlight = FuturesUnordered<BoxFuture<'static, (String, Result<JobOutcome, JoinError>)>>;

/// Runs a [`JobGraph`] with bounded concurrency.
pub struct Scheduler {
    graph: Arc<JobGraph>,
    runner: Arc<dyn StepRunner>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    run_store: Option<Arc<dyn RunStore>>,
    options: SchedulerOptions,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pipeline", &self.graph.name())
            .field("jobs", &self.graph.len())
            .field("runner", &self.runner)
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler with default options and no event sink.
    #[must_use]
    pub fn new(graph: Arc<JobGraph>, runner: Arc<dyn StepRunner>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            graph,
            runner,
            store,
            events: Arc::new(NoOpEventSink),
            run_store: None,
            options: SchedulerOptions::default(),
        }
    }

    /// Sets the options.
    #[must_use]
    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Persists the run after every batch of transitions.
    #[must_use]
    pub fn with_run_store(mut self, run_store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(run_store);
        self
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &Arc<JobGraph> {
        &self.graph
    }

    /// Creates a pending run for this scheduler's graph.
    #[must_use]
    pub fn new_run(&self, run_id: impl Into<String>, trigger_ref: impl Into<String>) -> Run {
        Run::new(
            run_id,
            self.graph.name(),
            trigger_ref,
            self.graph.topological_order().to_vec(),
        )
    }

    /// Executes `run` to completion.
    ///
    /// Job failures are recorded on the run and do not produce an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the run was not `Pending` or a state
    /// transition was rejected, which indicates a bug.
    pub async fn execute(&self, run: &mut Run, token: Arc<CancellationToken>) -> Result<(), GantryError> {
        run.start()?;
        info!(run_id = %run.run_id, pipeline = %run.pipeline, jobs = self.graph.len(), "Run started");
        self.events
            .emit(
                kinds::RUN_STARTED,
                Some(json!({"run_id": run.run_id, "pipeline": run.pipeline, "ref": run.trigger_ref})),
            )
            .await;

        let order = self.graph.topological_order();
        let mut pending: BTreeSet<usize> = (0..order.len())
            .filter(|&r| run.job_status(&order[r]) == Some(JobStatus::Queued))
            .collect();
        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut handles: HashMap<String, AbortHandle> = HashMap::new();
        let concurrency = self.options.concurrency.max(1);

        loop {
            if token.is_cancelled() {
                break;
            }
            self.skip_blocked(run, &mut pending).await?;

            let free = concurrency.saturating_sub(in_flight.len());
            let ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&r| self.is_ready(run, &order[r]))
                .take(free)
                .collect();
            for rank in ready {
                pending.remove(&rank);
                let id = order[rank].clone();
                self.dispatch(run, &id, &token, &mut in_flight, &mut handles).await?;
            }

            self.persist(run).await;
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some((id, joined)) = in_flight.next() => {
                    handles.remove(&id);
                    self.finalize(run, &id, joined).await?;
                }
                () = token.cancelled() => {}
            }
        }

        if token.is_cancelled() {
            self.drain_cancelled(run, &mut pending, in_flight, &handles).await?;
        } else if !pending.is_empty() {
            return Err(GantryError::Internal(format!(
                "scheduler stalled with {} queued jobs",
                pending.len()
            )));
        }

        self.complete(run, &token).await
    }

    fn is_tolerated(&self, job: &JobDefinition, dep: &str, run: &Run) -> bool {
        run.job_status(dep) == Some(JobStatus::Failed)
            && job.tolerates.contains(dep)
            && self.graph.job(dep).is_some_and(|d| d.continue_on_error)
    }

    fn is_ready(&self, run: &Run, id: &str) -> bool {
        let Some(job) = self.graph.job(id) else {
            return false;
        };
        job.needs
            .iter()
            .all(|dep| run.job_status(dep) == Some(JobStatus::Succeeded) || self.is_tolerated(job, dep, run))
    }

    /// Returns the dependency that blocks `id` for good, if any.
    fn blocking_dependency(&self, run: &Run, id: &str) -> Option<(String, JobStatus)> {
        let job = self.graph.job(id)?;
        job.needs.iter().find_map(|dep| match run.job_status(dep) {
            Some(JobStatus::Skipped) => Some((dep.clone(), JobStatus::Skipped)),
            Some(JobStatus::Failed) if !self.is_tolerated(job, dep, run) => Some((dep.clone(), JobStatus::Failed)),
            _ => None,
        })
    }

    /// Skips queued jobs that can no longer run. Pending jobs are visited in
    /// topological order, so one pass propagates through whole branches.
    async fn skip_blocked(&self, run: &mut Run, pending: &mut BTreeSet<usize>) -> Result<(), GantryError> {
        let order = self.graph.topological_order();
        let candidates: Vec<usize> = pending.iter().copied().collect();
        for rank in candidates {
            let id = &order[rank];
            if let Some((dep, status)) = self.blocking_dependency(run, id) {
                let reason = match status {
                    JobStatus::Skipped => format!("dependency '{dep}' was skipped"),
                    _ => format!("dependency '{dep}' failed"),
                };
                run.mark_skipped(id, reason.clone())?;
                pending.remove(&rank);
                info!(run_id = %run.run_id, job = %id, reason = %reason, "Job skipped");
                self.events
                    .emit(kinds::JOB_SKIPPED, Some(json!({"run_id": run.run_id, "job": id, "reason": reason})))
                    .await;
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        run: &mut Run,
        id: &str,
        token: &Arc<CancellationToken>,
        in_flight: &mut InFlight,
        handles: &mut HashMap<String, AbortHandle>,
    ) -> Result<(), GantryError> {
        let job = self
            .graph
            .job(id)
            .cloned()
            .ok_or_else(|| GantryError::Internal(format!("job '{id}' missing from graph")))?;

        let inputs = job
            .inputs
            .iter()
            .map(|spec| {
                let published = run.job(&spec.job).and_then(|s| s.output(&spec.name)).cloned();
                (spec.clone(), published)
            })
            .collect();

        run.mark_running(id)?;
        debug!(run_id = %run.run_id, job = %id, step = job.step.kind(), "Job dispatched");
        self.events
            .emit(kinds::JOB_STARTED, Some(json!({"run_id": run.run_id, "job": id})))
            .await;

        let task = JobTask {
            base: JobContext::new(
                run.run_id.clone(),
                run.pipeline.clone(),
                run.trigger_ref.clone(),
                Arc::clone(&job),
                self.options.workspace_root.clone(),
                Arc::clone(token),
            ),
            inputs,
            runner: Arc::clone(&self.runner),
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            retry: self.options.retry.clone(),
            store_retry: self.options.store_retry.clone(),
            timeout: job.timeout().or(self.options.default_timeout),
        };

        let handle = tokio::spawn(task.run());
        handles.insert(id.to_string(), handle.abort_handle());
        let id = id.to_string();
        in_flight.push(handle.map(move |joined| (id, joined)).boxed());
        Ok(())
    }

    async fn finalize(&self, run: &mut Run, id: &str, joined: Result<JobOutcome, JoinError>) -> Result<(), GantryError> {
        let outcome = joined.unwrap_or_else(|err| {
            let failure = if err.is_cancelled() {
                JobFailure::Cancelled
            } else {
                JobFailure::Interrupted {
                    message: "job task panicked".to_string(),
                }
            };
            JobOutcome::failed(failure, None, 0)
        });

        match outcome {
            JobOutcome::Succeeded {
                exit_code,
                attempts,
                outputs,
            } => {
                let keys: Vec<&str> = outputs.iter().map(|o| o.key.as_str()).collect();
                let data = json!({"run_id": run.run_id, "job": id, "attempts": attempts, "outputs": keys});
                run.mark_succeeded(id, exit_code, attempts, outputs)?;
                info!(run_id = %run.run_id, job = %id, attempts, duration_ms = self.duration_ms(run, id), "Job succeeded");
                self.events.emit(kinds::JOB_SUCCEEDED, Some(data)).await;
            }
            JobOutcome::Failed {
                failure,
                exit_code,
                attempts,
            } => {
                let reason = failure.to_string();
                run.mark_failed(id, failure, exit_code, attempts)?;
                warn!(
                    run_id = %run.run_id,
                    job = %id,
                    reason = %reason,
                    duration_ms = self.duration_ms(run, id),
                    "Job failed"
                );
                self.events
                    .emit(
                        kinds::JOB_FAILED,
                        Some(json!({"run_id": run.run_id, "job": id, "reason": reason, "exit_code": exit_code})),
                    )
                    .await;
            }
        }
        Ok(())
    }

    fn duration_ms(&self, run: &Run, id: &str) -> i64 {
        run.job(id)
            .and_then(|s| Some(elapsed_ms(s.started_at?, s.finished_at?)))
            .unwrap_or_default()
    }

    /// Skips what never started, then gives running jobs the grace period to
    /// observe the token before aborting them.
    async fn drain_cancelled(
        &self,
        run: &mut Run,
        pending: &mut BTreeSet<usize>,
        mut in_flight: InFlight,
        handles: &HashMap<String, AbortHandle>,
    ) -> Result<(), GantryError> {
        let order = self.graph.topological_order();
        for rank in std::mem::take(pending) {
            let id = &order[rank];
            run.mark_skipped(id, "cancelled")?;
            self.events
                .emit(kinds::JOB_SKIPPED, Some(json!({"run_id": run.run_id, "job": id, "reason": "cancelled"})))
                .await;
        }
        self.persist(run).await;

        let grace = tokio::time::sleep(self.options.cancel_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                next = in_flight.next() => match next {
                    Some((id, joined)) => self.finalize(run, &id, joined).await?,
                    None => return Ok(()),
                },
                () = &mut grace => break,
            }
        }

        warn!(run_id = %run.run_id, remaining = in_flight.len(), "Aborting jobs after cancellation grace period");
        for handle in handles.values() {
            handle.abort();
        }
        while let Some((id, joined)) = in_flight.next().await {
            self.finalize(run, &id, joined).await?;
        }
        Ok(())
    }

    async fn complete(&self, run: &mut Run, token: &CancellationToken) -> Result<(), GantryError> {
        let blocking: Vec<&str> = run
            .jobs_with_status(JobStatus::Failed)
            .into_iter()
            .filter(|id| self.graph.job(id).is_some_and(|j| !j.continue_on_error))
            .collect();

        let (status, reason) = if token.is_cancelled() {
            (
                RunStatus::Failed,
                format!("cancelled: {}", token.reason().unwrap_or_default()),
            )
        } else if blocking.is_empty() {
            let succeeded = run.jobs_with_status(JobStatus::Succeeded).len();
            let skipped = run.jobs_with_status(JobStatus::Skipped).len();
            let tolerated = run.jobs_with_status(JobStatus::Failed).len();
            let mut reason = format!("{succeeded} succeeded, {skipped} skipped");
            if tolerated > 0 {
                reason.push_str(&format!(", {tolerated} failed (tolerated)"));
            }
            (RunStatus::Succeeded, reason)
        } else {
            (RunStatus::Failed, format!("failed jobs: {}", blocking.join(", ")))
        };

        run.finish(status, reason.clone())?;
        info!(run_id = %run.run_id, status = %status, reason = %reason, "Run completed");
        self.events
            .emit(
                kinds::RUN_COMPLETED,
                Some(json!({"run_id": run.run_id, "status": status, "reason": reason})),
            )
            .await;
        self.persist(run).await;
        Ok(())
    }

    async fn persist(&self, run: &Run) {
        if let Some(store) = &self.run_store {
            if let Err(err) = store.save(run).await {
                warn!(run_id = %run.run_id, error = %err, "Failed to persist run");
            }
        }
    }
}

/// Everything a spawned job task owns.
struct JobTask {
    base: JobContext,
    inputs: Vec<(InputSpec, Option<ArtifactRef>)>,
    runner: Arc<dyn StepRunner>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    retry: RetryConfig,
    store_retry: RetryConfig,
    timeout: Option<Duration>,
}

impl JobTask {
    async fn run(self) -> JobOutcome {
        let attempts = AtomicU32::new(0);
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute(&attempts)).await {
                Ok(outcome) => outcome,
                Err(_) => JobOutcome::failed(
                    JobFailure::Timeout {
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    },
                    None,
                    attempts.load(Ordering::SeqCst),
                ),
            },
            None => self.execute(&attempts).await,
        }
    }

    async fn execute(&self, attempts: &AtomicU32) -> JobOutcome {
        let inputs = match self.fetch_inputs().await {
            Ok(inputs) => inputs,
            Err(failure) => return JobOutcome::failed(failure, None, 0),
        };
        let base = self.base.clone().with_inputs(inputs);
        let token = Arc::clone(&base.token);
        let job_id = base.job_id().to_string();

        let result = with_retry(&self.retry, &job_id, &token, StepError::is_transient, |attempt| {
            attempts.store(attempt, Ordering::SeqCst);
            let ctx = base.for_attempt(attempt);
            let runner = Arc::clone(&self.runner);
            let events = Arc::clone(&self.events);
            async move {
                if attempt > 1 {
                    events.try_emit(
                        kinds::JOB_RETRYING,
                        Some(json!({"run_id": ctx.run_id, "job": ctx.job_id(), "attempt": attempt})),
                    );
                }
                runner.run(&ctx).await
            }
        })
        .await;

        let (outcome, tries) = match result {
            Ok(retried) => (retried.value, retried.attempts),
            Err(err) => return JobOutcome::failed(step_failure(err), None, attempts.load(Ordering::SeqCst)),
        };

        if !outcome.is_success() {
            return JobOutcome::failed(
                JobFailure::NonZeroExit {
                    code: outcome.exit_code,
                    message: outcome.message,
                },
                Some(outcome.exit_code),
                tries,
            );
        }

        match self.publish(outcome).await {
            Ok(outputs) => JobOutcome::Succeeded {
                exit_code: 0,
                attempts: tries,
                outputs,
            },
            Err(failure) => JobOutcome::failed(failure, Some(0), tries),
        }
    }

    async fn fetch_inputs(&self) -> Result<BTreeMap<String, ResolvedInput>, JobFailure> {
        let token = &self.base.token;
        let mut resolved = BTreeMap::new();
        for (spec, reference) in &self.inputs {
            let Some(reference) = reference else {
                if spec.optional {
                    debug!(job = %self.base.job_id(), input = %spec.name, "Optional input absent");
                    continue;
                }
                return Err(JobFailure::ArtifactNotFound {
                    name: spec.name.clone(),
                    key: format!("{}/{}", spec.job, spec.name),
                });
            };

            let fetched = with_retry(
                &self.store_retry,
                &reference.key,
                token,
                StoreError::is_transient,
                |_| self.store.get(reference),
            )
            .await;
            match fetched {
                Ok(retried) => {
                    resolved.insert(
                        spec.name.clone(),
                        ResolvedInput {
                            reference: reference.clone(),
                            bytes: Arc::from(retried.value),
                        },
                    );
                }
                Err(RetryError::Permanent {
                    error: StoreError::NotFound { .. },
                    ..
                }) if spec.optional => {
                    debug!(job = %self.base.job_id(), input = %spec.name, "Optional input not in store");
                }
                Err(err) => return Err(store_failure(err, &spec.name, &reference.key)),
            }
        }
        Ok(resolved)
    }

    async fn publish(&self, outcome: StepOutcome) -> Result<Vec<ArtifactRef>, JobFailure> {
        let token = &self.base.token;
        let job = &self.base.job;
        let mut produced: HashMap<String, Vec<u8>> =
            outcome.outputs.into_iter().map(|o| (o.name, o.bytes)).collect();

        let mut published = Vec::with_capacity(job.outputs.len());
        for name in &job.outputs {
            if token.is_cancelled() {
                return Err(JobFailure::Cancelled);
            }
            let bytes = produced
                .remove(name)
                .ok_or_else(|| JobFailure::MissingOutput { name: name.clone() })?;

            let stored = with_retry(&self.store_retry, name, token, StoreError::is_transient, |_| {
                self.store.put(&bytes, &job.id, name)
            })
            .await;
            match stored {
                Ok(retried) => published.push(retried.value),
                Err(err) => return Err(store_failure(err, name, "")),
            }
        }

        for extra in produced.keys() {
            debug!(job = %job.id, output = %extra, "Ignoring undeclared output");
        }
        Ok(published)
    }
}

fn step_failure(err: RetryError<StepError>) -> JobFailure {
    match err {
        RetryError::Cancelled { .. }
        | RetryError::Permanent {
            error: StepError::Cancelled,
            ..
        } => JobFailure::Cancelled,
        RetryError::Exhausted { attempts, error } => JobFailure::RetriesExhausted {
            attempts,
            message: error.to_string(),
        },
        RetryError::Permanent { error, .. } => JobFailure::StepError {
            message: error.to_string(),
        },
    }
}

fn store_failure(err: RetryError<StoreError>, name: &str, key: &str) -> JobFailure {
    match err {
        RetryError::Cancelled { .. } => JobFailure::Cancelled,
        RetryError::Exhausted { attempts, error } => JobFailure::RetriesExhausted {
            attempts,
            message: error.to_string(),
        },
        RetryError::Permanent {
            error: StoreError::NotFound { key: missing } | StoreError::Corrupt { key: missing, .. },
            ..
        } => JobFailure::ArtifactNotFound {
            name: name.to_string(),
            key: if key.is_empty() { missing } else { key.to_string() },
        },
        RetryError::Permanent { error, .. } => JobFailure::StepError {
            message: error.to_string(),
        },
    }
}
