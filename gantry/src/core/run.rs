//! The run record and per-job state.
//!
//! A [`Run`] is created by the trigger, mutated only by the scheduler, and
//! becomes immutable once its status leaves `Running`. Every mutation goes
//! through a method that checks the transition is legal.

use super::{ArtifactRef, JobStatus, RunStatus};
use crate::errors::{JobFailure, TransitionError};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Execution state of one job within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    /// Current status.
    pub status: JobStatus,
    /// When the job was dispatched.
    pub started_at: Option<Timestamp>,
    /// When the job was finalized.
    pub finished_at: Option<Timestamp>,
    /// The step's exit code, when it ran to completion.
    pub exit_code: Option<i32>,
    /// Number of step attempts made.
    #[serde(default)]
    pub attempts: u32,
    /// Human-readable reason for any non-success.
    pub reason: Option<String>,
    /// Typed failure cause.
    pub failure: Option<JobFailure>,
    /// Artifacts the job published.
    #[serde(default)]
    pub outputs: Vec<ArtifactRef>,
}

impl JobState {
    /// Returns the published output with the given name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&ArtifactRef> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// One execution of a full job graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run id.
    pub run_id: String,
    /// The pipeline name.
    pub pipeline: String,
    /// The ref or tag that triggered the run.
    pub trigger_ref: String,
    /// Overall status.
    pub status: RunStatus,
    /// Per-job state.
    pub job_states: BTreeMap<String, JobState>,
    /// Topological order used for scheduling and reporting.
    pub topological_order: Vec<String>,
    /// When the run was created.
    pub created_at: Timestamp,
    /// When the run was finalized.
    pub finished_at: Option<Timestamp>,
    /// Summary of the outcome.
    pub reason: Option<String>,
    /// Environments the run has been deployed to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub promoted_to: BTreeSet<String>,
}

impl Run {
    /// Creates a pending run with every job `Queued`.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        pipeline: impl Into<String>,
        trigger_ref: impl Into<String>,
        topological_order: Vec<String>,
    ) -> Self {
        let job_states = topological_order
            .iter()
            .map(|id| (id.clone(), JobState::default()))
            .collect();

        Self {
            run_id: run_id.into(),
            pipeline: pipeline.into(),
            trigger_ref: trigger_ref.into(),
            status: RunStatus::Pending,
            job_states,
            topological_order,
            created_at: now_utc(),
            finished_at: None,
            reason: None,
            promoted_to: BTreeSet::new(),
        }
    }

    /// Returns a job's state.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<&JobState> {
        self.job_states.get(id)
    }

    /// Returns a job's status.
    #[must_use]
    pub fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.job_states.get(id).map(|s| s.status)
    }

    /// Returns true once the run is immutable.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns ids of jobs with the given status, in topological order.
    #[must_use]
    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<&str> {
        self.topological_order
            .iter()
            .filter(|id| self.job_status(id) == Some(status))
            .map(String::as_str)
            .collect()
    }

    /// Returns every artifact published by a succeeded job, in topological order.
    #[must_use]
    pub fn artifacts(&self) -> Vec<&ArtifactRef> {
        self.topological_order
            .iter()
            .filter_map(|id| self.job_states.get(id))
            .filter(|s| s.status == JobStatus::Succeeded)
            .flat_map(|s| s.outputs.iter())
            .collect()
    }

    /// Moves the run from `Pending` to `Running`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status != RunStatus::Pending {
            return Err(TransitionError::new(&self.run_id, self.status, RunStatus::Running));
        }
        self.status = RunStatus::Running;
        Ok(())
    }

    /// Moves a job from `Queued` to `Running`.
    pub fn mark_running(&mut self, job: &str) -> Result<(), TransitionError> {
        self.ensure_running(job, JobStatus::Running)?;
        let state = self.state_mut(job, JobStatus::Running)?;
        if state.status != JobStatus::Queued {
            return Err(TransitionError::new(job, state.status, JobStatus::Running));
        }
        state.status = JobStatus::Running;
        state.started_at = Some(now_utc());
        Ok(())
    }

    /// Finalizes a running job as `Succeeded`.
    pub fn mark_succeeded(
        &mut self,
        job: &str,
        exit_code: i32,
        attempts: u32,
        outputs: Vec<ArtifactRef>,
    ) -> Result<(), TransitionError> {
        let state = self.running_state_mut(job, JobStatus::Succeeded)?;
        state.status = JobStatus::Succeeded;
        state.exit_code = Some(exit_code);
        state.attempts = attempts;
        state.outputs = outputs;
        state.finished_at = Some(now_utc());
        Ok(())
    }

    /// Finalizes a running job as `Failed`.
    pub fn mark_failed(
        &mut self,
        job: &str,
        failure: JobFailure,
        exit_code: Option<i32>,
        attempts: u32,
    ) -> Result<(), TransitionError> {
        let state = self.running_state_mut(job, JobStatus::Failed)?;
        state.status = JobStatus::Failed;
        state.exit_code = exit_code;
        state.attempts = attempts;
        state.reason = Some(failure.to_string());
        state.failure = Some(failure);
        state.finished_at = Some(now_utc());
        Ok(())
    }

    /// Finalizes a queued job as `Skipped`. Skipped jobs never ran.
    pub fn mark_skipped(&mut self, job: &str, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_running(job, JobStatus::Skipped)?;
        let state = self.state_mut(job, JobStatus::Skipped)?;
        if state.status != JobStatus::Queued {
            return Err(TransitionError::new(job, state.status, JobStatus::Skipped));
        }
        state.status = JobStatus::Skipped;
        state.reason = Some(reason.into());
        state.finished_at = Some(now_utc());
        Ok(())
    }

    /// Finalizes the run. The record is immutable afterwards.
    pub fn finish(&mut self, status: RunStatus, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != RunStatus::Running || !status.is_terminal() {
            return Err(TransitionError::new(&self.run_id, self.status, status));
        }
        if let Some(id) = self
            .topological_order
            .iter()
            .find(|id| self.job_status(id).is_some_and(|s| !s.is_terminal()))
        {
            return Err(TransitionError::new(
                id.clone(),
                self.job_status(id).unwrap_or_default(),
                status,
            ));
        }
        self.status = status;
        self.reason = Some(reason.into());
        self.finished_at = Some(now_utc());
        Ok(())
    }

    /// Records a deployment to `environment`. Only succeeded runs can be
    /// promoted; returns false if the environment was already recorded.
    pub fn record_promotion(&mut self, environment: &str) -> Result<bool, TransitionError> {
        if self.status != RunStatus::Succeeded {
            return Err(TransitionError::new(
                &self.run_id,
                self.status,
                format!("promoted to {environment}"),
            ));
        }
        Ok(self.promoted_to.insert(environment.to_string()))
    }

    /// Closes out a run that was still in flight when the process stopped.
    ///
    /// Running jobs become `Failed` (interrupted) and queued jobs `Skipped`.
    /// Returns false when the run had already finished.
    pub fn mark_interrupted(&mut self, message: &str) -> bool {
        if self.is_finished() {
            return false;
        }
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
        }
        let now = now_utc();
        for state in self.job_states.values_mut() {
            match state.status {
                JobStatus::Running => {
                    let failure = JobFailure::Interrupted {
                        message: message.to_string(),
                    };
                    state.status = JobStatus::Failed;
                    state.reason = Some(failure.to_string());
                    state.failure = Some(failure);
                    state.finished_at = Some(now);
                }
                JobStatus::Queued => {
                    state.status = JobStatus::Skipped;
                    state.reason = Some(format!("interrupted: {message}"));
                    state.finished_at = Some(now);
                }
                JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped => {}
            }
        }
        self.status = RunStatus::Failed;
        self.reason = Some(format!("interrupted: {message}"));
        self.finished_at = Some(now);
        true
    }

    fn ensure_running(&self, job: &str, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == RunStatus::Running {
            Ok(())
        } else {
            Err(TransitionError::new(
                format!("{}/{job}", self.run_id),
                self.status,
                to,
            ))
        }
    }

    fn state_mut(&mut self, job: &str, to: JobStatus) -> Result<&mut JobState, TransitionError> {
        self.job_states
            .get_mut(job)
            .ok_or_else(|| TransitionError::new(job, "unknown", to))
    }

    fn running_state_mut(&mut self, job: &str, to: JobStatus) -> Result<&mut JobState, TransitionError> {
        self.ensure_running(job, to)?;
        let state = self.state_mut(job, to)?;
        if state.status != JobStatus::Running {
            return Err(TransitionError::new(job, state.status, to));
        }
        Ok(state)
    }
}
