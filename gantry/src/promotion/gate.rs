//! The promotion gate.

use super::{PromotionDecision, PromotionPolicy};
use crate::core::{JobStatus, Run, RunStatus};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Which environments each run has been promoted to.
#[derive(Debug, Default)]
pub struct PromotionLedger {
    promoted: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl PromotionLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `run_id` reached `environment`. Returns false if it
    /// already had.
    pub fn record(&self, run_id: &str, environment: &str) -> bool {
        self.promoted
            .write()
            .entry(run_id.to_string())
            .or_default()
            .insert(environment.to_string())
    }

    /// Returns true if `run_id` has reached `environment`.
    #[must_use]
    pub fn has_reached(&self, run_id: &str, environment: &str) -> bool {
        self.promoted
            .read()
            .get(run_id)
            .is_some_and(|envs| envs.contains(environment))
    }

    /// Returns the environments `run_id` has reached.
    #[must_use]
    pub fn environments(&self, run_id: &str) -> BTreeSet<String> {
        self.promoted.read().get(run_id).cloned().unwrap_or_default()
    }
}

/// Decides whether finished runs may advance to an environment.
///
/// Evaluation reads the run, the policy and the ledger and nothing else, so
/// the same inputs always produce the same decision.
#[derive(Debug, Default)]
pub struct PromotionGate {
    ledger: PromotionLedger,
}

impl PromotionGate {
    /// Creates a gate with an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &PromotionLedger {
        &self.ledger
    }

    /// Evaluates `run` for promotion to `target`.
    #[must_use]
    pub fn evaluate(&self, run: &Run, policy: &PromotionPolicy, target: &str) -> PromotionDecision {
        let mut problems = Vec::new();

        if run.status != RunStatus::Succeeded {
            problems.push(format!("run status is {}", run.status));
        }

        let failing: Vec<String> = policy
            .required_checks
            .iter()
            .filter_map(|check| match run.job_status(check) {
                Some(JobStatus::Succeeded) => None,
                Some(status) => Some(format!("{check} ({status})")),
                None => Some(format!("{check} (missing)")),
            })
            .collect();
        if !failing.is_empty() {
            problems.push(format!("required checks not passed: {}", failing.join(", ")));
        }

        if !policy.required_environments.is_empty() {
            if policy.required_environments.iter().any(|e| e == target) {
                if let Some(previous) = policy.previous_environment(target) {
                    if !self.ledger.has_reached(&run.run_id, previous) {
                        problems.push(format!("run has not been promoted to {previous}"));
                    }
                }
            } else {
                problems.push(format!("environment {target} is not in the promotion ladder"));
            }
        }

        if policy.require_tag {
            match policy.is_release_tag(&run.trigger_ref) {
                Ok(true) => {}
                Ok(false) => problems.push(format!("ref {} is not a release tag", run.trigger_ref)),
                Err(_) => problems.push(format!("tag pattern {:?} does not compile", policy.tag_pattern)),
            }
        }

        let approved = problems.is_empty();
        let reason = if approved {
            format!("all {} required checks passed", policy.required_checks.len())
        } else {
            problems.join("; ")
        };

        debug!(run_id = %run.run_id, target = %target, approved, reason = %reason, "Promotion evaluated");
        PromotionDecision {
            run: run.clone(),
            target_environment: target.to_string(),
            approved,
            reason,
        }
    }

    /// Returns the lowest rung of the ladder `run` has not reached yet.
    #[must_use]
    pub fn next_environment<'p>(&self, run: &Run, policy: &'p PromotionPolicy) -> Option<&'p str> {
        policy
            .required_environments
            .iter()
            .find(|env| !self.ledger.has_reached(&run.run_id, env))
            .map(String::as_str)
    }

    /// Records a completed promotion. Only approved decisions are recorded;
    /// returns whether the ledger changed.
    pub fn record_promotion(&self, decision: &PromotionDecision) -> bool {
        decision.approved
            && self
                .ledger
                .record(&decision.run.run_id, &decision.target_environment)
    }
}
