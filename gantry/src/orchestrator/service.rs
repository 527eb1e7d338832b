//! The orchestrator facade.

use super::RunRequest;
use crate::artifacts::{ArtifactStore, FsArtifactStore};
use crate::cancellation::CancellationToken;
use crate::config::GantryConfig;
use crate::core::Run;
use crate::errors::{DeployError, GantryError, PersistenceError};
use crate::events::{kinds, EventSink, LoggingEventSink};
use crate::executor::{Scheduler, SchedulerOptions, StepDispatcher, StepRunner};
use crate::graph::GraphBuilder;
use crate::observability::SpanTimer;
use crate::persistence::{FsRunStore, RunStore};
use crate::promotion::{DeployArtifact, DeployReceipt, DeployTarget, PromotionDecision, PromotionGate, PromotionPolicy};
use crate::utils::generate_run_id;
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What [`Orchestrator::promote`] did.
#[derive(Debug, Clone)]
pub struct Promotion {
    /// The gate's decision.
    pub decision: PromotionDecision,
    /// The target's receipt, present only when the decision was approved.
    pub receipt: Option<DeployReceipt>,
}

impl Promotion {
    /// Returns true if the artifacts were deployed.
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        self.receipt.is_some()
    }
}

/// Ties the trigger interface, scheduler, stores and promotion gate together.
pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    runner: Arc<dyn StepRunner>,
    run_store: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
    options: SchedulerOptions,
    policy: PromotionPolicy,
    gate: PromotionGate,
    deploy: Option<Arc<dyn DeployTarget>>,
    active: DashMap<String, Arc<CancellationToken>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("run_store", &self.run_store)
            .field("options", &self.options)
            .field("policy", &self.policy)
            .field("has_deploy_target", &self.deploy.is_some())
            .field("active_runs", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default options, a permissive policy,
    /// a logging event sink and no deploy target.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>, runner: Arc<dyn StepRunner>, run_store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            runner,
            run_store,
            events: Arc::new(LoggingEventSink::default()),
            options: SchedulerOptions::default(),
            policy: PromotionPolicy::default(),
            gate: PromotionGate::new(),
            deploy: None,
            active: DashMap::new(),
        }
    }

    /// Builds an orchestrator backed by the filesystem stores named in
    /// `config`. Deploy steps and promotions use `deploy` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a store directory
    /// cannot be created.
    pub async fn from_config(
        config: &GantryConfig,
        deploy: Option<Arc<dyn DeployTarget>>,
    ) -> Result<Self, GantryError> {
        config.validate()?;
        let store = FsArtifactStore::open(&config.artifact_dir).await?;
        let run_store = FsRunStore::open(&config.run_dir).await?;

        let mut runner = StepDispatcher::new();
        if let Some(target) = &deploy {
            runner = runner.with_deploy_target(Arc::clone(target));
        }

        let mut orchestrator = Self::new(Arc::new(store), Arc::new(runner), Arc::new(run_store))
            .with_options(config.scheduler_options())
            .with_policy(config.promotion.clone());
        orchestrator.deploy = deploy;
        Ok(orchestrator)
    }

    /// Sets the scheduler options.
    #[must_use]
    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the promotion policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PromotionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the target promotions deploy to.
    #[must_use]
    pub fn with_deploy_target(mut self, target: Arc<dyn DeployTarget>) -> Self {
        self.deploy = Some(target);
        self
    }

    /// Returns the promotion policy.
    #[must_use]
    pub fn policy(&self) -> &PromotionPolicy {
        &self.policy
    }

    /// Returns the promotion gate.
    #[must_use]
    pub fn gate(&self) -> &PromotionGate {
        &self.gate
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Runs a pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be loaded or fail graph
    /// validation, in which case no job runs, or if the run cannot be
    /// persisted at creation.
    pub async fn trigger(&self, request: RunRequest) -> Result<Run, GantryError> {
        self.trigger_with_token(request, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs a pipeline under a caller-owned cancellation token.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::trigger`].
    pub async fn trigger_with_token(
        &self,
        request: RunRequest,
        token: Arc<CancellationToken>,
    ) -> Result<Run, GantryError> {
        let jobs = request.jobs.load().await?;
        let graph = GraphBuilder::new(request.pipeline.as_str()).jobs(jobs).build()?;

        let scheduler = Scheduler::new(Arc::new(graph), Arc::clone(&self.runner), Arc::clone(&self.store))
            .with_options(self.options.clone())
            .with_events(Arc::clone(&self.events))
            .with_run_store(Arc::clone(&self.run_store));

        let run_id = request.run_id.unwrap_or_else(generate_run_id);
        let mut run = scheduler.new_run(run_id.as_str(), request.trigger_ref);
        self.run_store.save(&run).await?;

        let timer = SpanTimer::start("run");
        self.active.insert(run_id.clone(), Arc::clone(&token));
        let executed = scheduler.execute(&mut run, token).await;
        self.active.remove(&run_id);
        executed?;

        info!(
            run_id = %run.run_id,
            status = %run.status,
            duration_ms = timer.elapsed_ms(),
            "Run finished"
        );
        Ok(run)
    }

    /// Cancels an in-flight run. Returns false if no such run is active.
    pub fn cancel(&self, run_id: &str, reason: &str) -> bool {
        match self.active.get(run_id) {
            Some(token) => {
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Returns the ids of runs currently executing.
    #[must_use]
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Evaluates a finished run for promotion to `target`.
    ///
    /// Rungs recorded on the persisted run are loaded into the ledger first,
    /// so a restarted orchestrator continues the ladder where it stopped.
    pub async fn evaluate(&self, run: &Run, target: &str) -> PromotionDecision {
        self.restore_promotions(run).await;
        let decision = self.gate.evaluate(run, &self.policy, target);
        self.events
            .emit(
                kinds::PROMOTION_EVALUATED,
                Some(json!({
                    "run_id": run.run_id,
                    "environment": target,
                    "approved": decision.approved,
                    "reason": decision.reason,
                })),
            )
            .await;
        decision
    }

    /// Evaluates `run` and, only if approved, deploys its artifacts to
    /// `target` and records the rung in the ledger.
    ///
    /// A denial is not an error: the returned [`Promotion`] carries the
    /// decision and no receipt.
    ///
    /// # Errors
    ///
    /// Returns an error if an artifact cannot be read back or the deploy
    /// target fails, in which case the ledger is not updated. Also fails if
    /// the reached rung cannot be written to the run store.
    pub async fn promote(&self, run: &Run, target: &str) -> Result<Promotion, GantryError> {
        let decision = self.evaluate(run, target).await;
        if !decision.approved {
            info!(run_id = %run.run_id, target = %target, reason = %decision.reason, "Promotion denied");
            return Ok(Promotion {
                decision,
                receipt: None,
            });
        }

        let deploy = self.deploy.as_ref().ok_or_else(|| DeployError::Rejected {
            environment: target.to_string(),
            message: "no deploy target configured".to_string(),
        })?;

        let mut seen = BTreeSet::new();
        let mut artifacts = Vec::new();
        for reference in run.artifacts() {
            if !seen.insert((reference.name.as_str(), reference.key.as_str())) {
                continue;
            }
            let bytes = self.store.get(reference).await?;
            artifacts.push(DeployArtifact {
                name: reference.name.clone(),
                key: reference.key.clone(),
                bytes,
            });
        }

        let receipt = deploy.deploy(target, &artifacts).await?;
        self.gate.record_promotion(&decision);
        self.persist_promotion(run, target).await?;
        info!(
            run_id = %run.run_id,
            target = %target,
            deployment_id = %receipt.deployment_id,
            artifacts = artifacts.len(),
            "Promotion deployed"
        );
        self.events
            .emit(
                kinds::PROMOTION_DEPLOYED,
                Some(json!({
                    "run_id": run.run_id,
                    "environment": target,
                    "deployment_id": receipt.deployment_id,
                    "artifacts": receipt.artifacts,
                })),
            )
            .await;

        Ok(Promotion {
            decision,
            receipt: Some(receipt),
        })
    }

    /// Loads a persisted run.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::NotFound` if no run has that id.
    pub async fn audit(&self, run_id: &str) -> Result<Run, GantryError> {
        Ok(self.run_store.load(run_id).await?)
    }

    /// Closes out runs that were still in flight when the process last
    /// stopped. Returns the ids of the runs that were closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the run store cannot be listed, read or written.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, GantryError> {
        let mut recovered = Vec::new();
        for run_id in self.run_store.list().await? {
            if self.active.contains_key(&run_id) {
                continue;
            }
            let mut run = self.run_store.load(&run_id).await?;
            if run.mark_interrupted("orchestrator restarted") {
                self.run_store.save(&run).await?;
                warn!(run_id = %run_id, "Closed out interrupted run");
                recovered.push(run_id);
            }
        }
        Ok(recovered)
    }

    async fn restore_promotions(&self, run: &Run) {
        let ledger = self.gate.ledger();
        for env in &run.promoted_to {
            ledger.record(&run.run_id, env);
        }
        match self.run_store.load(&run.run_id).await {
            Ok(record) => {
                for env in &record.promoted_to {
                    ledger.record(&run.run_id, env);
                }
            }
            Err(PersistenceError::NotFound(_) | PersistenceError::InvalidId(_)) => {}
            Err(err) => warn!(run_id = %run.run_id, error = %err, "Could not load promotion history"),
        }
    }

    async fn persist_promotion(&self, run: &Run, target: &str) -> Result<(), GantryError> {
        let mut record = match self.run_store.load(&run.run_id).await {
            Ok(record) => record,
            Err(PersistenceError::NotFound(_)) => run.clone(),
            Err(err) => return Err(err.into()),
        };
        if record.record_promotion(target)? {
            self.run_store.save(&record).await?;
            debug!(run_id = %run.run_id, environment = %target, "Promotion persisted");
        }
        Ok(())
    }
}
