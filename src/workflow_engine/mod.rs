#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

mod debrief;
mod intake;

use crate::bus::InstructionBus;
use crate::config::{SaturationPolicy, ServerConfig};
use crate::error::{CrewError, Result};
use crate::evolution::EvolutionEngine;
use crate::metrics::Metrics;
use crate::runner::{CancelSignal, CrewRunner, KickoffRequest, LiveContext};
use crate::store::{AuditPhase, AuditRecord, Store};
use crate::types::{
    AgentProfile, Crew, CrewId, CrewOutcome, CrewState, IdMinter, Workflow, WorkflowId,
    WorkflowState,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

struct ActiveWorkflow {
    crew_id: CrewId,
    cancel: CancelSignal,
}

/// Drives the per-crew execution state machine.
///
/// One workflow occupies one worker-pool permit for its whole `Executing`
/// state; an intake task runs beside the blocking kickoff and feeds it
/// drained instructions. Every state transition is persisted before the
/// next step proceeds.
pub struct WorkflowEngine {
    store: Store,
    runner: Arc<dyn CrewRunner>,
    bus: Arc<InstructionBus>,
    evolution: Arc<EvolutionEngine>,
    config: Arc<RwLock<Arc<ServerConfig>>>,
    metrics: Arc<Metrics>,
    ids: Arc<IdMinter>,
    pool: Arc<Semaphore>,
    active: Mutex<HashMap<String, ActiveWorkflow>>,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(
        store: Store,
        runner: Arc<dyn CrewRunner>,
        bus: Arc<InstructionBus>,
        evolution: Arc<EvolutionEngine>,
        config: Arc<RwLock<Arc<ServerConfig>>>,
        metrics: Arc<Metrics>,
        ids: Arc<IdMinter>,
    ) -> Self {
        let slots = Self::read_config(&config).max_concurrent_workflows;
        Self {
            store,
            runner,
            bus,
            evolution,
            config,
            metrics,
            ids,
            pool: Arc::new(Semaphore::new(slots)),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn read_config(config: &Arc<RwLock<Arc<ServerConfig>>>) -> Arc<ServerConfig> {
        match config.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn current_config(&self) -> Arc<ServerConfig> {
        Self::read_config(&self.config)
    }

    #[must_use]
    pub fn worker_slots_free(&self) -> usize {
        self.pool.available_permits()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        match self.active.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn register_active(&self, workflow_id: &WorkflowId, entry: ActiveWorkflow) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.insert(workflow_id.value().to_string(), entry);
    }

    fn unregister_active(&self, workflow_id: &WorkflowId) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(workflow_id.value());
    }

    fn cancel_handle_for_crew(&self, crew_id: &CrewId) -> Option<(WorkflowId, CancelSignal)> {
        let active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active
            .iter()
            .find(|(_, entry)| &entry.crew_id == crew_id)
            .map(|(id, entry)| (WorkflowId::new(id.clone()), entry.cancel.clone()))
    }

    /// Starts a workflow for the crew: conflict-checks, prepares, then
    /// hands execution to a background driver and returns immediately.
    ///
    /// # Errors
    /// `Conflict` when the crew already has a non-terminal workflow,
    /// `Misconfigured` when agent or task references do not resolve.
    pub async fn start(
        self: Arc<Self>,
        crew: Crew,
        context: Value,
        allow_evolution: bool,
    ) -> Result<Workflow> {
        if let Some(open) = self.store.find_open_workflow(&crew.id).await? {
            return Err(CrewError::Conflict(format!(
                "crew {} already has workflow {} in state {}",
                crew.id, open.id, open.state
            )));
        }
        if crew.state == CrewState::Disbanded {
            return Err(CrewError::Conflict(format!(
                "crew {} is disbanded",
                crew.id
            )));
        }

        let mut workflow = Workflow::new(
            self.ids.workflow_id(),
            crew.id.clone(),
            context,
            allow_evolution,
        );
        self.store.put_workflow(&workflow).await?;

        // Preparing: bind context and resolve every agent reference before
        // a worker slot is committed.
        self.transition(&mut workflow, WorkflowState::Preparing)
            .await?;
        let agents = match self.load_agents(&crew).await {
            Ok(agents) => agents,
            Err(err) => {
                workflow.failure = Some(err.sanitized_message());
                self.seal(&mut workflow, WorkflowState::Failed).await?;
                return Err(err);
            }
        };

        self.store
            .set_crew_state(&crew.id, CrewState::Running)
            .await?;
        Metrics::incr(&self.metrics.workflows_started);

        let engine = Arc::clone(&self);
        let driver_workflow = workflow.clone();
        tokio::spawn(async move {
            engine.drive(driver_workflow, crew, agents).await;
        });
        Ok(workflow)
    }

    async fn load_agents(&self, crew: &Crew) -> Result<Vec<AgentProfile>> {
        if crew.agent_ids.is_empty() {
            return Err(CrewError::Misconfigured(format!(
                "crew {} has no agents",
                crew.id
            )));
        }
        if crew.tasks.is_empty() {
            return Err(CrewError::Misconfigured(format!(
                "crew {} has no tasks",
                crew.id
            )));
        }
        let mut agents = Vec::with_capacity(crew.agent_ids.len());
        for agent_id in &crew.agent_ids {
            match self.store.get_agent(agent_id).await {
                Ok(agent) => agents.push(agent),
                Err(CrewError::NotFound(_)) => {
                    return Err(CrewError::Misconfigured(format!(
                        "crew {} references unknown agent {agent_id}",
                        crew.id
                    )))
                }
                Err(err) => return Err(err),
            }
        }
        for (index, task) in crew.tasks.iter().enumerate() {
            if let Some(assigned) = &task.assigned_agent {
                if !crew.agent_ids.contains(assigned) {
                    return Err(CrewError::Misconfigured(format!(
                        "task {index} is assigned to {assigned}, not a crew member"
                    )));
                }
            }
        }
        Ok(agents)
    }

    /// Background driver: occupies a worker slot for the whole kickoff,
    /// runs the intake loop alongside it, then debriefs or seals.
    async fn drive(self: Arc<Self>, mut workflow: Workflow, crew: Crew, agents: Vec<AgentProfile>) {
        let config = self.current_config();

        let permit = match config.saturation_policy {
            SaturationPolicy::Queue => {
                match tokio::time::timeout(
                    config.tool_deadline(),
                    Arc::clone(&self.pool).acquire_owned(),
                )
                .await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        self.fail_early(&mut workflow, &crew, "worker pool closed").await;
                        return;
                    }
                    Err(_) => {
                        self.fail_early(&mut workflow, &crew, "worker pool saturated")
                            .await;
                        return;
                    }
                }
            }
            SaturationPolicy::Reject => match Arc::clone(&self.pool).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.fail_early(&mut workflow, &crew, "worker pool saturated")
                        .await;
                    return;
                }
            },
        };

        if let Err(err) = self.transition(&mut workflow, WorkflowState::Executing).await {
            error!(workflow = %workflow.id, error = %err, "failed to enter executing");
            drop(permit);
            return;
        }

        let cancel = CancelSignal::new();
        let live = LiveContext::new();
        self.register_active(
            &workflow.id,
            ActiveWorkflow {
                crew_id: crew.id.clone(),
                cancel: cancel.clone(),
            },
        );

        let intake = tokio::spawn(intake::run(
            Arc::clone(&self),
            crew.id.clone(),
            workflow.id.clone(),
            live.clone(),
            cancel.clone(),
        ));

        let request = KickoffRequest {
            crew: crew.clone(),
            agents: agents.clone(),
            context: workflow.context.clone(),
            live: live.clone(),
            cancel: cancel.clone(),
        };
        let runner = Arc::clone(&self.runner);
        let mut kickoff = tokio::task::spawn_blocking(move || {
            let outcome = runner.kickoff(&request);
            (outcome, request.live)
        });

        let kickoff_result = tokio::select! {
            joined = &mut kickoff => Some(joined),
            () = cancel.cancelled() => {
                // Cooperative window: give the runner until the hard
                // deadline to notice the signal.
                match tokio::time::timeout(config.emergency_stop_deadline(), &mut kickoff).await {
                    Ok(joined) => Some(joined),
                    Err(_) => None,
                }
            }
        };

        intake.abort();

        match kickoff_result {
            None => {
                // Hard deadline: the worker slot is considered lost until
                // the runner eventually returns; the permit rides along
                // with the abandoned task.
                warn!(workflow = %workflow.id, "runner ignored cancellation, sealing at hard deadline");
                tokio::spawn(async move {
                    let _permit = permit;
                    let _ = kickoff.await;
                });
                workflow.cancellation_reason = Some("hard-deadline".to_string());
                let _ = self.finish_cancelled(&mut workflow, &crew).await;
            }
            Some(Err(join_err)) => {
                drop(permit);
                workflow.failure = Some(format!("runner task aborted: {join_err}"));
                let _ = self.finish_failed(&mut workflow, &crew).await;
            }
            Some(Ok((outcome, live))) => {
                drop(permit);
                match outcome {
                    Ok(outcome) if !cancel.is_cancelled() => {
                        let _ = self
                            .finish_completed(&mut workflow, &crew, &agents, outcome, &live)
                            .await;
                    }
                    Ok(_) | Err(CrewError::Cancelled(_)) => {
                        if workflow.cancellation_reason.is_none() {
                            workflow.cancellation_reason =
                                Some("emergency-stop".to_string());
                        }
                        let _ = self.finish_cancelled(&mut workflow, &crew).await;
                    }
                    Err(err) => {
                        workflow.failure = Some(err.to_string());
                        let _ = self.finish_failed(&mut workflow, &crew).await;
                    }
                }
            }
        }
    }

    async fn finish_completed(
        &self,
        workflow: &mut Workflow,
        crew: &Crew,
        agents: &[AgentProfile],
        outcome: CrewOutcome,
        live: &LiveContext,
    ) -> Result<()> {
        self.transition(workflow, WorkflowState::Debriefing).await?;
        self.store
            .set_crew_state(&crew.id, CrewState::Debriefing)
            .await?;

        let debrief = debrief::run(
            &self.store,
            &self.evolution,
            &self.current_config(),
            crew,
            agents,
            workflow,
            &outcome,
            live,
        )
        .await;
        if let Err(err) = debrief {
            // Debrief failures do not erase the runner's result, but the
            // workflow is not Completed either.
            workflow.failure = Some(format!("debrief failed: {}", err.sanitized_message()));
            workflow.result = Some(outcome);
            return self.finish_failed(workflow, crew).await;
        }

        workflow.result = Some(outcome);
        Metrics::incr(&self.metrics.workflows_completed);
        self.seal(workflow, WorkflowState::Completed).await?;
        self.store.set_crew_state(&crew.id, CrewState::Idle).await?;
        Ok(())
    }

    async fn finish_cancelled(&self, workflow: &mut Workflow, crew: &Crew) -> Result<()> {
        // The emergency-stop path may already have moved the stored row to
        // Cancelling with the submitter's reason; prefer that over the
        // driver's local copy.
        if let Ok(stored) = self.store.get_workflow(&workflow.id).await {
            if stored.state == WorkflowState::Cancelling {
                workflow.state = WorkflowState::Cancelling;
            }
            if workflow.cancellation_reason.is_none() {
                workflow.cancellation_reason = stored.cancellation_reason;
            }
        }
        if workflow.state != WorkflowState::Cancelling {
            self.transition(workflow, WorkflowState::Cancelling).await?;
        }
        Metrics::incr(&self.metrics.workflows_cancelled);
        self.seal(workflow, WorkflowState::Cancelled).await?;
        self.store.set_crew_state(&crew.id, CrewState::Idle).await?;
        Ok(())
    }

    async fn finish_failed(&self, workflow: &mut Workflow, crew: &Crew) -> Result<()> {
        Metrics::incr(&self.metrics.workflows_failed);
        self.seal(workflow, WorkflowState::Failed).await?;
        self.store.set_crew_state(&crew.id, CrewState::Idle).await?;
        Ok(())
    }

    async fn fail_early(&self, workflow: &mut Workflow, crew: &Crew, reason: &str) {
        workflow.failure = Some(reason.to_string());
        Metrics::incr(&self.metrics.workflows_failed);
        if let Err(err) = self.seal(workflow, WorkflowState::Failed).await {
            error!(workflow = %workflow.id, error = %err, "failed to seal workflow");
        }
        if let Err(err) = self.store.set_crew_state(&crew.id, CrewState::Idle).await {
            error!(crew = %crew.id, error = %err, "failed to reset crew state");
        }
    }

    /// Persists a non-terminal state transition.
    async fn transition(&self, workflow: &mut Workflow, next: WorkflowState) -> Result<()> {
        if !workflow.state.can_transition_to(next) {
            return Err(CrewError::Internal(format!(
                "illegal workflow transition {} -> {next}",
                workflow.state
            )));
        }
        workflow.state = next;
        self.store.put_workflow(workflow).await?;
        info!(workflow = %workflow.id, state = %next, "workflow transition");
        Ok(())
    }

    /// Seals a workflow into a terminal state and emits the audit summary.
    async fn seal(&self, workflow: &mut Workflow, terminal: WorkflowState) -> Result<()> {
        if !terminal.is_terminal() {
            return Err(CrewError::Internal(format!(
                "seal called with non-terminal state {terminal}"
            )));
        }
        if workflow.state != terminal {
            if !workflow.state.can_transition_to(terminal) {
                return Err(CrewError::Internal(format!(
                    "illegal workflow transition {} -> {terminal}",
                    workflow.state
                )));
            }
            workflow.state = terminal;
        }
        workflow.ended_at = Some(Utc::now());
        self.store.put_workflow(workflow).await?;
        self.unregister_active(&workflow.id);

        let outcome = match terminal {
            WorkflowState::Completed => "completed".to_string(),
            WorkflowState::Cancelled => format!(
                "cancelled: {}",
                workflow.cancellation_reason.as_deref().unwrap_or("unknown")
            ),
            _ => format!(
                "failed: {}",
                workflow.failure.as_deref().unwrap_or("unknown")
            ),
        };
        let record = AuditRecord {
            ts: Utc::now(),
            client_id: "system".to_string(),
            tool: "workflow".to_string(),
            phase: AuditPhase::WorkflowSealed,
            arg_hash: workflow.id.value().to_string(),
            outcome,
            latency_ms: Some(
                workflow
                    .ended_at
                    .map_or(0, |end| (end - workflow.started_at).num_milliseconds()),
            ),
        };
        self.store.append_audit(&record).await?;
        info!(workflow = %workflow.id, state = %terminal, "workflow sealed");
        Ok(())
    }

    /// Emergency-stop bypass routing: transitions the crew's in-flight
    /// workflow to `Cancelling` and fires its cancellation signal.
    ///
    /// Returns `true` when a workflow was (or already is) being cancelled,
    /// `false` when the crew has nothing running. Repeated stops on an
    /// already-cancelling workflow are no-ops.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn emergency_stop(&self, crew_id: &CrewId, reason: &str) -> Result<bool> {
        let Some((workflow_id, cancel)) = self.cancel_handle_for_crew(crew_id) else {
            return Ok(false);
        };
        let mut workflow = self.store.get_workflow(&workflow_id).await?;
        if workflow.state.is_terminal() || workflow.state == WorkflowState::Cancelling {
            // At most one emergency stop is honored.
            return Ok(true);
        }
        workflow.cancellation_reason = Some(reason.to_string());
        self.transition(&mut workflow, WorkflowState::Cancelling)
            .await?;
        cancel.cancel();
        warn!(workflow = %workflow_id, crew = %crew_id, reason, "emergency stop engaged");
        Ok(true)
    }

    pub(crate) fn bus(&self) -> &InstructionBus {
        &self.bus
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn instruction_poll_interval(&self) -> std::time::Duration {
        self.current_config().instruction_poll()
    }
}
