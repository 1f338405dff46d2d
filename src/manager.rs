use crate::bus::InstructionBus;
use crate::error::{CrewError, Result};
use crate::evolution::EvolutionEngine;
use crate::metrics::Metrics;
use crate::store::Store;
use crate::types::{
    AgentId, AgentProfile, Crew, CrewId, CrewSpec, CrewState, EvolutionTrigger, IdMinter,
    Instruction, InstructionKind, PersonalityPreset, TaskSpec, Workflow,
};
use crate::workflow_engine::WorkflowEngine;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Trait axes a balanced crew is expected to cover.
const ESSENTIAL_AXES: &[&str] = &["analytical", "creative", "collaborative"];

/// Catalog of crews and their agents: creation, execution hand-off,
/// instruction routing, and introspection queries.
pub struct CrewManager {
    store: Store,
    engine: Arc<WorkflowEngine>,
    bus: Arc<InstructionBus>,
    evolution: Arc<EvolutionEngine>,
    ids: Arc<IdMinter>,
    metrics: Arc<Metrics>,
}

impl CrewManager {
    #[must_use]
    pub fn new(
        store: Store,
        engine: Arc<WorkflowEngine>,
        bus: Arc<InstructionBus>,
        evolution: Arc<EvolutionEngine>,
        ids: Arc<IdMinter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            engine,
            bus,
            evolution,
            ids,
            metrics,
        }
    }

    /// Materializes agents and persists a new crew from a declarative
    /// spec.
    ///
    /// # Errors
    /// `InvalidArgument` for empty or out-of-range fields, `Misconfigured`
    /// for dangling references, `Conflict` for duplicate names.
    pub async fn create_crew(&self, spec: CrewSpec) -> Result<(CrewId, Vec<AgentId>)> {
        if spec.crew_name.trim().is_empty() {
            return Err(CrewError::InvalidArgument(
                "crew_name must not be empty".to_string(),
            ));
        }
        if spec.agents_config.is_empty() {
            return Err(CrewError::InvalidArgument(
                "agents_config must contain at least one agent".to_string(),
            ));
        }
        if spec.tasks.is_empty() {
            return Err(CrewError::InvalidArgument(
                "tasks must contain at least one task".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&spec.autonomy_level) {
            return Err(CrewError::InvalidArgument(
                "autonomy_level must be within [0, 1]".to_string(),
            ));
        }

        let mut agents = Vec::with_capacity(spec.agents_config.len());
        for agent_spec in &spec.agents_config {
            if let Some(existing) = &agent_spec.existing_agent_id {
                // Reattach: memory and traits carry over from past crews.
                let agent = self.store.get_agent(&AgentId::new(existing.clone())).await?;
                agents.push(agent);
                continue;
            }
            let mut agent = AgentProfile::new(
                self.ids.agent_id(),
                agent_spec.role.clone(),
                agent_spec.goal.clone(),
                agent_spec.backstory.clone(),
            );
            if let Some(preset_name) = &agent_spec.personality_preset {
                let preset = PersonalityPreset::try_from(preset_name.as_str())
                    .map_err(CrewError::InvalidArgument)?;
                agent.apply_preset(preset);
            }
            self.store.put_agent(&agent).await?;
            agents.push(agent);
        }

        let tasks = spec
            .tasks
            .iter()
            .map(|task| {
                let assigned_agent = match &task.assigned_agent {
                    None => None,
                    Some(role_hint) => Some(
                        agents
                            .iter()
                            .find(|a| &a.role == role_hint)
                            .map(|a| a.id.clone())
                            .ok_or_else(|| {
                                CrewError::Misconfigured(format!(
                                    "task references unknown agent role '{role_hint}'"
                                ))
                            })?,
                    ),
                };
                Ok(TaskSpec {
                    description: task.description.clone(),
                    expected_output: task.expected_output.clone().unwrap_or_else(|| {
                        format!("Completed deliverable for: {}", task.description)
                    }),
                    assigned_agent,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let crew = Crew {
            id: self.ids.crew_id(),
            name: spec.crew_name,
            agent_ids: agents.iter().map(|a| a.id.clone()).collect(),
            tasks,
            autonomy_level: spec.autonomy_level,
            formation_date: Utc::now(),
            state: CrewState::Idle,
        };
        self.store.put_crew(&crew).await?;
        info!(crew = %crew.id, name = %crew.name, agents = crew.agent_ids.len(), "crew created");
        Ok((crew.id, agents.into_iter().map(|a| a.id).collect()))
    }

    /// Starts execution; returns once the workflow has entered
    /// `Preparing`.
    ///
    /// # Errors
    /// `Conflict` when the crew already has a workflow in flight.
    pub async fn start_crew(
        &self,
        crew_id: &CrewId,
        context: Value,
        allow_evolution: bool,
    ) -> Result<Workflow> {
        let crew = self.store.get_crew(crew_id).await?;
        Arc::clone(&self.engine)
            .start(crew, context, allow_evolution)
            .await
    }

    /// Submits a dynamic instruction. Emergency stops are bypass-routed to
    /// the running workflow's cancellation path before the queue is ever
    /// consulted.
    ///
    /// # Errors
    /// `NotFound` for unknown crews, `InvalidArgument` for bad priorities.
    pub async fn add_instruction(
        &self,
        crew_id: &CrewId,
        kind: InstructionKind,
        priority: u8,
        content: String,
    ) -> Result<Instruction> {
        let _crew = self.store.get_crew(crew_id).await?;
        let open = self.store.find_open_workflow(crew_id).await?;
        let instruction = self
            .bus
            .submit(crew_id, open.as_ref().map(|w| &w.id), kind, priority, content)
            .await?;
        Metrics::incr(&self.metrics.instructions_submitted);

        if instruction.is_emergency() {
            let stopped = self
                .engine
                .emergency_stop(crew_id, &instruction.content)
                .await?;
            // Applied either way: the stop took effect, or there was
            // nothing running and the stop is a no-op by definition.
            self.bus.mark_applied(&instruction.id).await?;
            info!(
                crew = %crew_id,
                instruction = %instruction.id,
                stopped,
                "emergency stop processed"
            );
        }
        self.store.get_instruction(&instruction.id).await
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn get_crew_status(&self, crew_id: &CrewId) -> Result<Value> {
        let crew = self.store.get_crew(crew_id).await?;
        let loaded = join_all(
            crew.agent_ids
                .iter()
                .map(|agent_id| self.store.get_agent(agent_id)),
        )
        .await;
        let mut agents = Vec::with_capacity(crew.agent_ids.len());
        for agent in loaded {
            let agent = agent?;
            agents.push(json!({
                "agent_id": agent.id,
                "role": agent.role,
                "personality": agent.personality,
                "evolution_cycles": agent.evolution_cycles,
                "tasks_completed": agent.experience.tasks_completed,
            }));
        }
        let workflow = self.store.latest_workflow(crew_id).await?.map(|w| {
            json!({
                "workflow_id": w.id,
                "state": w.state,
                "started_at": w.started_at,
                "ended_at": w.ended_at,
                "cancellation_reason": w.cancellation_reason,
                "failure": w.failure,
            })
        });
        Ok(json!({
            "crew_id": crew.id,
            "name": crew.name,
            "state": crew.state,
            "autonomy_level": crew.autonomy_level,
            "tasks": crew.tasks.len(),
            "agents": agents,
            "workflow": workflow,
        }))
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_active_crews(&self) -> Result<Value> {
        let crews = self.store.list_crews().await?;
        let active = crews
            .iter()
            .filter(|c| matches!(c.state, CrewState::Running | CrewState::Debriefing))
            .count();
        let total_agents: usize = crews.iter().map(|c| c.agent_ids.len()).sum();
        let rows: Vec<Value> = crews
            .iter()
            .map(|c| {
                json!({
                    "crew_id": c.id,
                    "name": c.name,
                    "state": c.state,
                    "agents": c.agent_ids.len(),
                    "tasks": c.tasks.len(),
                    "formation_date": c.formation_date,
                })
            })
            .collect();
        Ok(json!({
            "crews": rows,
            "active_crews": active,
            "total_agents": total_agents,
        }))
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn get_agent_reflection(&self, agent_id: &AgentId) -> Result<Value> {
        let agent = self.store.get_agent(agent_id).await?;
        Ok(json!({
            "agent_id": agent.id,
            "role": agent.role,
            "reflections": agent.reflections,
            "metrics": {
                "tasks_completed": agent.experience.tasks_completed,
                "successes": agent.experience.successes,
                "failures": agent.experience.failures,
                "consecutive_failures": agent.experience.consecutive_failures,
                "avg_quality": agent.experience.avg_quality,
                "performance_score": crate::evolution::performance_score(&agent),
            },
            "skill_gaps": agent.skill_gaps(),
        }))
    }

    /// Crew-level capability assessment: skill coverage, balance, gaps.
    /// Agents named in the gaps are handed to the evolution engine as
    /// imbalance candidates.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn crew_self_assessment(&self, crew_id: &CrewId) -> Result<Value> {
        let crew = self.store.get_crew(crew_id).await?;
        let agents = join_all(
            crew.agent_ids
                .iter()
                .map(|agent_id| self.store.get_agent(agent_id)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        // Coverage: best value per axis across members.
        let mut coverage: std::collections::BTreeMap<String, f64> = std::collections::BTreeMap::new();
        for agent in &agents {
            for (name, value) in agent.personality.iter() {
                let entry = coverage.entry(name.to_string()).or_insert(0.0);
                if value > *entry {
                    *entry = value;
                }
            }
        }

        let mut strengths = Vec::new();
        let mut gaps = Vec::new();
        let mut recommendations = Vec::new();
        for axis in ESSENTIAL_AXES {
            match coverage.get(*axis) {
                Some(value) if *value >= 0.7 => strengths.push(format!("strong {axis} coverage")),
                Some(value) if *value >= 0.5 => {}
                _ => {
                    gaps.push(format!("no agent with {axis} strength"));
                    recommendations
                        .push(format!("add or evolve an agent toward the {axis} axis"));
                }
            }
        }

        // Imbalanced members: flag agents whose failure streak drags the
        // crew, and queue them for evolution.
        let mut flagged = Vec::new();
        for agent in &agents {
            if agent.experience.consecutive_failures >= 2 {
                gaps.push(format!(
                    "agent {} has {} consecutive failures",
                    agent.id, agent.experience.consecutive_failures
                ));
                recommendations.push(format!("evolution candidate: {}", agent.id));
                flagged.push(agent.id.clone());
            }
        }
        for agent_id in flagged {
            match self
                .evolution
                .evolve(&agent_id, EvolutionTrigger::CrewImbalance)
                .await
            {
                Ok(Some(_)) => Metrics::incr(&self.metrics.evolutions_committed),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(agent = %agent_id, error = %err, "imbalance evolution failed");
                }
            }
        }

        if gaps.is_empty() {
            strengths.push("team covers all essential axes".to_string());
        }
        Ok(json!({
            "crew_id": crew.id,
            "strengths": strengths,
            "gaps": gaps,
            "recommendations": recommendations,
            "skill_coverage": coverage,
        }))
    }

    /// Creates a standalone agent from a personality preset template.
    ///
    /// # Errors
    /// `InvalidArgument` for unknown presets.
    pub async fn create_agent_from_template(
        &self,
        template: &str,
        role: String,
        goal: String,
        backstory: String,
    ) -> Result<AgentProfile> {
        let preset =
            PersonalityPreset::try_from(template).map_err(CrewError::InvalidArgument)?;
        let mut agent = AgentProfile::new(self.ids.agent_id(), role, goal, backstory);
        agent.apply_preset(preset);
        self.store.put_agent(&agent).await?;
        info!(agent = %agent.id, template, "agent created from template");
        Ok(agent)
    }

    /// Disbands an idle crew. Agent profiles survive for reattachment.
    ///
    /// # Errors
    /// `Conflict` unless the crew is idle.
    pub async fn disband_crew(&self, crew_id: &CrewId) -> Result<()> {
        let crew = self.store.get_crew(crew_id).await?;
        if crew.state != CrewState::Idle {
            return Err(CrewError::Conflict(format!(
                "crew {crew_id} is {}, disband requires idle",
                crew.state
            )));
        }
        if self.store.find_open_workflow(crew_id).await?.is_some() {
            return Err(CrewError::Conflict(format!(
                "crew {crew_id} still has a workflow in flight"
            )));
        }
        self.store.delete_crew(crew_id).await?;
        info!(crew = %crew_id, "crew disbanded");
        Ok(())
    }
}

