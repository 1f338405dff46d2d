#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod strategies;

pub use strategies::{apply_strategy, choose_strategy, performance_score};

use crate::config::ServerConfig;
use crate::error::{CrewError, Result};
use crate::store::Store;
use crate::types::{
    AgentId, AgentProfile, EvolutionEvent, EvolutionStrategy, EvolutionTrigger,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

const SUCCESS_RATE_THRESHOLD: f64 = 0.6;
const SUCCESS_RATE_MIN_SAMPLES: usize = 10;
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;
const STAGNATION_WEEKS: i64 = 4;

/// Journaled, bounded mutation of agent personalities.
///
/// Mutations per agent are serialized through a per-agent async lock; the
/// agent update and the event append commit in one store transaction.
pub struct EvolutionEngine {
    store: Store,
    config: Arc<RwLock<Arc<ServerConfig>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EvolutionEngine {
    #[must_use]
    pub fn new(store: Store, config: Arc<RwLock<Arc<ServerConfig>>>) -> Self {
        Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn current_config(&self) -> Arc<ServerConfig> {
        match self.config.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn agent_lock(&self, agent_id: &AgentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            locks
                .entry(agent_id.value().to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Evaluates the automatic trigger rules against an agent's current
    /// state. Crew-imbalance and manual triggers arrive externally.
    #[must_use]
    pub fn evaluate_trigger(agent: &AgentProfile) -> Option<EvolutionTrigger> {
        if let Some(rate) = agent
            .experience
            .rolling_success_rate(SUCCESS_RATE_MIN_SAMPLES)
        {
            if rate < SUCCESS_RATE_THRESHOLD {
                return Some(EvolutionTrigger::LowSuccessRate);
            }
        }
        if agent.experience.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
            return Some(EvolutionTrigger::ConsecutiveFailures);
        }
        let reference = agent.last_evolved_at.unwrap_or(agent.created_at);
        if agent.experience.tasks_completed >= 1
            && Utc::now() - reference > Duration::weeks(STAGNATION_WEEKS)
        {
            return Some(EvolutionTrigger::Stagnation);
        }
        None
    }

    fn within_cooldown(&self, agent: &AgentProfile) -> bool {
        let Some(last) = agent.last_evolved_at else {
            return false;
        };
        let interval = self.current_config().min_evolution_interval_secs;
        let interval = i64::try_from(interval).unwrap_or(i64::MAX / 1_000);
        Utc::now() - last < Duration::seconds(interval)
    }

    /// Runs one evolution for `agent_id` under its per-agent lock.
    ///
    /// Returns `None` when the cooldown suppressed the mutation (the
    /// trigger is idempotent within the cooldown window).
    ///
    /// # Errors
    /// `CrewError::NotFound` for unknown agents, store errors otherwise.
    pub async fn evolve(
        &self,
        agent_id: &AgentId,
        trigger: EvolutionTrigger,
    ) -> Result<Option<EvolutionEvent>> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let mut agent = self.store.get_agent(agent_id).await?;
        if !trigger.bypasses_cooldown() && self.within_cooldown(&agent) {
            debug!(agent = %agent_id, "evolution suppressed by cooldown");
            return Ok(None);
        }

        let strategy = match &trigger {
            EvolutionTrigger::Manual {
                strategy: Some(strategy),
                ..
            } => *strategy,
            _ => choose_strategy(&agent),
        };
        let outcome = apply_strategy(strategy, &agent);

        let previous_traits = agent.personality.clone();
        agent.personality = outcome.personality;
        if let Some(goal) = outcome.goal {
            agent.goal = goal;
        }
        agent.evolution_cycles += 1;
        agent.last_evolved_at = Some(Utc::now());

        let event = EvolutionEvent {
            event_id: 0,
            agent_id: agent.id.clone(),
            cycle: agent.evolution_cycles,
            kind: strategy,
            previous_traits,
            new_traits: agent.personality.clone(),
            reason: format!("{}: {}", trigger.describe(), outcome.reason),
            created_at: Utc::now(),
        };

        let stored = self.store.commit_evolution(&agent, &event).await?;
        info!(
            agent = %agent_id,
            cycle = stored.cycle,
            strategy = %strategy,
            "agent evolved"
        );
        Ok(Some(stored))
    }

    /// Supervisor sweep: evolve every agent whose automatic triggers fire
    /// and whose cooldown has elapsed. Returns the number of evolutions
    /// committed.
    ///
    /// # Errors
    /// Returns an error only when the agent listing itself fails;
    /// per-agent failures are logged and skipped.
    pub async fn sweep(&self) -> Result<u32> {
        let agents = self.store.list_agents().await?;
        let mut evolved = 0_u32;
        for agent in agents {
            let Some(trigger) = Self::evaluate_trigger(&agent) else {
                continue;
            };
            match self.evolve(&agent.id, trigger).await {
                Ok(Some(_)) => evolved += 1,
                Ok(None) => {}
                Err(CrewError::Conflict(reason)) => {
                    debug!(agent = %agent.id, reason = %reason, "evolution sweep conflict");
                }
                Err(err) => {
                    warn!(agent = %agent.id, error = %err, "evolution sweep failure");
                }
            }
        }
        Ok(evolved)
    }

    /// Aggregated statistics for `get_evolution_summary`.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn summary(&self) -> Result<serde_json::Value> {
        let counts = self.store.evolution_counts_by_strategy().await?;
        let total: i64 = counts.iter().map(|(_, n)| n).sum();
        let by_strategy: serde_json::Map<String, serde_json::Value> = EvolutionStrategy::all()
            .iter()
            .map(|strategy| {
                let count = counts
                    .iter()
                    .find(|(kind, _)| kind == strategy)
                    .map_or(0, |(_, n)| *n);
                (
                    strategy.as_str().to_string(),
                    serde_json::Value::from(count),
                )
            })
            .collect();
        Ok(serde_json::json!({
            "total_evolutions": total,
            "by_strategy": by_strategy,
        }))
    }
}
