use super::mappers::{encode_datetime, get_datetime, get_i64, get_text};
use super::Store;
use crate::error::{CrewError, Result};
use crate::types::{AgentId, AgentProfile, EvolutionEvent, EvolutionStrategy, Personality};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

fn event_from_row(row: &SqliteRow) -> Result<EvolutionEvent> {
    let kind_raw = get_text(row, "kind")?;
    let previous: Personality =
        serde_json::from_str(&get_text(row, "previous_traits")?).map_err(|e| {
            CrewError::Store(format!("column previous_traits holds invalid JSON: {e}"))
        })?;
    let new: Personality = serde_json::from_str(&get_text(row, "new_traits")?)
        .map_err(|e| CrewError::Store(format!("column new_traits holds invalid JSON: {e}")))?;
    Ok(EvolutionEvent {
        event_id: get_i64(row, "event_id")?,
        agent_id: AgentId::new(get_text(row, "agent_id")?),
        cycle: u32::try_from(get_i64(row, "cycle")?).unwrap_or(0),
        kind: EvolutionStrategy::try_from(kind_raw.as_str()).map_err(CrewError::Store)?,
        previous_traits: previous,
        new_traits: new,
        reason: get_text(row, "reason")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

impl Store {
    /// Commits one evolution: the mutated agent and its event land in a
    /// single transaction, so `previous_traits` always equals the agent's
    /// personality immediately before the event.
    ///
    /// # Errors
    /// Returns `CrewError::Conflict` when `(agent_id, cycle)` already
    /// exists, or a store error otherwise.
    pub async fn commit_evolution(
        &self,
        agent: &AgentProfile,
        event: &EvolutionEvent,
    ) -> Result<EvolutionEvent> {
        let personality = serde_json::to_string(&agent.personality)?;
        let experience = serde_json::to_string(&agent.experience)?;
        let reflections = serde_json::to_string(&agent.reflections)?;
        let previous_traits = serde_json::to_string(&event.previous_traits)?;
        let new_traits = serde_json::to_string(&event.new_traits)?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| Self::store_err("Failed to begin evolution transaction", &e))?;

        sqlx::query(
            "UPDATE agents SET role = ?, goal = ?, backstory = ?, personality = ?,
                 experience = ?, evolution_cycles = ?, last_evolved_at = ?, reflections = ?
             WHERE agent_id = ?",
        )
        .bind(&agent.role)
        .bind(&agent.goal)
        .bind(&agent.backstory)
        .bind(personality)
        .bind(experience)
        .bind(i64::from(agent.evolution_cycles))
        .bind(agent.last_evolved_at.map(encode_datetime))
        .bind(reflections)
        .bind(agent.id.value())
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::store_err("Failed to update agent during evolution", &e))?;

        let inserted = sqlx::query(
            "INSERT INTO evolution_events
                 (agent_id, cycle, kind, previous_traits, new_traits, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(event.agent_id.value())
        .bind(i64::from(event.cycle))
        .bind(event.kind.as_str())
        .bind(previous_traits)
        .bind(new_traits)
        .bind(&event.reason)
        .bind(encode_datetime(event.created_at))
        .fetch_one(&mut *tx)
        .await;

        let inserted = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE") => {
                return Err(CrewError::Conflict(format!(
                    "evolution cycle {} already recorded for agent {}",
                    event.cycle, event.agent_id
                )));
            }
            Err(e) => return Err(Self::store_err("Failed to append evolution event", &e)),
        };

        tx.commit()
            .await
            .map_err(|e| Self::store_err("Failed to commit evolution", &e))?;
        event_from_row(&inserted)
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_evolution_events(
        &self,
        agent_id: &AgentId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EvolutionEvent>> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT * FROM evolution_events WHERE agent_id = ? AND created_at >= ?
                     ORDER BY cycle ASC",
                )
                .bind(agent_id.value())
                .bind(encode_datetime(since))
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM evolution_events WHERE agent_id = ? ORDER BY cycle ASC",
                )
                .bind(agent_id.value())
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(|e| Self::store_err("Failed to list evolution events", &e))?;
        rows.iter().map(event_from_row).collect()
    }

    /// Most recent events across all agents, newest first.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn recent_evolution_events(&self, limit: u32) -> Result<Vec<EvolutionEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM evolution_events ORDER BY event_id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to list recent evolution events", &e))?;
        rows.iter().map(event_from_row).collect()
    }

    /// Per-strategy event counts for the evolution summary tool.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn evolution_counts_by_strategy(&self) -> Result<Vec<(EvolutionStrategy, i64)>> {
        let rows = sqlx::query(
            "SELECT kind, COUNT(*) AS total FROM evolution_events GROUP BY kind",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to count evolution events", &e))?;
        rows.iter()
            .map(|row| {
                let kind_raw = get_text(row, "kind")?;
                let kind =
                    EvolutionStrategy::try_from(kind_raw.as_str()).map_err(CrewError::Store)?;
                Ok((kind, get_i64(row, "total")?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::super::Store;
    use crate::error::CrewError;
    use crate::types::{
        AgentId, AgentProfile, EvolutionEvent, EvolutionStrategy, Personality,
    };
    use chrono::Utc;

    async fn store_with_agent(id: &str) -> (Store, AgentProfile) {
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store");
        let agent = AgentProfile::new(
            AgentId::new(id),
            "Writer".into(),
            "write".into(),
            "bio".into(),
        );
        store.put_agent(&agent).await.expect("put agent");
        (store, agent)
    }

    fn event_for(agent: &AgentProfile, cycle: u32, new_traits: Personality) -> EvolutionEvent {
        EvolutionEvent {
            event_id: 0,
            agent_id: agent.id.clone(),
            cycle,
            kind: EvolutionStrategy::PersonalityDrift,
            previous_traits: agent.personality.clone(),
            new_traits,
            reason: "test".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn evolution_commits_agent_and_event_together() {
        let (store, mut agent) = store_with_agent("agent-ev").await;
        let previous = agent.personality.clone();
        agent.personality.adjust("adaptable", 0.15);
        agent.evolution_cycles = 1;
        agent.last_evolved_at = Some(Utc::now());

        let event = event_for(
            &AgentProfile {
                personality: previous,
                ..agent.clone()
            },
            1,
            agent.personality.clone(),
        );
        let stored = store
            .commit_evolution(&agent, &event)
            .await
            .expect("commit");
        assert!(stored.event_id > 0);

        let loaded = store.get_agent(&agent.id).await.expect("get");
        assert_eq!(loaded.evolution_cycles, 1);
        assert_eq!(loaded.personality, agent.personality);
        let events = store
            .list_evolution_events(&agent.id, None)
            .await
            .expect("list");
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_cycle_is_conflict_and_rolls_back() {
        let (store, mut agent) = store_with_agent("agent-dup").await;
        let event = event_for(&agent, 1, agent.personality.clone());
        agent.evolution_cycles = 1;
        store
            .commit_evolution(&agent, &event)
            .await
            .expect("first commit");

        let mut second = agent.clone();
        second.evolution_cycles = 99;
        let err = store.commit_evolution(&second, &event).await;
        assert!(matches!(err, Err(CrewError::Conflict(_))));

        // The agent update inside the failed transaction did not land.
        let loaded = store.get_agent(&agent.id).await.expect("get");
        assert_eq!(loaded.evolution_cycles, 1);
    }
}
