use super::mappers::{agent_from_row, encode_datetime};
use super::Store;
use crate::error::{CrewError, Result};
use crate::types::{AgentId, AgentProfile};

impl Store {
    /// Inserts or replaces one agent profile.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn put_agent(&self, agent: &AgentProfile) -> Result<()> {
        let personality = serde_json::to_string(&agent.personality)?;
        let experience = serde_json::to_string(&agent.experience)?;
        let reflections = serde_json::to_string(&agent.reflections)?;
        sqlx::query(
            "INSERT INTO agents
                 (agent_id, role, goal, backstory, personality, experience,
                  evolution_cycles, created_at, last_evolved_at, reflections)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (agent_id) DO UPDATE SET
                 role = excluded.role,
                 goal = excluded.goal,
                 backstory = excluded.backstory,
                 personality = excluded.personality,
                 experience = excluded.experience,
                 evolution_cycles = excluded.evolution_cycles,
                 last_evolved_at = excluded.last_evolved_at,
                 reflections = excluded.reflections",
        )
        .bind(agent.id.value())
        .bind(&agent.role)
        .bind(&agent.goal)
        .bind(&agent.backstory)
        .bind(personality)
        .bind(experience)
        .bind(i64::from(agent.evolution_cycles))
        .bind(encode_datetime(agent.created_at))
        .bind(agent.last_evolved_at.map(encode_datetime))
        .bind(reflections)
        .execute(self.pool())
        .await
        .map(|_| ())
        .map_err(|e| Self::store_err("Failed to put agent", &e))
    }

    /// # Errors
    /// Returns `CrewError::NotFound` if the agent does not exist.
    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<AgentProfile> {
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = ?")
            .bind(agent_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to get agent", &e))?;
        match row {
            Some(row) => agent_from_row(&row),
            None => Err(CrewError::NotFound(format!("agent {agent_id}"))),
        }
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_agents(&self) -> Result<Vec<AgentProfile>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY created_at ASC")
            .fetch_all(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to list agents", &e))?;
        rows.iter().map(agent_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::super::Store;
    use crate::types::{AgentId, AgentProfile, PersonalityPreset};

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    #[tokio::test]
    async fn agent_round_trips_with_personality_and_experience() {
        let store = memory_store().await;
        let mut agent = AgentProfile::new(
            AgentId::new("agent-rt"),
            "Writer".into(),
            "write docs".into(),
            "a writer".into(),
        );
        agent.apply_preset(PersonalityPreset::Creative);
        agent.experience.record_task(true, 0.9);
        store.put_agent(&agent).await.expect("put");

        let loaded = store.get_agent(&agent.id).await.expect("get");
        assert_eq!(loaded.personality, agent.personality);
        assert_eq!(loaded.experience.tasks_completed, 1);
        assert_eq!(loaded.role, "Writer");
    }

    #[tokio::test]
    async fn missing_agent_is_not_found() {
        let store = memory_store().await;
        let err = store.get_agent(&AgentId::new("agent-nope")).await;
        assert!(matches!(err, Err(crate::error::CrewError::NotFound(_))));
    }

    #[tokio::test]
    async fn put_agent_updates_in_place() {
        let store = memory_store().await;
        let mut agent = AgentProfile::new(
            AgentId::new("agent-up"),
            "Writer".into(),
            "write".into(),
            "bio".into(),
        );
        store.put_agent(&agent).await.expect("insert");
        agent.evolution_cycles = 3;
        store.put_agent(&agent).await.expect("update");
        let loaded = store.get_agent(&agent.id).await.expect("get");
        assert_eq!(loaded.evolution_cycles, 3);
        assert_eq!(store.list_agents().await.expect("list").len(), 1);
    }
}
