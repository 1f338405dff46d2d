use super::mappers::{crew_from_row, encode_datetime};
use super::Store;
use crate::error::{CrewError, Result};
use crate::types::{Crew, CrewId, CrewState};

impl Store {
    /// # Errors
    /// Returns `CrewError::Conflict` when inserting a crew whose name is
    /// already taken, or a store error otherwise.
    pub async fn put_crew(&self, crew: &Crew) -> Result<()> {
        let agent_ids = serde_json::to_string(&crew.agent_ids)?;
        let tasks = serde_json::to_string(&crew.tasks)?;
        let result = sqlx::query(
            "INSERT INTO crews
                 (crew_id, name, agent_ids, tasks, autonomy_level, formation_date, state)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (crew_id) DO UPDATE SET
                 agent_ids = excluded.agent_ids,
                 tasks = excluded.tasks,
                 autonomy_level = excluded.autonomy_level,
                 state = excluded.state",
        )
        .bind(crew.id.value())
        .bind(&crew.name)
        .bind(agent_ids)
        .bind(tasks)
        .bind(crew.autonomy_level)
        .bind(encode_datetime(crew.formation_date))
        .bind(crew.state.as_str())
        .execute(self.pool())
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE") => Err(
                CrewError::Conflict(format!("crew name '{}' already exists", crew.name)),
            ),
            Err(e) => Err(Self::store_err("Failed to put crew", &e)),
        }
    }

    /// # Errors
    /// Returns `CrewError::NotFound` if the crew does not exist.
    pub async fn get_crew(&self, crew_id: &CrewId) -> Result<Crew> {
        let row = sqlx::query("SELECT * FROM crews WHERE crew_id = ?")
            .bind(crew_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to get crew", &e))?;
        match row {
            Some(row) => crew_from_row(&row),
            None => Err(CrewError::NotFound(format!("crew {crew_id}"))),
        }
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_crews(&self) -> Result<Vec<Crew>> {
        let rows = sqlx::query("SELECT * FROM crews WHERE state != 'disbanded' ORDER BY formation_date ASC")
            .fetch_all(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to list crews", &e))?;
        rows.iter().map(crew_from_row).collect()
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn set_crew_state(&self, crew_id: &CrewId, state: CrewState) -> Result<()> {
        let result = sqlx::query("UPDATE crews SET state = ? WHERE crew_id = ?")
            .bind(state.as_str())
            .bind(crew_id.value())
            .execute(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to set crew state", &e))?;
        if result.rows_affected() == 0 {
            return Err(CrewError::NotFound(format!("crew {crew_id}")));
        }
        Ok(())
    }

    /// Boot-time recovery: crews left mid-run by a previous process return
    /// to idle alongside their orphaned workflows.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn reset_running_crews(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE crews SET state = 'idle' WHERE state IN ('running', 'debriefing')",
        )
        .execute(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to reset running crews", &e))?;
        Ok(result.rows_affected())
    }

    /// Removes the crew row. Agent memory is preserved independently under
    /// each `AgentId` for cross-session reuse.
    ///
    /// # Errors
    /// Returns `CrewError::NotFound` if the crew does not exist.
    pub async fn delete_crew(&self, crew_id: &CrewId) -> Result<()> {
        let result = sqlx::query("DELETE FROM crews WHERE crew_id = ?")
            .bind(crew_id.value())
            .execute(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to delete crew", &e))?;
        if result.rows_affected() == 0 {
            return Err(CrewError::NotFound(format!("crew {crew_id}")));
        }
        self.drop_watch(crew_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::super::Store;
    use crate::error::CrewError;
    use crate::types::{Crew, CrewId, CrewState};
    use chrono::Utc;

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    fn sample_crew(id: &str, name: &str) -> Crew {
        Crew {
            id: CrewId::new(id),
            name: name.into(),
            agent_ids: Vec::new(),
            tasks: Vec::new(),
            autonomy_level: 0.5,
            formation_date: Utc::now(),
            state: CrewState::Idle,
        }
    }

    #[tokio::test]
    async fn duplicate_crew_name_is_conflict() {
        let store = memory_store().await;
        store.put_crew(&sample_crew("crew-1", "m1")).await.expect("first");
        let err = store.put_crew(&sample_crew("crew-2", "m1")).await;
        assert!(matches!(err, Err(CrewError::Conflict(_))));
    }

    #[tokio::test]
    async fn disbanded_crews_are_hidden_from_listing() {
        let store = memory_store().await;
        store.put_crew(&sample_crew("crew-1", "m1")).await.expect("put");
        store
            .set_crew_state(&CrewId::new("crew-1"), CrewState::Disbanded)
            .await
            .expect("state");
        assert!(store.list_crews().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn delete_missing_crew_is_not_found() {
        let store = memory_store().await;
        let err = store.delete_crew(&CrewId::new("crew-x")).await;
        assert!(matches!(err, Err(CrewError::NotFound(_))));
    }
}
