use super::mappers::{encode_datetime, workflow_from_row};
use super::Store;
use crate::error::{CrewError, Result};
use crate::types::{CrewId, Workflow, WorkflowId};
use chrono::Utc;

const NON_TERMINAL_STATES: &str = "('created', 'preparing', 'executing', 'debriefing', 'cancelling')";

impl Store {
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn put_workflow(&self, workflow: &Workflow) -> Result<()> {
        let result_json = workflow
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let context = serde_json::to_string(&workflow.context)?;
        sqlx::query(
            "INSERT INTO workflows
                 (workflow_id, crew_id, state, allow_evolution, context, result,
                  cancellation_reason, failure, started_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (workflow_id) DO UPDATE SET
                 state = excluded.state,
                 result = excluded.result,
                 cancellation_reason = excluded.cancellation_reason,
                 failure = excluded.failure,
                 ended_at = excluded.ended_at",
        )
        .bind(workflow.id.value())
        .bind(workflow.crew_id.value())
        .bind(workflow.state.as_str())
        .bind(i64::from(workflow.allow_evolution))
        .bind(context)
        .bind(result_json)
        .bind(workflow.cancellation_reason.as_deref())
        .bind(workflow.failure.as_deref())
        .bind(encode_datetime(workflow.started_at))
        .bind(workflow.ended_at.map(encode_datetime))
        .execute(self.pool())
        .await
        .map(|_| ())
        .map_err(|e| Self::store_err("Failed to put workflow", &e))
    }

    /// # Errors
    /// Returns `CrewError::NotFound` if the workflow does not exist.
    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        let row = sqlx::query("SELECT * FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to get workflow", &e))?;
        match row {
            Some(row) => workflow_from_row(&row),
            None => Err(CrewError::NotFound(format!("workflow {workflow_id}"))),
        }
    }

    /// Workflows in any non-terminal state, oldest first.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        let sql = format!(
            "SELECT * FROM workflows WHERE state IN {NON_TERMINAL_STATES} ORDER BY started_at ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to list active workflows", &e))?;
        rows.iter().map(workflow_from_row).collect()
    }

    /// The crew's workflow still in flight, if any. At most one exists at a
    /// time; the oldest is returned if that invariant was ever violated.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn find_open_workflow(&self, crew_id: &CrewId) -> Result<Option<Workflow>> {
        let sql = format!(
            "SELECT * FROM workflows WHERE crew_id = ? AND state IN {NON_TERMINAL_STATES}
             ORDER BY started_at ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(crew_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to find open workflow", &e))?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    /// Latest workflow for a crew regardless of state.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn latest_workflow(&self, crew_id: &CrewId) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT * FROM workflows WHERE crew_id = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(crew_id.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to get latest workflow", &e))?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    /// Boot-time recovery: seal every workflow left non-terminal by a
    /// previous process as `failed` with the given reason.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn fail_orphaned_workflows(&self, reason: &str) -> Result<u64> {
        let sql = format!(
            "UPDATE workflows SET state = 'failed', failure = ?, ended_at = ?
             WHERE state IN {NON_TERMINAL_STATES}"
        );
        let result = sqlx::query(&sql)
            .bind(reason)
            .bind(encode_datetime(Utc::now()))
            .execute(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to fail orphaned workflows", &e))?;
        Ok(result.rows_affected())
    }

    /// Workflows executing since before `cutoff`, for the reaper.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_overdue_workflows(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE state = 'executing' AND started_at < ?",
        )
        .bind(encode_datetime(cutoff))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to list overdue workflows", &e))?;
        rows.iter().map(workflow_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::super::Store;
    use crate::types::{CrewId, Workflow, WorkflowId, WorkflowState};
    use serde_json::json;

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    fn sample_workflow(id: &str, crew: &str, state: WorkflowState) -> Workflow {
        let mut workflow = Workflow::new(
            WorkflowId::new(id),
            CrewId::new(crew),
            json!({}),
            true,
        );
        workflow.state = state;
        workflow
    }

    #[tokio::test]
    async fn open_workflow_lookup_sees_only_non_terminal() {
        let store = memory_store().await;
        let crew = CrewId::new("crew-1");
        store
            .put_workflow(&sample_workflow("wf-1", "crew-1", WorkflowState::Completed))
            .await
            .expect("put");
        assert!(store.find_open_workflow(&crew).await.expect("find").is_none());

        store
            .put_workflow(&sample_workflow("wf-2", "crew-1", WorkflowState::Executing))
            .await
            .expect("put");
        let open = store.find_open_workflow(&crew).await.expect("find");
        assert_eq!(open.map(|w| w.id), Some(WorkflowId::new("wf-2")));
    }

    #[tokio::test]
    async fn orphan_recovery_fails_in_flight_workflows() {
        let store = memory_store().await;
        store
            .put_workflow(&sample_workflow("wf-1", "crew-1", WorkflowState::Executing))
            .await
            .expect("put");
        store
            .put_workflow(&sample_workflow("wf-2", "crew-2", WorkflowState::Completed))
            .await
            .expect("put");

        let sealed = store
            .fail_orphaned_workflows("process-restart")
            .await
            .expect("recover");
        assert_eq!(sealed, 1);

        let wf = store
            .get_workflow(&WorkflowId::new("wf-1"))
            .await
            .expect("get");
        assert_eq!(wf.state, WorkflowState::Failed);
        assert_eq!(wf.failure.as_deref(), Some("process-restart"));
    }
}
