use super::mappers::{encode_datetime, instruction_from_row};
use super::Store;
use crate::error::{CrewError, Result};
use crate::types::{
    CrewId, Instruction, InstructionId, InstructionStatus, WorkflowId, EMERGENCY_PRIORITY,
};
use chrono::{DateTime, Utc};

impl Store {
    /// Persists a new instruction and pings the crew's watch signal.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn enqueue_instruction(&self, instruction: &Instruction) -> Result<()> {
        sqlx::query(
            "INSERT INTO instructions
                 (instruction_id, crew_id, workflow_id, kind, priority, content,
                  status, error, created_at, processed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(instruction.id.value())
        .bind(instruction.crew_id.value())
        .bind(instruction.workflow_id.as_ref().map(WorkflowId::value))
        .bind(instruction.kind.as_str())
        .bind(i64::from(instruction.priority))
        .bind(&instruction.content)
        .bind(instruction.status.as_str())
        .bind(instruction.error.as_deref())
        .bind(encode_datetime(instruction.created_at))
        .bind(instruction.processed_at.map(encode_datetime))
        .execute(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to enqueue instruction", &e))?;
        self.signal_instruction(&instruction.crew_id);
        Ok(())
    }

    /// # Errors
    /// Returns `CrewError::NotFound` if the instruction does not exist.
    pub async fn get_instruction(&self, id: &InstructionId) -> Result<Instruction> {
        let row = sqlx::query("SELECT * FROM instructions WHERE instruction_id = ?")
            .bind(id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to get instruction", &e))?;
        match row {
            Some(row) => instruction_from_row(&row),
            None => Err(CrewError::NotFound(format!("instruction {id}"))),
        }
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn update_instruction_status(
        &self,
        id: &InstructionId,
        status: InstructionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let processed_at = status
            .is_settled()
            .then(|| encode_datetime(Utc::now()));
        let result = sqlx::query(
            "UPDATE instructions SET status = ?, error = ?, processed_at = ?
             WHERE instruction_id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(processed_at)
        .bind(id.value())
        .execute(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to update instruction", &e))?;
        if result.rows_affected() == 0 {
            return Err(CrewError::NotFound(format!("instruction {id}")));
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn list_instructions(
        &self,
        crew_id: &CrewId,
        status: Option<InstructionStatus>,
    ) -> Result<Vec<Instruction>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM instructions WHERE crew_id = ? AND status = ?
                     ORDER BY priority DESC, created_at ASC",
                )
                .bind(crew_id.value())
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM instructions WHERE crew_id = ?
                     ORDER BY priority DESC, created_at ASC",
                )
                .bind(crew_id.value())
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(|e| Self::store_err("Failed to list instructions", &e))?;
        rows.iter().map(instruction_from_row).collect()
    }

    /// Atomically claims all pending instructions for a workflow: returns
    /// them in priority-desc, submit-time-asc order with their status
    /// flipped to `delivered` and the workflow id stamped in.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn claim_pending_instructions(
        &self,
        crew_id: &CrewId,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<Instruction>> {
        let rows = sqlx::query(
            "UPDATE instructions
             SET status = 'delivered', workflow_id = ?
             WHERE crew_id = ? AND status = 'pending'
             RETURNING *",
        )
        .bind(workflow_id.value())
        .bind(crew_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to claim pending instructions", &e))?;
        let mut instructions = rows
            .iter()
            .map(instruction_from_row)
            .collect::<Result<Vec<_>>>()?;
        instructions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(instructions)
    }

    /// Sweeper path: expires pending instructions older than `cutoff`.
    /// Priority-5 instructions never expire.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn expire_stale_instructions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE instructions
             SET status = 'expired', processed_at = ?
             WHERE status = 'pending' AND priority < ? AND created_at < ?",
        )
        .bind(encode_datetime(Utc::now()))
        .bind(i64::from(EMERGENCY_PRIORITY))
        .bind(encode_datetime(cutoff))
        .execute(self.pool())
        .await
        .map_err(|e| Self::store_err("Failed to expire instructions", &e))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::super::Store;
    use crate::types::{
        CrewId, Instruction, InstructionId, InstructionKind, InstructionStatus, WorkflowId,
    };
    use chrono::{Duration, Utc};

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    fn instruction(id: &str, crew: &str, priority: u8, kind: InstructionKind) -> Instruction {
        Instruction {
            id: InstructionId::new(id),
            crew_id: CrewId::new(crew),
            workflow_id: None,
            kind,
            priority,
            content: format!("instruction {id}"),
            status: InstructionStatus::Pending,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_submit_time() {
        let store = memory_store().await;
        let crew = CrewId::new("crew-1");
        let wf = WorkflowId::new("wf-1");
        for (id, priority) in [("i-a", 2), ("i-b", 5), ("i-c", 3)] {
            let mut instr = instruction(id, "crew-1", priority, InstructionKind::Guidance);
            // Stagger creation times so FIFO-on-tie is observable.
            instr.created_at = Utc::now() + Duration::milliseconds(i64::from(priority));
            store.enqueue_instruction(&instr).await.expect("enqueue");
        }

        let drained = store
            .claim_pending_instructions(&crew, &wf)
            .await
            .expect("claim");
        let priorities: Vec<u8> = drained.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![5, 3, 2]);
        assert!(drained
            .iter()
            .all(|i| i.status == InstructionStatus::Delivered));

        // Second claim finds nothing pending.
        let again = store
            .claim_pending_instructions(&crew, &wf)
            .await
            .expect("claim");
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn expiry_skips_priority_five() {
        let store = memory_store().await;
        let mut old_low = instruction("i-old", "crew-1", 2, InstructionKind::Guidance);
        old_low.created_at = Utc::now() - Duration::hours(2);
        let mut old_estop = instruction("i-stop", "crew-1", 5, InstructionKind::EmergencyStop);
        old_estop.created_at = Utc::now() - Duration::hours(2);
        store.enqueue_instruction(&old_low).await.expect("enqueue");
        store.enqueue_instruction(&old_estop).await.expect("enqueue");

        let expired = store
            .expire_stale_instructions(Utc::now() - Duration::hours(1))
            .await
            .expect("expire");
        assert_eq!(expired, 1);

        let stop = store
            .get_instruction(&InstructionId::new("i-stop"))
            .await
            .expect("get");
        assert_eq!(stop.status, InstructionStatus::Pending);
    }

    #[tokio::test]
    async fn status_update_stamps_processed_at_when_settled() {
        let store = memory_store().await;
        let instr = instruction("i-1", "crew-1", 1, InstructionKind::Feedback);
        store.enqueue_instruction(&instr).await.expect("enqueue");

        store
            .update_instruction_status(&instr.id, InstructionStatus::Delivered, None)
            .await
            .expect("deliver");
        let delivered = store.get_instruction(&instr.id).await.expect("get");
        assert!(delivered.processed_at.is_none());

        store
            .update_instruction_status(&instr.id, InstructionStatus::Applied, None)
            .await
            .expect("apply");
        let applied = store.get_instruction(&instr.id).await.expect("get");
        assert!(applied.processed_at.is_some());
    }
}
