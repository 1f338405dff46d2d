use crate::error::{CrewError, Result};
use crate::store::Store;
use crate::types::{
    CrewId, IdMinter, Instruction, InstructionId, InstructionKind, InstructionStatus, WorkflowId,
    EMERGENCY_PRIORITY,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

/// Per-crew priority queue of dynamic instructions, backed by the store.
///
/// Ordering is priority-desc then submit-time-asc; delivery marks rows
/// `delivered` atomically so a drain is never observed twice. Emergency
/// stops are not special-cased here beyond priority coercion: bypass
/// routing to the workflow engine happens in the crew manager, which owns
/// the cancellation handles.
pub struct InstructionBus {
    store: Store,
    ids: Arc<IdMinter>,
}

impl InstructionBus {
    #[must_use]
    pub fn new(store: Store, ids: Arc<IdMinter>) -> Self {
        Self { store, ids }
    }

    /// Persists a new instruction and signals the crew's watch handle.
    ///
    /// Emergency-stop instructions are always stored at priority 5
    /// regardless of the submitted value.
    ///
    /// # Errors
    /// `CrewError::InvalidArgument` for out-of-range priorities.
    pub async fn submit(
        &self,
        crew_id: &CrewId,
        workflow_id: Option<&WorkflowId>,
        kind: InstructionKind,
        priority: u8,
        content: String,
    ) -> Result<Instruction> {
        if !(1..=EMERGENCY_PRIORITY).contains(&priority) {
            return Err(CrewError::InvalidArgument(format!(
                "priority must be within [1, {EMERGENCY_PRIORITY}], got {priority}"
            )));
        }
        let priority = if kind == InstructionKind::EmergencyStop {
            EMERGENCY_PRIORITY
        } else {
            priority
        };
        let instruction = Instruction {
            id: self.ids.instruction_id(),
            crew_id: crew_id.clone(),
            workflow_id: workflow_id.cloned(),
            kind,
            priority,
            content,
            status: InstructionStatus::Pending,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.store.enqueue_instruction(&instruction).await?;
        info!(
            instruction = %instruction.id,
            crew = %crew_id,
            kind = %kind,
            priority,
            "instruction submitted"
        );
        Ok(instruction)
    }

    /// Claims everything pending for the crew, in application order, and
    /// stamps the consuming workflow.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn drain_for(
        &self,
        crew_id: &CrewId,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<Instruction>> {
        self.store
            .claim_pending_instructions(crew_id, workflow_id)
            .await
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn mark_applied(&self, id: &InstructionId) -> Result<()> {
        self.store
            .update_instruction_status(id, InstructionStatus::Applied, None)
            .await
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn mark_failed(&self, id: &InstructionId, error: &str) -> Result<()> {
        self.store
            .update_instruction_status(id, InstructionStatus::Failed, Some(error))
            .await
    }

    /// Sweeper path: expires pending instructions older than `max_age`.
    /// Priority-5 instructions never expire.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn expire(&self, max_age: Duration) -> Result<u64> {
        self.store
            .expire_stale_instructions(Utc::now() - max_age)
            .await
    }
}
