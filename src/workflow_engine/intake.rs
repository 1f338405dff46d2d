use super::WorkflowEngine;
use crate::runner::{CancelSignal, LiveContext, LiveNote};
use crate::types::{CrewId, InstructionKind, WorkflowId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Instruction intake loop for one executing workflow.
///
/// Runs beside the blocking kickoff: wakes on the store's watch signal or
/// on the poll interval, drains pending instructions in priority order,
/// and feeds them to the runner's live context. Emergency stops found
/// here are routed to the engine's cancellation path (normally the submit
/// path has already done this; the loop is the safety net for stops that
/// landed while no intake was listening).
pub(super) async fn run(
    engine: Arc<WorkflowEngine>,
    crew_id: CrewId,
    workflow_id: WorkflowId,
    live: LiveContext,
    cancel: CancelSignal,
) {
    let watch = engine.store().instruction_watch(&crew_id);
    let poll = engine.instruction_poll_interval();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = watch.notified() => {}
            () = tokio::time::sleep(poll) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        let drained = match engine.bus().drain_for(&crew_id, &workflow_id).await {
            Ok(drained) => drained,
            Err(err) => {
                warn!(workflow = %workflow_id, error = %err, "instruction drain failed");
                continue;
            }
        };

        for instruction in drained {
            if instruction.is_emergency() || instruction.kind == InstructionKind::EmergencyStop {
                match engine.emergency_stop(&crew_id, &instruction.content).await {
                    Ok(_) => {
                        if let Err(err) = engine.bus().mark_applied(&instruction.id).await {
                            warn!(instruction = %instruction.id, error = %err, "failed to mark emergency stop applied");
                        }
                    }
                    Err(err) => {
                        warn!(instruction = %instruction.id, error = %err, "emergency stop routing failed");
                        let _ = engine
                            .bus()
                            .mark_failed(&instruction.id, &err.sanitized_message())
                            .await;
                    }
                }
                continue;
            }

            live.push(LiveNote {
                kind: instruction.kind,
                content: instruction.content.clone(),
                strict: instruction.kind.is_strict(),
            });
            debug!(
                workflow = %workflow_id,
                instruction = %instruction.id,
                kind = %instruction.kind,
                "instruction delivered to live context"
            );
            if let Err(err) = engine.bus().mark_applied(&instruction.id).await {
                warn!(instruction = %instruction.id, error = %err, "failed to mark instruction applied");
            }
        }
    }
    debug!(workflow = %workflow_id, "intake loop stopped");
}
