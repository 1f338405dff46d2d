use crate::app::AppContext;
use crate::dispatch::{optional_str, required_str};
use crate::error::{CrewError, Result};
use crate::types::{CrewId, InstructionId, InstructionKind, InstructionStatus};
use serde_json::{json, Map, Value};

pub(crate) async fn add_dynamic_instruction(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let crew_id = CrewId::new(required_str(args, "crew_id")?);
    let content = required_str(args, "instruction")?.to_string();
    let kind = InstructionKind::try_from(required_str(args, "instruction_type")?)
        .map_err(CrewError::InvalidArgument)?;
    let priority = args
        .get("priority")
        .and_then(Value::as_i64)
        .ok_or_else(|| CrewError::InvalidArgument("missing required field: priority".into()))?;
    let priority = u8::try_from(priority)
        .map_err(|_| CrewError::InvalidArgument("priority out of range".into()))?;

    let instruction = ctx
        .manager
        .add_instruction(&crew_id, kind, priority, content)
        .await?;
    Ok(json!({
        "instruction_id": instruction.id,
        "status": instruction.status,
        "priority": instruction.priority,
    }))
}

pub(crate) async fn list_dynamic_instructions(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let crew_id = CrewId::new(required_str(args, "crew_id")?);
    let status = match optional_str(args, "status") {
        None => None,
        Some(raw) => Some(
            InstructionStatus::try_from(raw).map_err(CrewError::InvalidArgument)?,
        ),
    };
    // NotFound for unknown crews rather than an empty listing.
    ctx.store.get_crew(&crew_id).await?;
    let instructions = ctx.store.list_instructions(&crew_id, status).await?;
    let rows: Vec<Value> = instructions
        .iter()
        .map(|i| {
            json!({
                "instruction_id": i.id,
                "kind": i.kind,
                "priority": i.priority,
                "status": i.status,
                "content": i.content,
                "created_at": i.created_at,
                "processed_at": i.processed_at,
            })
        })
        .collect();
    Ok(json!({ "instructions": rows }))
}

pub(crate) async fn get_instruction_status(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let id = InstructionId::new(required_str(args, "instruction_id")?);
    let instruction = ctx.store.get_instruction(&id).await?;
    Ok(json!({
        "id": instruction.id,
        "status": instruction.status,
        "kind": instruction.kind,
        "priority": instruction.priority,
        "processed_at": instruction.processed_at,
        "error": instruction.error,
    }))
}
