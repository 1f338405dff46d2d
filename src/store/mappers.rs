use crate::error::{CrewError, Result};
use crate::types::{
    AgentId, AgentProfile, Crew, CrewId, CrewState, ExperienceCounters, Instruction,
    InstructionId, InstructionKind, InstructionStatus, Personality, Reflection, TaskSpec,
    Workflow, WorkflowId, WorkflowState,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(super) fn get_text(row: &SqliteRow, column: &str) -> Result<String> {
    row.try_get::<String, _>(column)
        .map_err(|e| CrewError::Store(format!("column {column}: {e}")))
}

pub(super) fn get_opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>> {
    row.try_get::<Option<String>, _>(column)
        .map_err(|e| CrewError::Store(format!("column {column}: {e}")))
}

pub(super) fn get_i64(row: &SqliteRow, column: &str) -> Result<i64> {
    row.try_get::<i64, _>(column)
        .map_err(|e| CrewError::Store(format!("column {column}: {e}")))
}

pub(super) fn get_opt_i64(row: &SqliteRow, column: &str) -> Result<Option<i64>> {
    row.try_get::<Option<i64>, _>(column)
        .map_err(|e| CrewError::Store(format!("column {column}: {e}")))
}

pub(super) fn get_f64(row: &SqliteRow, column: &str) -> Result<f64> {
    row.try_get::<f64, _>(column)
        .map_err(|e| CrewError::Store(format!("column {column}: {e}")))
}

pub(super) fn get_bool(row: &SqliteRow, column: &str) -> Result<bool> {
    get_i64(row, column).map(|v| v != 0)
}

pub(super) fn get_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw = get_text(row, column)?;
    parse_datetime(column, &raw)
}

pub(super) fn get_opt_datetime(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    match get_opt_text(row, column)? {
        None => Ok(None),
        Some(raw) => parse_datetime(column, &raw).map(Some),
    }
}

fn parse_datetime(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CrewError::Store(format!("column {column} holds invalid timestamp: {e}")))
}

pub(super) fn encode_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(super) fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| CrewError::Store(format!("column {column} holds invalid JSON: {e}")))
}

pub(super) fn agent_from_row(row: &SqliteRow) -> Result<AgentProfile> {
    let personality: Personality = decode_json("personality", &get_text(row, "personality")?)?;
    let experience: ExperienceCounters = decode_json("experience", &get_text(row, "experience")?)?;
    let reflections: Vec<Reflection> = decode_json("reflections", &get_text(row, "reflections")?)?;
    Ok(AgentProfile {
        id: AgentId::new(get_text(row, "agent_id")?),
        role: get_text(row, "role")?,
        goal: get_text(row, "goal")?,
        backstory: get_text(row, "backstory")?,
        personality,
        experience,
        evolution_cycles: u32::try_from(get_i64(row, "evolution_cycles")?).unwrap_or(0),
        created_at: get_datetime(row, "created_at")?,
        last_evolved_at: get_opt_datetime(row, "last_evolved_at")?,
        reflections,
    })
}

pub(super) fn crew_from_row(row: &SqliteRow) -> Result<Crew> {
    let agent_ids: Vec<AgentId> = decode_json("agent_ids", &get_text(row, "agent_ids")?)?;
    let tasks: Vec<TaskSpec> = decode_json("tasks", &get_text(row, "tasks")?)?;
    let state_raw = get_text(row, "state")?;
    Ok(Crew {
        id: CrewId::new(get_text(row, "crew_id")?),
        name: get_text(row, "name")?,
        agent_ids,
        tasks,
        autonomy_level: get_f64(row, "autonomy_level")?,
        formation_date: get_datetime(row, "formation_date")?,
        state: CrewState::try_from(state_raw.as_str()).map_err(CrewError::Store)?,
    })
}

pub(super) fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    let state_raw = get_text(row, "state")?;
    let result = match get_opt_text(row, "result")? {
        None => None,
        Some(raw) => Some(decode_json("result", &raw)?),
    };
    Ok(Workflow {
        id: WorkflowId::new(get_text(row, "workflow_id")?),
        crew_id: CrewId::new(get_text(row, "crew_id")?),
        state: WorkflowState::try_from(state_raw.as_str()).map_err(CrewError::Store)?,
        allow_evolution: get_bool(row, "allow_evolution")?,
        context: decode_json("context", &get_text(row, "context")?)?,
        result,
        cancellation_reason: get_opt_text(row, "cancellation_reason")?,
        failure: get_opt_text(row, "failure")?,
        started_at: get_datetime(row, "started_at")?,
        ended_at: get_opt_datetime(row, "ended_at")?,
    })
}

pub(super) fn instruction_from_row(row: &SqliteRow) -> Result<Instruction> {
    let kind_raw = get_text(row, "kind")?;
    let status_raw = get_text(row, "status")?;
    Ok(Instruction {
        id: InstructionId::new(get_text(row, "instruction_id")?),
        crew_id: CrewId::new(get_text(row, "crew_id")?),
        workflow_id: get_opt_text(row, "workflow_id")?.map(WorkflowId::new),
        kind: InstructionKind::try_from(kind_raw.as_str()).map_err(CrewError::Store)?,
        priority: u8::try_from(get_i64(row, "priority")?).unwrap_or(1),
        content: get_text(row, "content")?,
        status: InstructionStatus::try_from(status_raw.as_str()).map_err(CrewError::Store)?,
        error: get_opt_text(row, "error")?,
        created_at: get_datetime(row, "created_at")?,
        processed_at: get_opt_datetime(row, "processed_at")?,
    })
}
