use crate::app::AppContext;
use crate::dispatch::required_str;
use crate::error::{CrewError, Result};
use crate::types::{CrewId, CrewSpec};
use serde_json::{json, Map, Value};

pub(crate) async fn create_evolving_crew(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let spec: CrewSpec = serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| CrewError::InvalidArgument(format!("invalid crew spec: {e}")))?;
    let (crew_id, agent_ids) = ctx.manager.create_crew(spec).await?;
    Ok(json!({
        "crew_id": crew_id,
        "agent_ids": agent_ids,
        "status": "created",
    }))
}

pub(crate) async fn run_autonomous_crew(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let crew_id = CrewId::new(required_str(args, "crew_id")?);
    let context = args
        .get("context")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let allow_evolution = args
        .get("allow_evolution")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let workflow = ctx
        .manager
        .start_crew(&crew_id, context, allow_evolution)
        .await?;
    Ok(json!({
        "workflow_id": workflow.id,
        "state": workflow.state,
    }))
}

pub(crate) async fn get_crew_status(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let crew_id = CrewId::new(required_str(args, "crew_id")?);
    ctx.manager.get_crew_status(&crew_id).await
}

pub(crate) async fn list_active_crews(ctx: &AppContext) -> Result<Value> {
    ctx.manager.list_active_crews().await
}

pub(crate) async fn crew_self_assessment(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let crew_id = CrewId::new(required_str(args, "crew_id")?);
    ctx.manager.crew_self_assessment(&crew_id).await
}

pub(crate) async fn disband_crew(ctx: &AppContext, args: &Map<String, Value>) -> Result<Value> {
    let crew_id = CrewId::new(required_str(args, "crew_id")?);
    ctx.manager.disband_crew(&crew_id).await?;
    Ok(json!({
        "crew_id": crew_id,
        "status": "disbanded",
    }))
}
