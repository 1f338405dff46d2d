use crate::app::AppContext;
use crate::dispatch::{optional_str, required_str};
use crate::error::{CrewError, Result};
use crate::metrics::Metrics;
use crate::types::{AgentId, EvolutionStrategy, EvolutionTrigger};
use serde_json::{json, Map, Value};

pub(crate) async fn trigger_agent_evolution(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let agent_id = AgentId::new(required_str(args, "agent_id")?);
    let strategy = match optional_str(args, "evolution_type") {
        None => None,
        Some(raw) => {
            Some(EvolutionStrategy::try_from(raw).map_err(CrewError::InvalidArgument)?)
        }
    };
    let forced = args.get("force").and_then(Value::as_bool).unwrap_or(false);

    let trigger = EvolutionTrigger::Manual { strategy, forced };
    match ctx.evolution.evolve(&agent_id, trigger).await? {
        Some(event) => {
            Metrics::incr(&ctx.metrics.evolutions_committed);
            Ok(json!({
                "agent_id": event.agent_id,
                "cycle": event.cycle,
                "strategy": event.kind,
                "previous_traits": event.previous_traits,
                "new_traits": event.new_traits,
                "cooldown_suppressed": false,
            }))
        }
        None => {
            // Idempotent within the cooldown window: re-report the last
            // committed event instead of mutating again.
            let events = ctx.store.list_evolution_events(&agent_id, None).await?;
            let last = events.last().ok_or_else(|| {
                CrewError::Conflict(format!(
                    "agent {agent_id} is inside its evolution cooldown"
                ))
            })?;
            Ok(json!({
                "agent_id": last.agent_id,
                "cycle": last.cycle,
                "strategy": last.kind,
                "previous_traits": last.previous_traits,
                "new_traits": last.new_traits,
                "cooldown_suppressed": true,
            }))
        }
    }
}

pub(crate) async fn get_agent_reflection(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let agent_id = AgentId::new(required_str(args, "agent_id")?);
    ctx.manager.get_agent_reflection(&agent_id).await
}

pub(crate) async fn create_agent_from_template(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let template = required_str(args, "template")?;
    let role = required_str(args, "role")?.to_string();
    let goal = optional_str(args, "goal")
        .map_or_else(|| format!("Excel as a {role}"), ToString::to_string);
    let backstory = optional_str(args, "backstory").map_or_else(
        || format!("An agent shaped by the {template} template"),
        ToString::to_string,
    );
    let agent = ctx
        .manager
        .create_agent_from_template(template, role, goal, backstory)
        .await?;
    Ok(json!({
        "agent_id": agent.id,
        "role": agent.role,
        "personality": agent.personality,
    }))
}

pub(crate) async fn get_agent_details(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let agent_id = AgentId::new(required_str(args, "agent_id")?);
    let agent = ctx.store.get_agent(&agent_id).await?;
    let events = ctx.store.list_evolution_events(&agent_id, None).await?;
    Ok(json!({
        "agent_id": agent.id,
        "role": agent.role,
        "goal": agent.goal,
        "backstory": agent.backstory,
        "personality": agent.personality,
        "experience": agent.experience,
        "evolution_cycles": agent.evolution_cycles,
        "created_at": agent.created_at,
        "last_evolved_at": agent.last_evolved_at,
        "evolution_events": events.len(),
    }))
}

pub(crate) async fn get_evolution_summary(ctx: &AppContext) -> Result<Value> {
    ctx.evolution.summary().await
}
