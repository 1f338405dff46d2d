use crate::app::AppContext;
use crate::error::Result;
use serde_json::{json, Map, Value};
use tracing::info;

pub(crate) async fn health_check(ctx: &AppContext) -> Result<Value> {
    let summary = ctx.health_snapshot();
    Ok(json!({
        "status": summary.status,
        "components": {
            "store": summary.store,
            "worker_pool": summary.worker_pool,
        },
        "active_workflows": summary.active_workflows,
        "worker_slots_free": summary.worker_slots_free,
        "uptime": ctx.uptime_secs(),
        "checked_at": summary.checked_at,
    }))
}

pub(crate) async fn get_server_config(ctx: &AppContext) -> Result<Value> {
    Ok(ctx.current_config().sanitized_snapshot())
}

pub(crate) async fn reload_config(ctx: &AppContext) -> Result<Value> {
    let next = ctx.current_config().reloaded()?;
    ctx.swap_config(next);
    info!("configuration reloaded");
    Ok(json!({
        "status": "reloaded",
        "config": ctx.current_config().sanitized_snapshot(),
    }))
}

pub(crate) async fn get_live_events(
    ctx: &AppContext,
    args: &Map<String, Value>,
) -> Result<Value> {
    let limit = args
        .get("limit")
        .and_then(Value::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(50);
    let audit = ctx.store.recent_audit(limit).await?;
    let evolution = ctx.store.recent_evolution_events(limit).await?;

    let audit_rows: Vec<Value> = audit
        .iter()
        .map(|record| {
            json!({
                "ts": record.ts,
                "kind": "audit",
                "client_id": record.client_id,
                "tool": record.tool,
                "phase": record.phase,
                "outcome": record.outcome,
                "latency_ms": record.latency_ms,
            })
        })
        .collect();
    let evolution_rows: Vec<Value> = evolution
        .iter()
        .map(|event| {
            json!({
                "ts": event.created_at,
                "kind": "evolution",
                "agent_id": event.agent_id,
                "cycle": event.cycle,
                "strategy": event.kind,
                "reason": event.reason,
            })
        })
        .collect();
    Ok(json!({
        "events": audit_rows,
        "evolution_events": evolution_rows,
    }))
}
