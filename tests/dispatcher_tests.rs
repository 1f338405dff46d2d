#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod support;

use crewd::dispatch::Dispatcher;
use crewd::security::auth;
use crewd::server::rpc;
use crewd::types::WorkflowState;
use crewd::CrewError;
use serde_json::{json, Map, Value};
use std::time::Duration;
use support::{default_context, sample_spec_json, wait_for_terminal};

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

async fn dispatcher_with_keys() -> (Dispatcher, String, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = default_context(&dir).await;
    let admin = auth::mint_key(&ctx.store, "admin-test", vec!["*".into()], None)
        .await
        .expect("admin key");
    let reader = auth::mint_key(&ctx.store, "reader", vec!["get_*".into()], None)
        .await
        .expect("reader key");
    (Dispatcher::new(ctx), admin, reader, dir)
}

#[tokio::test]
async fn end_to_end_tool_flow_through_the_dispatcher() {
    let (dispatcher, admin, _, _dir) = dispatcher_with_keys().await;

    let created = dispatcher
        .dispatch(
            Some(&admin),
            "create_evolving_crew",
            args(sample_spec_json("piper")),
        )
        .await
        .expect("create");
    let crew_id = created["crew_id"].as_str().expect("crew id").to_string();
    assert_eq!(created["agent_ids"].as_array().map(Vec::len), Some(2));

    let run = dispatcher
        .dispatch(
            Some(&admin),
            "run_autonomous_crew",
            args(json!({ "crew_id": crew_id.clone() })),
        )
        .await
        .expect("run");
    let workflow_id = run["workflow_id"].as_str().expect("workflow id").to_string();

    let state = wait_for_terminal(
        dispatcher.context(),
        &crewd::types::WorkflowId::new(workflow_id),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(state, WorkflowState::Completed);

    let status = dispatcher
        .dispatch(
            Some(&admin),
            "get_crew_status",
            args(json!({ "crew_id": crew_id.clone() })),
        )
        .await
        .expect("status");
    assert_eq!(status["state"], json!("idle"));
    assert_eq!(status["workflow"]["state"], json!("completed"));

    let listing = dispatcher
        .dispatch(Some(&admin), "list_active_crews", Map::new())
        .await
        .expect("list");
    assert_eq!(listing["active_crews"], json!(0));
    assert_eq!(listing["total_agents"], json!(2));
}

#[tokio::test]
async fn disband_flows_through_the_dispatcher() {
    let (dispatcher, admin, reader, _dir) = dispatcher_with_keys().await;

    let created = dispatcher
        .dispatch(
            Some(&admin),
            "create_evolving_crew",
            args(sample_spec_json("ephemeral")),
        )
        .await
        .expect("create");
    let crew_id = created["crew_id"].as_str().expect("crew id").to_string();

    // A key without the disband_crew glob is stopped at the gate.
    let denied = dispatcher
        .dispatch(
            Some(&reader),
            "disband_crew",
            args(json!({ "crew_id": crew_id.clone() })),
        )
        .await;
    assert!(matches!(denied, Err(CrewError::Forbidden(_))));

    let disbanded = dispatcher
        .dispatch(
            Some(&admin),
            "disband_crew",
            args(json!({ "crew_id": crew_id.clone() })),
        )
        .await
        .expect("disband");
    assert_eq!(disbanded["crew_id"], json!(crew_id.clone()));
    assert_eq!(disbanded["status"], json!("disbanded"));

    let gone = dispatcher
        .dispatch(
            Some(&admin),
            "get_crew_status",
            args(json!({ "crew_id": crew_id })),
        )
        .await;
    assert!(matches!(gone, Err(CrewError::NotFound(_))));
}

#[tokio::test]
async fn read_only_key_cannot_create_crews() {
    let (dispatcher, _, reader, _dir) = dispatcher_with_keys().await;

    let denied = dispatcher
        .dispatch(
            Some(&reader),
            "create_evolving_crew",
            args(sample_spec_json("nope")),
        )
        .await;
    assert!(matches!(denied, Err(CrewError::Forbidden(_))));

    // The same key may read.
    let result = dispatcher
        .dispatch(
            Some(&reader),
            "get_server_config",
            Map::new(),
        )
        .await;
    // get_server_config matches get_*.
    assert!(result.is_ok());
}

#[tokio::test]
async fn eleventh_call_in_a_minute_is_rate_limited() {
    let (dispatcher, admin, _, _dir) = dispatcher_with_keys().await;
    for _ in 0..10 {
        dispatcher
            .dispatch(Some(&admin), "health_check", Map::new())
            .await
            .expect("admitted");
    }
    let limited = dispatcher
        .dispatch(Some(&admin), "health_check", Map::new())
        .await;
    assert!(matches!(limited, Err(CrewError::RateLimited { .. })));
}

#[tokio::test]
async fn unknown_tool_and_bad_arguments_are_rejected() {
    let (dispatcher, admin, _, _dir) = dispatcher_with_keys().await;

    let unknown = dispatcher
        .dispatch(Some(&admin), "does_not_exist", Map::new())
        .await;
    assert!(matches!(unknown, Err(CrewError::NotFound(_))));

    let oversized = dispatcher
        .dispatch(
            Some(&admin),
            "get_crew_status",
            args(json!({ "crew_id": "x".repeat(10_001) })),
        )
        .await;
    assert!(matches!(oversized, Err(CrewError::InvalidArgument(_))));

    let missing = dispatcher
        .dispatch(Some(&admin), "get_crew_status", Map::new())
        .await;
    assert!(matches!(missing, Err(CrewError::InvalidArgument(_))));
}

#[tokio::test]
async fn audit_records_bracket_each_request() {
    let (dispatcher, admin, _, _dir) = dispatcher_with_keys().await;
    dispatcher
        .dispatch(Some(&admin), "health_check", Map::new())
        .await
        .expect("ok");

    let records = dispatcher
        .context()
        .store
        .recent_audit(10)
        .await
        .expect("audit");
    let phases: Vec<String> = records
        .iter()
        .filter(|r| r.tool == "health_check")
        .map(|r| r.phase.as_str().to_string())
        .collect();
    // Newest first: completion then start.
    assert_eq!(phases, vec!["request_complete", "request_start"]);

    // The plaintext credential never lands in the audit log.
    assert!(records.iter().all(|r| !r.arg_hash.contains(&admin)));
}

#[tokio::test]
async fn evolution_tools_respect_cooldown_idempotence() {
    let (dispatcher, admin, _, _dir) = dispatcher_with_keys().await;

    let created = dispatcher
        .dispatch(
            Some(&admin),
            "create_agent_from_template",
            args(json!({ "template": "diplomat", "role": "Mediator" })),
        )
        .await
        .expect("create agent");
    let agent_id = created["agent_id"].as_str().expect("id").to_string();

    let first = dispatcher
        .dispatch(
            Some(&admin),
            "trigger_agent_evolution",
            args(json!({ "agent_id": agent_id.clone() })),
        )
        .await
        .expect("first evolution");
    assert_eq!(first["cycle"], json!(1));
    assert_eq!(first["cooldown_suppressed"], json!(false));

    let second = dispatcher
        .dispatch(
            Some(&admin),
            "trigger_agent_evolution",
            args(json!({ "agent_id": agent_id.clone() })),
        )
        .await
        .expect("second evolution");
    assert_eq!(second["cycle"], json!(1));
    assert_eq!(second["cooldown_suppressed"], json!(true));

    // Exactly one event was appended.
    let events = dispatcher
        .context()
        .store
        .list_evolution_events(&crewd::types::AgentId::new(created["agent_id"].as_str().expect("id")), None)
        .await
        .expect("events");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn jsonrpc_frames_round_trip_through_the_transport_layer() {
    let (dispatcher, admin, _, _dir) = dispatcher_with_keys().await;

    let init = rpc::handle_frame(
        &dispatcher,
        Some(&admin),
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
    )
    .await
    .expect("response");
    assert_eq!(init["result"]["serverInfo"]["name"], json!("crewd"));

    let listing = rpc::handle_frame(
        &dispatcher,
        Some(&admin),
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
    )
    .await
    .expect("response");
    assert!(listing["result"]["tools"].as_array().is_some_and(|t| t.len() >= 17));

    let call = rpc::handle_frame(
        &dispatcher,
        Some(&admin),
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"health_check","arguments":{}}}"#,
    )
    .await
    .expect("response");
    let text = call["result"]["content"][0]["text"].as_str().expect("text");
    let payload: Value = serde_json::from_str(text).expect("payload json");
    assert!(payload.get("status").is_some());

    // Unknown method.
    let missing = rpc::handle_frame(
        &dispatcher,
        Some(&admin),
        r#"{"jsonrpc":"2.0","id":4,"method":"bogus/method"}"#,
    )
    .await
    .expect("response");
    assert_eq!(missing["error"]["code"], json!(-32601));

    // A notification (no id) produces no frame.
    let none = rpc::handle_frame(
        &dispatcher,
        Some(&admin),
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    )
    .await;
    assert!(none.is_none());

    // Errors surface sanitized taxonomy codes.
    let unauthorized = rpc::handle_frame(
        &dispatcher,
        None,
        r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"health_check","arguments":{}}}"#,
    )
    .await
    .expect("response");
    assert_eq!(unauthorized["error"]["data"]["kind"], json!("UNAUTHENTICATED"));
}
