#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod support;

use crewd::dispatch::Dispatcher;
use crewd::security::auth;
use crewd::types::WorkflowState;
use serde_json::{json, Map, Value};
use std::time::Duration;
use support::{default_context, sample_spec_json, wait_for_terminal};

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

async fn admin_dispatcher() -> (Dispatcher, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = default_context(&dir).await;
    let admin = auth::mint_key(&ctx.store, "surface-admin", vec!["*".into()], None)
        .await
        .expect("admin key");
    (Dispatcher::new(ctx), admin, dir)
}

async fn run_crew_to_completion(dispatcher: &Dispatcher, admin: &str, name: &str) -> String {
    let created = dispatcher
        .dispatch(Some(admin), "create_evolving_crew", args(sample_spec_json(name)))
        .await
        .expect("create");
    let crew_id = created["crew_id"].as_str().expect("crew id").to_string();
    let run = dispatcher
        .dispatch(
            Some(admin),
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
    crew_id
}

#[tokio::test]
async fn self_assessment_reports_coverage_and_gaps() {
    let (dispatcher, admin, _dir) = admin_dispatcher().await;
    let created = dispatcher
        .dispatch(
            Some(&admin),
            "create_evolving_crew",
            args(sample_spec_json("assessed")),
        )
        .await
        .expect("create");
    let crew_id = created["crew_id"].as_str().expect("id").to_string();

    let assessment = dispatcher
        .dispatch(
            Some(&admin),
            "crew_self_assessment",
            args(json!({ "crew_id": crew_id })),
        )
        .await
        .expect("assessment");
    // Creative + analytical presets cover all three essential axes.
    let strengths = assessment["strengths"].as_array().expect("strengths");
    assert!(!strengths.is_empty());
    assert!(assessment["skill_coverage"]["analytical"].as_f64().expect("cov") >= 0.7);
}

#[tokio::test]
async fn reflection_and_details_expose_experience_after_a_run() {
    let (dispatcher, admin, _dir) = admin_dispatcher().await;
    let crew_id = run_crew_to_completion(&dispatcher, &admin, "reflective").await;

    let status = dispatcher
        .dispatch(
            Some(&admin),
            "get_crew_status",
            args(json!({ "crew_id": crew_id })),
        )
        .await
        .expect("status");
    let agent_id = status["agents"][0]["agent_id"]
        .as_str()
        .expect("agent id")
        .to_string();

    let reflection = dispatcher
        .dispatch(
            Some(&admin),
            "get_agent_reflection",
            args(json!({ "agent_id": agent_id.clone() })),
        )
        .await
        .expect("reflection");
    assert_eq!(reflection["metrics"]["tasks_completed"], json!(1));
    assert_eq!(
        reflection["reflections"].as_array().map(Vec::len),
        Some(1)
    );

    let details = dispatcher
        .dispatch(
            Some(&admin),
            "get_agent_details",
            args(json!({ "agent_id": agent_id })),
        )
        .await
        .expect("details");
    assert_eq!(details["role"], json!("Writer"));
    assert!(details["personality"]["creative"].as_f64().expect("trait") > 0.8);
}

#[tokio::test]
async fn instruction_listing_filters_by_status() {
    let (dispatcher, admin, _dir) = admin_dispatcher().await;
    let created = dispatcher
        .dispatch(
            Some(&admin),
            "create_evolving_crew",
            args(sample_spec_json("listed")),
        )
        .await
        .expect("create");
    let crew_id = created["crew_id"].as_str().expect("id").to_string();

    for priority in [1, 3] {
        dispatcher
            .dispatch(
                Some(&admin),
                "add_dynamic_instruction",
                args(json!({
                    "crew_id": crew_id.clone(),
                    "instruction": format!("note at {priority}"),
                    "instruction_type": "guidance",
                    "priority": priority,
                })),
            )
            .await
            .expect("submit");
    }

    let pending = dispatcher
        .dispatch(
            Some(&admin),
            "list_dynamic_instructions",
            args(json!({ "crew_id": crew_id.clone(), "status": "pending" })),
        )
        .await
        .expect("list");
    assert_eq!(pending["instructions"].as_array().map(Vec::len), Some(2));

    let applied = dispatcher
        .dispatch(
            Some(&admin),
            "list_dynamic_instructions",
            args(json!({ "crew_id": crew_id, "status": "applied" })),
        )
        .await
        .expect("list");
    assert_eq!(applied["instructions"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn evolution_summary_and_live_events_reflect_activity() {
    let (dispatcher, admin, _dir) = admin_dispatcher().await;

    let created = dispatcher
        .dispatch(
            Some(&admin),
            "create_agent_from_template",
            args(json!({ "template": "executor", "role": "Closer" })),
        )
        .await
        .expect("agent");
    let agent_id = created["agent_id"].as_str().expect("id").to_string();
    dispatcher
        .dispatch(
            Some(&admin),
            "trigger_agent_evolution",
            args(json!({ "agent_id": agent_id, "evolution_type": "personality_drift" })),
        )
        .await
        .expect("evolve");

    let summary = dispatcher
        .dispatch(Some(&admin), "get_evolution_summary", Map::new())
        .await
        .expect("summary");
    assert_eq!(summary["total_evolutions"], json!(1));
    assert_eq!(summary["by_strategy"]["personality_drift"], json!(1));

    let events = dispatcher
        .dispatch(Some(&admin), "get_live_events", args(json!({ "limit": 20 })))
        .await
        .expect("events");
    assert!(events["events"].as_array().is_some_and(|rows| !rows.is_empty()));
    assert_eq!(events["evolution_events"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn config_snapshot_and_reload_round_trip() {
    let (dispatcher, admin, _dir) = admin_dispatcher().await;

    let snapshot = dispatcher
        .dispatch(Some(&admin), "get_server_config", Map::new())
        .await
        .expect("config");
    assert_eq!(snapshot["transport"], json!("stdio"));
    assert!(snapshot.get("stdio_api_key").is_none());
    assert!(snapshot.get("bootstrap_admin_key").is_none());

    let reloaded = dispatcher
        .dispatch(Some(&admin), "reload_config", Map::new())
        .await
        .expect("reload");
    assert_eq!(reloaded["status"], json!("reloaded"));
    // Fixed-for-process fields survive the reload untouched.
    assert_eq!(reloaded["config"]["transport"], json!("stdio"));
}

#[tokio::test]
async fn health_check_reports_components() {
    let (dispatcher, admin, _dir) = admin_dispatcher().await;
    let health = dispatcher
        .dispatch(Some(&admin), "health_check", Map::new())
        .await
        .expect("health");
    assert!(health.get("status").is_some());
    assert!(health["components"].get("store").is_some());
    assert!(health["components"].get("worker_pool").is_some());
    assert!(health["uptime"].as_u64().is_some());
}
