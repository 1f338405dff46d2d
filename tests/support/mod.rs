#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, dead_code)]

use crewd::app::AppContext;
use crewd::config::ServerConfig;
use crewd::runner::{CrewRunner, SimulatedRunner};
use crewd::types::{WorkflowId, WorkflowState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// File-backed context so concurrent tasks share one real database and
/// state survives a rebuild of the component graph.
pub async fn build_context(dir: &TempDir, runner: Arc<dyn CrewRunner>) -> AppContext {
    let mut config = ServerConfig::for_tests(dir.path().to_path_buf());
    config.database_url = format!("sqlite://{}/crewd-test.db", dir.path().display());
    AppContext::build(config, Some(runner))
        .await
        .expect("context builds")
}

pub async fn default_context(dir: &TempDir) -> AppContext {
    build_context(dir, Arc::new(SimulatedRunner::new(Duration::from_millis(5)))).await
}

/// Polls until the workflow reaches a terminal state or the timeout
/// elapses, returning its final state.
pub async fn wait_for_terminal(
    ctx: &AppContext,
    workflow_id: &WorkflowId,
    timeout: Duration,
) -> WorkflowState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let workflow = ctx
            .store
            .get_workflow(workflow_id)
            .await
            .expect("workflow exists");
        if workflow.state.is_terminal() {
            return workflow.state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workflow {workflow_id} still {} after {timeout:?}",
            workflow.state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn sample_spec_json(name: &str) -> serde_json::Value {
    serde_json::json!({
        "crew_name": name,
        "agents_config": [
            {
                "role": "Writer",
                "goal": "write the draft",
                "backstory": "a seasoned writer",
                "personality_preset": "creative"
            },
            {
                "role": "Reviewer",
                "goal": "review the draft",
                "backstory": "a careful reviewer",
                "personality_preset": "analytical"
            }
        ],
        "tasks": [
            { "description": "draft the piece", "expected_output": "a draft" },
            { "description": "review the piece", "expected_output": "review notes" }
        ],
        "autonomy_level": 0.5
    })
}
