use crate::config::ServerConfig;
use crate::error::Result;
use crate::evolution::EvolutionEngine;
use crate::security::paths;
use crate::store::Store;
use crate::types::{AgentProfile, Crew, CrewOutcome, Reflection, Workflow};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Crew autonomy below this level suppresses automatic post-run evolution;
/// explicit triggers still work.
const AUTO_EVOLUTION_AUTONOMY_FLOOR: f64 = 0.3;

/// Debrief phase: fold the runner outcome back into each agent's
/// experience, capture reflections, serialize deliverables, and hand
/// evolution candidates to the engine.
#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    store: &Store,
    evolution: &EvolutionEngine,
    config: &ServerConfig,
    crew: &Crew,
    agents: &[AgentProfile],
    workflow: &Workflow,
    outcome: &CrewOutcome,
    live: &crate::runner::LiveContext,
) -> Result<()> {
    for agent in agents {
        let mut agent = store.get_agent(&agent.id).await?;
        let outputs: Vec<_> = outcome
            .task_outputs
            .iter()
            .filter(|o| o.agent_id == agent.id)
            .collect();
        if outputs.is_empty() {
            continue;
        }
        for output in &outputs {
            agent.experience.record_task(output.success, output.quality);
        }
        agent.push_reflection(build_reflection(&agent, &outputs));
        store.put_agent(&agent).await?;
        debug!(agent = %agent.id, tasks = outputs.len(), "debrief updated experience");
    }

    write_deliverables(config, crew, workflow, outcome).await?;

    // Strict-class notes still queued are surfaced in the log; the runner
    // either consumed them live or they inform the next run.
    for note in live.snapshot() {
        if note.strict {
            info!(workflow = %workflow.id, kind = %note.kind, "strict instruction carried into debrief");
        }
    }

    if workflow.allow_evolution && crew.autonomy_level > AUTO_EVOLUTION_AUTONOMY_FLOOR {
        for agent in agents {
            let profile = store.get_agent(&agent.id).await?;
            let Some(trigger) = EvolutionEngine::evaluate_trigger(&profile) else {
                continue;
            };
            match evolution.evolve(&agent.id, trigger).await {
                Ok(Some(event)) => {
                    info!(agent = %agent.id, cycle = event.cycle, "post-run evolution committed");
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(agent = %agent.id, error = %err, "post-run evolution failed");
                }
            }
        }
    }
    Ok(())
}

fn build_reflection(
    agent: &AgentProfile,
    outputs: &[&crate::types::TaskOutput],
) -> Reflection {
    let successes = outputs.iter().filter(|o| o.success).count();
    let mean_quality = if outputs.is_empty() {
        0.0
    } else {
        outputs.iter().map(|o| o.quality).sum::<f64>() / outputs.len() as f64
    };
    let mut performance = BTreeMap::new();
    performance.insert(
        "run_success_rate".to_string(),
        successes as f64 / outputs.len() as f64,
    );
    performance.insert("run_mean_quality".to_string(), mean_quality);
    performance.insert(
        "lifetime_avg_quality".to_string(),
        agent.experience.avg_quality,
    );
    Reflection {
        created_at: Utc::now(),
        performance,
        skill_gaps: agent.skill_gaps(),
        notes: format!(
            "{successes} of {} task(s) succeeded in this run",
            outputs.len()
        ),
    }
}

async fn write_deliverables(
    config: &ServerConfig,
    crew: &Crew,
    workflow: &Workflow,
    outcome: &CrewOutcome,
) -> Result<()> {
    let root = config.deliverables_root();
    let dir = workflow.id.value();

    let summary = serde_json::json!({
        "workflow_id": workflow.id,
        "crew_id": crew.id,
        "crew_name": crew.name,
        "summary": outcome.summary,
        "tasks": outcome.task_outputs.len(),
        "succeeded": outcome.task_outputs.iter().filter(|o| o.success).count(),
    });
    paths::write_text_deliverable(&root, dir, "summary.json", &summary.to_string()).await?;

    for (index, output) in outcome.task_outputs.iter().enumerate() {
        let body = format!(
            "# Task {index}\n\n{}\n\n## Output ({})\n\n{}\n",
            output.description,
            if output.success { "ok" } else { "failed" },
            output.output
        );
        let truncated = if body.len() > paths::MAX_TEXT_CONTENT {
            body.chars().take(paths::MAX_TEXT_CONTENT / 4).collect()
        } else {
            body
        };
        paths::write_text_deliverable(&root, dir, &format!("task-{index}.md"), &truncated).await?;
    }
    Ok(())
}
