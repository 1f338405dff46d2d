use crate::app::AppContext;
use crate::metrics::Metrics;
use crate::types::{ComponentStatus, HealthSummary, InstructionKind};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background ticking loops: evolution sweep, instruction expirer,
/// workflow reaper, health probe. Every loop is idempotent, owns a
/// shutdown receiver, and drains cleanly on `shutdown()`.
pub struct Supervisor {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    #[must_use]
    pub fn spawn(ctx: &AppContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = vec![
            spawn_loop(
                "evolution-sweep",
                ctx.current_config().evolution_sweep_secs,
                shutdown.subscribe(),
                ctx.clone(),
                |ctx| async move {
                    match ctx.evolution.sweep().await {
                        Ok(evolved) if evolved > 0 => {
                            Metrics::add(&ctx.metrics.evolutions_committed, u64::from(evolved));
                            info!(evolved, "evolution sweep committed mutations");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "evolution sweep failed"),
                    }
                },
            ),
            spawn_loop(
                "instruction-expirer",
                ctx.current_config().instruction_expirer_secs,
                shutdown.subscribe(),
                ctx.clone(),
                |ctx| async move {
                    let ttl = ChronoDuration::seconds(
                        i64::try_from(ctx.current_config().instruction_ttl_secs)
                            .unwrap_or(3_600),
                    );
                    match ctx.bus.expire(ttl).await {
                        Ok(expired) if expired > 0 => {
                            Metrics::add(&ctx.metrics.instructions_expired, expired);
                            debug!(expired, "expired stale instructions");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "instruction expirer failed"),
                    }
                },
            ),
            spawn_loop(
                "workflow-reaper",
                ctx.current_config().workflow_reaper_secs,
                shutdown.subscribe(),
                ctx.clone(),
                |ctx| async move {
                    let max = ChronoDuration::seconds(
                        i64::try_from(ctx.current_config().max_workflow_secs).unwrap_or(3_600),
                    );
                    let cutoff = Utc::now() - max;
                    let overdue = match ctx.store.list_overdue_workflows(cutoff).await {
                        Ok(overdue) => overdue,
                        Err(err) => {
                            warn!(error = %err, "workflow reaper query failed");
                            return;
                        }
                    };
                    for workflow in overdue {
                        warn!(workflow = %workflow.id, crew = %workflow.crew_id, "reaping overdue workflow");
                        let result = ctx
                            .manager
                            .add_instruction(
                                &workflow.crew_id,
                                InstructionKind::EmergencyStop,
                                5,
                                "workflow exceeded max duration".to_string(),
                            )
                            .await;
                        if let Err(err) = result {
                            warn!(workflow = %workflow.id, error = %err, "reaper emergency stop failed");
                        }
                    }
                },
            ),
            spawn_loop(
                "health-probe",
                ctx.current_config().health_probe_secs,
                shutdown.subscribe(),
                ctx.clone(),
                |ctx| async move {
                    let mut summary = HealthSummary::starting();
                    summary.store = match ctx.store.ping().await {
                        Ok(()) => ComponentStatus::Healthy,
                        Err(_) => ComponentStatus::Down,
                    };
                    let total = ctx.current_config().max_concurrent_workflows as u64;
                    let free = ctx.engine.worker_slots_free() as u64;
                    summary.worker_slots_total = total;
                    summary.worker_slots_free = free;
                    summary.worker_pool = if free == 0 {
                        ComponentStatus::Degraded
                    } else {
                        ComponentStatus::Healthy
                    };
                    summary.active_workflows = match ctx.store.list_active_workflows().await {
                        Ok(active) => active.len() as u64,
                        Err(_) => ctx.engine.active_count() as u64,
                    };
                    summary.checked_at = Utc::now();
                    summary.roll_up();
                    ctx.set_health(summary);
                },
            ),
        ];
        Self { shutdown, handles }
    }

    /// Signals every loop and waits for them to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("supervisor drained");
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    ctx: AppContext,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(AppContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of tokio's interval fires immediately; consume it
        // so loops start one full period after boot.
        interval.tick().await;
        info!(task = name, period_secs = interval_secs, "supervisor loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => tick(ctx.clone()).await,
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "supervisor loop stopped");
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::Supervisor;
    use crate::app::test_support::test_context;

    #[tokio::test]
    async fn supervisor_spawns_and_drains() {
        let (ctx, _dir) = test_context().await;
        let supervisor = Supervisor::spawn(&ctx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        supervisor.shutdown().await;
    }
}
