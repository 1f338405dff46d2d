use crate::error::{CrewError, Result};
use crate::types::{AgentProfile, Crew, CrewOutcome, InstructionKind, TaskOutput};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Cooperative cancellation handle threaded into the intake loop and the
/// runner adapter. `cancel` is sticky: once fired it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the signal fires; returns immediately if it already
    /// has.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register as a waiter before the final flag check so a cancel
            // landing in between cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One injected note on the runner's mutable context channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveNote {
    pub kind: InstructionKind,
    pub content: String,
    /// Constraint-class notes get stricter enforcement at debrief.
    pub strict: bool,
}

/// Mutable context channel shared between the instruction intake loop and
/// a kickoff in flight. Runners that support live context drain it between
/// task boundaries; everything still queued at the end is folded into the
/// debrief.
#[derive(Debug, Clone, Default)]
pub struct LiveContext {
    notes: Arc<Mutex<Vec<LiveNote>>>,
}

impl LiveContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, note: LiveNote) {
        let mut notes = match self.notes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        notes.push(note);
    }

    /// Removes and returns everything pushed so far.
    #[must_use]
    pub fn drain(&self) -> Vec<LiveNote> {
        let mut notes = match self.notes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *notes)
    }

    /// Snapshot without consuming, for the debrief summary.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LiveNote> {
        let notes = match self.notes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        notes.clone()
    }
}

/// Everything a runner needs for one kickoff.
pub struct KickoffRequest {
    pub crew: Crew,
    pub agents: Vec<AgentProfile>,
    pub context: Value,
    pub live: LiveContext,
    pub cancel: CancelSignal,
}

/// The opaque agent backend. `kickoff` blocks for the whole execution and
/// is always dispatched on a worker thread, never on the async scheduler.
pub trait CrewRunner: Send + Sync + 'static {
    /// # Errors
    /// `CrewError::Cancelled` when the cancellation signal was honored,
    /// any other error for runner failures.
    fn kickoff(&self, request: &KickoffRequest) -> Result<CrewOutcome>;
}

/// Placeholder runner for processes booted without an agent backend:
/// every kickoff fails fast as `Unavailable` so the workflow surfaces a
/// clear, retriable error instead of hanging.
pub struct UnconfiguredRunner;

impl CrewRunner for UnconfiguredRunner {
    fn kickoff(&self, request: &KickoffRequest) -> Result<CrewOutcome> {
        Err(CrewError::Unavailable(format!(
            "no agent backend configured, cannot run crew {}",
            request.crew.id
        )))
    }
}

/// Deterministic scripted runner used when no real agent backend is
/// configured, and by the test suites.
///
/// Task descriptions drive its behavior: a description containing
/// `simulate-failure` produces a failed task, `simulate-hang` makes the
/// runner ignore cancellation until the hang duration elapses.
pub struct SimulatedRunner {
    step_delay: Duration,
    hang_duration: Duration,
}

pub const FAIL_MARKER: &str = "simulate-failure";
pub const HANG_MARKER: &str = "simulate-hang";

impl SimulatedRunner {
    #[must_use]
    pub const fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            hang_duration: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub const fn with_hang_duration(mut self, hang: Duration) -> Self {
        self.hang_duration = hang;
        self
    }

    fn task_quality(agent: &AgentProfile) -> f64 {
        let analytical = agent.personality.get("analytical").unwrap_or(0.5);
        let decisive = agent.personality.get("decisive").unwrap_or(0.5);
        ((analytical + decisive) / 2.0).clamp(0.0, 1.0)
    }
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl CrewRunner for SimulatedRunner {
    fn kickoff(&self, request: &KickoffRequest) -> Result<CrewOutcome> {
        info!(crew = %request.crew.id, tasks = request.crew.tasks.len(), "simulated kickoff");
        let mut outputs = Vec::with_capacity(request.crew.tasks.len());
        let mut applied_notes = 0_usize;

        for (index, task) in request.crew.tasks.iter().enumerate() {
            if task.description.contains(HANG_MARKER) {
                // Deliberately ignores the cancellation signal to exercise
                // the hard-deadline path.
                std::thread::sleep(self.hang_duration);
            } else {
                std::thread::sleep(self.step_delay);
            }

            if request.cancel.is_cancelled() {
                return Err(CrewError::Cancelled(
                    "kickoff interrupted by cancellation signal".to_string(),
                ));
            }

            let notes = request.live.drain();
            applied_notes += notes.len();
            for note in &notes {
                debug!(kind = %note.kind, strict = note.strict, "live note consumed");
            }

            let Some(agent_id) = request.crew.agent_for_task(index) else {
                return Err(CrewError::Misconfigured(format!(
                    "task {index} has no agent to run under"
                )));
            };
            let agent = request
                .agents
                .iter()
                .find(|a| &a.id == agent_id)
                .ok_or_else(|| {
                    CrewError::Misconfigured(format!("agent {agent_id} not loaded for kickoff"))
                })?;

            let success = !task.description.contains(FAIL_MARKER);
            let quality = if success {
                Self::task_quality(agent)
            } else {
                0.1
            };
            outputs.push(TaskOutput {
                description: task.description.clone(),
                agent_id: agent.id.clone(),
                output: if success {
                    format!(
                        "{}: {}",
                        agent.role,
                        task.expected_output.as_str()
                    )
                } else {
                    format!("{}: task did not converge", agent.role)
                },
                quality,
                success,
            });
        }

        Ok(CrewOutcome {
            summary: format!(
                "{} of {} tasks completed, {applied_notes} live notes consumed",
                outputs.iter().filter(|o| o.success).count(),
                outputs.len()
            ),
            task_outputs: outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{
        CancelSignal, CrewRunner, KickoffRequest, LiveContext, LiveNote, SimulatedRunner,
        FAIL_MARKER,
    };
    use crate::error::CrewError;
    use crate::types::{
        AgentId, AgentProfile, Crew, CrewId, CrewState, InstructionKind, TaskSpec,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn request_with_tasks(descriptions: &[&str]) -> KickoffRequest {
        let agent = AgentProfile::new(
            AgentId::new("agent-1"),
            "Writer".into(),
            "write".into(),
            "bio".into(),
        );
        let crew = Crew {
            id: CrewId::new("crew-1"),
            name: "m1".into(),
            agent_ids: vec![agent.id.clone()],
            tasks: descriptions
                .iter()
                .map(|d| TaskSpec {
                    description: (*d).to_string(),
                    expected_output: "output".into(),
                    assigned_agent: None,
                })
                .collect(),
            autonomy_level: 0.5,
            formation_date: Utc::now(),
            state: CrewState::Running,
        };
        KickoffRequest {
            crew,
            agents: vec![agent],
            context: json!({}),
            live: LiveContext::new(),
            cancel: CancelSignal::new(),
        }
    }

    #[test]
    fn simulated_runner_completes_tasks() {
        let runner = SimulatedRunner::new(Duration::from_millis(1));
        let request = request_with_tasks(&["draft", "review"]);
        let outcome = runner.kickoff(&request).expect("outcome");
        assert_eq!(outcome.task_outputs.len(), 2);
        assert!(outcome.task_outputs.iter().all(|o| o.success));
    }

    #[test]
    fn fail_marker_produces_failed_task() {
        let runner = SimulatedRunner::new(Duration::from_millis(1));
        let request = request_with_tasks(&["draft", FAIL_MARKER]);
        let outcome = runner.kickoff(&request).expect("outcome");
        assert!(outcome.task_outputs[0].success);
        assert!(!outcome.task_outputs[1].success);
    }

    #[test]
    fn cancellation_is_honored_between_steps() {
        let runner = SimulatedRunner::new(Duration::from_millis(1));
        let request = request_with_tasks(&["a", "b", "c"]);
        request.cancel.cancel();
        let result = runner.kickoff(&request);
        assert!(matches!(result, Err(CrewError::Cancelled(_))));
    }

    #[test]
    fn live_notes_are_drained() {
        let runner = SimulatedRunner::new(Duration::from_millis(1));
        let request = request_with_tasks(&["draft"]);
        request.live.push(LiveNote {
            kind: InstructionKind::Guidance,
            content: "be concise".into(),
            strict: false,
        });
        let outcome = runner.kickoff(&request).expect("outcome");
        assert!(outcome.summary.contains("1 live notes"));
        assert!(request.live.snapshot().is_empty());
    }

    #[tokio::test]
    async fn cancel_signal_wakes_waiters() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .is_ok());
    }
}
