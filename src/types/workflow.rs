use super::identifiers::{AgentId, CrewId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle of one crew execution.
///
/// ```text
/// Created -> Preparing -> Executing -> Debriefing -> Completed
///                 |            |
///                 |            +--> Cancelling -> Cancelled
///                 +--> Failed (also reachable from Executing/Debriefing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Created,
    Preparing,
    Executing,
    Debriefing,
    Cancelling,
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Preparing => "preparing",
            Self::Executing => "executing",
            Self::Debriefing => "debriefing",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether the machine may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Preparing)
                | (Self::Preparing, Self::Executing | Self::Failed | Self::Cancelling)
                | (Self::Executing, Self::Debriefing | Self::Failed | Self::Cancelling)
                | (Self::Debriefing, Self::Completed | Self::Failed)
                | (Self::Cancelling, Self::Cancelled)
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for WorkflowState {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "created" => Ok(Self::Created),
            "preparing" => Ok(Self::Preparing),
            "executing" => Ok(Self::Executing),
            "debriefing" => Ok(Self::Debriefing),
            "cancelling" => Ok(Self::Cancelling),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown workflow state: {s}")),
        }
    }
}

/// Output of one task inside a runner outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub description: String,
    pub agent_id: AgentId,
    pub output: String,
    /// Quality estimate in [0,1] used to update agent experience.
    pub quality: f64,
    pub success: bool,
}

/// Opaque result handed back by the runner's kickoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CrewOutcome {
    pub summary: String,
    pub task_outputs: Vec<TaskOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub crew_id: CrewId,
    pub state: WorkflowState,
    pub allow_evolution: bool,
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CrewOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Workflow {
    #[must_use]
    pub fn new(id: WorkflowId, crew_id: CrewId, context: Value, allow_evolution: bool) -> Self {
        Self {
            id,
            crew_id,
            state: WorkflowState::Created,
            allow_evolution,
            context,
            result: None,
            cancellation_reason: None,
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}
