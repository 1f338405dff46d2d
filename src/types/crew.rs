use super::identifiers::{AgentId, CrewId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewState {
    Idle,
    Running,
    Debriefing,
    Disbanded,
}

impl CrewState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Debriefing => "debriefing",
            Self::Disbanded => "disbanded",
        }
    }
}

impl fmt::Display for CrewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CrewState {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "debriefing" => Ok(Self::Debriefing),
            "disbanded" => Ok(Self::Disbanded),
            _ => Err(format!("Unknown crew state: {s}")),
        }
    }
}

/// One unit of crew work, optionally pinned to a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    pub expected_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crew {
    pub id: CrewId,
    pub name: String,
    pub agent_ids: Vec<AgentId>,
    pub tasks: Vec<TaskSpec>,
    pub autonomy_level: f64,
    pub formation_date: DateTime<Utc>,
    pub state: CrewState,
}

impl Crew {
    /// Resolve the agent a task runs under: the explicit assignment if
    /// present, round-robin over members otherwise.
    #[must_use]
    pub fn agent_for_task(&self, index: usize) -> Option<&AgentId> {
        match self.tasks.get(index).and_then(|t| t.assigned_agent.as_ref()) {
            Some(assigned) => Some(assigned),
            None => {
                if self.agent_ids.is_empty() {
                    None
                } else {
                    self.agent_ids.get(index % self.agent_ids.len())
                }
            }
        }
    }
}

/// Declarative input for crew creation, as carried by
/// `create_evolving_crew` arguments.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrewSpec {
    pub crew_name: String,
    pub agents_config: Vec<AgentSpec>,
    pub tasks: Vec<TaskInput>,
    #[serde(default = "default_autonomy")]
    pub autonomy_level: f64,
}

const fn default_autonomy() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSpec {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality_preset: Option<String>,
    /// Reattach an existing agent (and its memory) instead of minting one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_agent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskInput {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Role name hint resolved against the crew's agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
}
