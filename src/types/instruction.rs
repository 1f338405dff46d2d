use super::identifiers::{CrewId, InstructionId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority value that routes an instruction straight to cancellation.
pub const EMERGENCY_PRIORITY: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Guidance,
    Constraint,
    Resource,
    Feedback,
    EmergencyStop,
    Pivot,
    SkillBoost,
}

impl InstructionKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guidance => "guidance",
            Self::Constraint => "constraint",
            Self::Resource => "resource",
            Self::Feedback => "feedback",
            Self::EmergencyStop => "emergency_stop",
            Self::Pivot => "pivot",
            Self::SkillBoost => "skill_boost",
        }
    }

    /// Constraint-class instructions are re-checked at debrief with
    /// stricter enforcement.
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        matches!(self, Self::Constraint | Self::Pivot)
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for InstructionKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "guidance" => Ok(Self::Guidance),
            "constraint" => Ok(Self::Constraint),
            "resource" => Ok(Self::Resource),
            "feedback" => Ok(Self::Feedback),
            "emergency_stop" => Ok(Self::EmergencyStop),
            "pivot" => Ok(Self::Pivot),
            "skill_boost" => Ok(Self::SkillBoost),
            _ => Err(format!("Unknown instruction type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionStatus {
    Pending,
    Delivered,
    Applied,
    Failed,
    Expired,
}

impl InstructionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for InstructionStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown instruction status: {s}")),
        }
    }
}

/// A typed, prioritized directive consumed cooperatively by a running
/// workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub crew_id: CrewId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    pub kind: InstructionKind,
    /// 1 (low) through 5 (emergency).
    pub priority: u8,
    pub content: String,
    pub status: InstructionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Instruction {
    #[must_use]
    pub const fn is_emergency(&self) -> bool {
        self.priority >= EMERGENCY_PRIORITY
    }
}

#[cfg(test)]
mod tests {
    use super::{InstructionKind, InstructionStatus};

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            InstructionKind::Guidance,
            InstructionKind::Constraint,
            InstructionKind::Resource,
            InstructionKind::Feedback,
            InstructionKind::EmergencyStop,
            InstructionKind::Pivot,
            InstructionKind::SkillBoost,
        ] {
            assert_eq!(InstructionKind::try_from(kind.as_str()), Ok(kind));
        }
    }

    #[test]
    fn strict_kinds_are_constraint_class() {
        assert!(InstructionKind::Constraint.is_strict());
        assert!(InstructionKind::Pivot.is_strict());
        assert!(!InstructionKind::Guidance.is_strict());
    }

    #[test]
    fn settled_statuses() {
        assert!(InstructionStatus::Applied.is_settled());
        assert!(InstructionStatus::Expired.is_settled());
        assert!(!InstructionStatus::Delivered.is_settled());
    }
}
