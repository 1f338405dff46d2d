use super::agent::Personality;
use super::identifiers::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStrategy {
    PersonalityDrift,
    RoleSpecialization,
    CollaborativeAdaptation,
    RadicalTransformation,
}

impl EvolutionStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PersonalityDrift => "personality_drift",
            Self::RoleSpecialization => "role_specialization",
            Self::CollaborativeAdaptation => "collaborative_adaptation",
            Self::RadicalTransformation => "radical_transformation",
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::PersonalityDrift,
            Self::RoleSpecialization,
            Self::CollaborativeAdaptation,
            Self::RadicalTransformation,
        ]
    }
}

impl fmt::Display for EvolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EvolutionStrategy {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "personality_drift" => Ok(Self::PersonalityDrift),
            "role_specialization" => Ok(Self::RoleSpecialization),
            "collaborative_adaptation" => Ok(Self::CollaborativeAdaptation),
            "radical_transformation" => Ok(Self::RadicalTransformation),
            _ => Err(format!("Unknown evolution strategy: {s}")),
        }
    }
}

/// What caused a candidate evolution to fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "trigger")]
pub enum EvolutionTrigger {
    LowSuccessRate,
    ConsecutiveFailures,
    Stagnation,
    CrewImbalance,
    Manual {
        #[serde(skip_serializing_if = "Option::is_none")]
        strategy: Option<EvolutionStrategy>,
        forced: bool,
    },
}

impl EvolutionTrigger {
    #[must_use]
    pub const fn bypasses_cooldown(&self) -> bool {
        matches!(self, Self::Manual { forced: true, .. })
    }

    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::LowSuccessRate => "rolling success rate below threshold",
            Self::ConsecutiveFailures => "consecutive task failures",
            Self::Stagnation => "no evolution despite sustained activity",
            Self::CrewImbalance => "crew self-assessment flagged imbalance",
            Self::Manual { .. } => "explicit user trigger",
        }
    }
}

/// Append-only record of one agent mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    /// Store-assigned monotonically increasing id; 0 before persistence.
    #[serde(default)]
    pub event_id: i64,
    pub agent_id: AgentId,
    pub cycle: u32,
    pub kind: EvolutionStrategy,
    pub previous_traits: Personality,
    pub new_traits: Personality,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{EvolutionStrategy, EvolutionTrigger};

    #[test]
    fn strategy_round_trips_through_str() {
        for strategy in EvolutionStrategy::all() {
            assert_eq!(EvolutionStrategy::try_from(strategy.as_str()), Ok(strategy));
        }
    }

    #[test]
    fn only_forced_manual_bypasses_cooldown() {
        assert!(EvolutionTrigger::Manual {
            strategy: None,
            forced: true
        }
        .bypasses_cooldown());
        assert!(!EvolutionTrigger::Manual {
            strategy: None,
            forced: false
        }
        .bypasses_cooldown());
        assert!(!EvolutionTrigger::LowSuccessRate.bypasses_cooldown());
    }
}
