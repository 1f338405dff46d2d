use super::identifiers::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trait axes every new agent starts with. The personality map is open:
/// evolution may add axes, but these six are always present.
pub const DEFAULT_TRAITS: &[(&str, f64)] = &[
    ("analytical", 0.5),
    ("creative", 0.5),
    ("collaborative", 0.5),
    ("decisive", 0.5),
    ("adaptable", 0.5),
    ("risk_taking", 0.3),
];

const DOMINANT_THRESHOLD: f64 = 0.7;
const WEAK_THRESHOLD: f64 = 0.3;

/// Mapping from trait name to a value in [0,1]. All mutation paths clamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Personality(BTreeMap<String, f64>);

impl Personality {
    #[must_use]
    pub fn baseline() -> Self {
        Self(
            DEFAULT_TRAITS
                .iter()
                .map(|(name, value)| ((*name).to_string(), *value))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Sets a trait value, clamped to [0,1]. Traits are never deleted.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value.clamp(0.0, 1.0));
    }

    /// Adds a delta to an existing trait, clamped. Missing traits are
    /// created at the clamped delta from the 0.5 midpoint.
    pub fn adjust(&mut self, name: &str, delta: f64) {
        let current = self.get(name).unwrap_or(0.5);
        self.set(name.to_string(), current + delta);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Traits above the dominance threshold, strongest first.
    #[must_use]
    pub fn dominant_traits(&self) -> Vec<String> {
        let mut traits: Vec<(&str, f64)> = self
            .iter()
            .filter(|(_, v)| *v > DOMINANT_THRESHOLD)
            .collect();
        traits.sort_by(|a, b| b.1.total_cmp(&a.1));
        traits.into_iter().map(|(k, _)| k.to_string()).collect()
    }

    /// Traits below the weakness threshold, weakest first.
    #[must_use]
    pub fn weak_traits(&self) -> Vec<String> {
        let mut traits: Vec<(&str, f64)> =
            self.iter().filter(|(_, v)| *v < WEAK_THRESHOLD).collect();
        traits.sort_by(|a, b| a.1.total_cmp(&b.1));
        traits.into_iter().map(|(k, _)| k.to_string()).collect()
    }

    /// All trait names ordered weakest-value first.
    #[must_use]
    pub fn ranked_ascending(&self) -> Vec<String> {
        let mut traits: Vec<(&str, f64)> = self.iter().collect();
        traits.sort_by(|a, b| a.1.total_cmp(&b.1));
        traits.into_iter().map(|(k, _)| k.to_string()).collect()
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.values().sum::<f64>() / self.0.len() as f64
    }
}

/// Named personality presets applied at agent creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityPreset {
    Analytical,
    Creative,
    Diplomat,
    Executor,
    Innovator,
}

impl PersonalityPreset {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Creative => "creative",
            Self::Diplomat => "diplomat",
            Self::Executor => "executor",
            Self::Innovator => "innovator",
        }
    }

    #[must_use]
    pub fn traits(&self) -> Personality {
        let values: &[(&str, f64)] = match self {
            Self::Analytical => &[
                ("analytical", 0.9),
                ("creative", 0.3),
                ("collaborative", 0.6),
                ("decisive", 0.8),
                ("adaptable", 0.5),
                ("risk_taking", 0.2),
            ],
            Self::Creative => &[
                ("analytical", 0.4),
                ("creative", 0.9),
                ("collaborative", 0.7),
                ("decisive", 0.6),
                ("adaptable", 0.8),
                ("risk_taking", 0.7),
            ],
            Self::Diplomat => &[
                ("analytical", 0.6),
                ("creative", 0.5),
                ("collaborative", 0.9),
                ("decisive", 0.4),
                ("adaptable", 0.8),
                ("risk_taking", 0.3),
            ],
            Self::Executor => &[
                ("analytical", 0.7),
                ("creative", 0.4),
                ("collaborative", 0.6),
                ("decisive", 0.9),
                ("adaptable", 0.6),
                ("risk_taking", 0.5),
            ],
            Self::Innovator => &[
                ("analytical", 0.6),
                ("creative", 0.8),
                ("collaborative", 0.5),
                ("decisive", 0.7),
                ("adaptable", 0.9),
                ("risk_taking", 0.8),
            ],
        };
        let mut personality = Personality::default();
        for (name, value) in values {
            personality.set((*name).to_string(), *value);
        }
        personality
    }
}

impl TryFrom<&str> for PersonalityPreset {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "analytical" => Ok(Self::Analytical),
            "creative" => Ok(Self::Creative),
            "diplomat" => Ok(Self::Diplomat),
            "executor" => Ok(Self::Executor),
            "innovator" => Ok(Self::Innovator),
            _ => Err(format!("Unknown personality preset: {value}")),
        }
    }
}

impl fmt::Display for PersonalityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Size of the rolling outcome window used for success-rate triggers.
pub const OUTCOME_WINDOW: usize = 20;

/// Accumulated execution experience for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExperienceCounters {
    pub tasks_completed: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Exponentially weighted average task quality in [0,1].
    pub avg_quality: f64,
    /// Most recent task outcomes, oldest first, bounded by `OUTCOME_WINDOW`.
    pub recent_outcomes: Vec<bool>,
}

impl ExperienceCounters {
    pub fn record_task(&mut self, success: bool, quality: f64) {
        self.tasks_completed += 1;
        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures += 1;
        }
        let quality = quality.clamp(0.0, 1.0);
        self.avg_quality = if self.tasks_completed == 1 {
            quality
        } else {
            self.avg_quality * 0.8 + quality * 0.2
        };
        self.recent_outcomes.push(success);
        if self.recent_outcomes.len() > OUTCOME_WINDOW {
            let excess = self.recent_outcomes.len() - OUTCOME_WINDOW;
            self.recent_outcomes.drain(..excess);
        }
    }

    /// Success rate over the rolling window; `None` until the window holds
    /// enough samples to be meaningful.
    #[must_use]
    pub fn rolling_success_rate(&self, min_samples: usize) -> Option<f64> {
        if self.recent_outcomes.len() < min_samples {
            return None;
        }
        let successes = self.recent_outcomes.iter().filter(|s| **s).count();
        Some(successes as f64 / self.recent_outcomes.len() as f64)
    }
}

/// Maximum reflections retained per agent; older entries are dropped.
pub const MAX_REFLECTIONS: usize = 50;

/// A structured self-reflection snapshot captured at debrief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub created_at: DateTime<Utc>,
    pub performance: BTreeMap<String, f64>,
    pub skill_gaps: Vec<String>,
    pub notes: String,
}

/// Persistent profile of one evolving agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub personality: Personality,
    pub experience: ExperienceCounters,
    pub evolution_cycles: u32,
    pub created_at: DateTime<Utc>,
    pub last_evolved_at: Option<DateTime<Utc>>,
    pub reflections: Vec<Reflection>,
}

impl AgentProfile {
    #[must_use]
    pub fn new(id: AgentId, role: String, goal: String, backstory: String) -> Self {
        Self {
            id,
            role,
            goal,
            backstory,
            personality: Personality::baseline(),
            experience: ExperienceCounters::default(),
            evolution_cycles: 0,
            created_at: Utc::now(),
            last_evolved_at: None,
            reflections: Vec::new(),
        }
    }

    pub fn apply_preset(&mut self, preset: PersonalityPreset) {
        for (name, value) in preset.traits().iter() {
            self.personality.set(name.to_string(), value);
        }
    }

    pub fn push_reflection(&mut self, reflection: Reflection) {
        self.reflections.push(reflection);
        if self.reflections.len() > MAX_REFLECTIONS {
            let excess = self.reflections.len() - MAX_REFLECTIONS;
            self.reflections.drain(..excess);
        }
    }

    /// Identify skill axes the agent is short on, mirroring the debrief
    /// reflection content.
    #[must_use]
    pub fn skill_gaps(&self) -> Vec<String> {
        let mut gaps = Vec::new();
        if self.personality.get("collaborative").unwrap_or(0.0) < 0.5 {
            gaps.push("collaboration".to_string());
        }
        if self.personality.get("adaptable").unwrap_or(0.0) < 0.5 {
            gaps.push("adaptability".to_string());
        }
        if self.experience.avg_quality < 0.5 && self.experience.tasks_completed > 0 {
            gaps.push("output_quality".to_string());
        }
        gaps
    }
}
