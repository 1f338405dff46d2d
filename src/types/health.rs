//! Health summary types maintained by the supervisor's probe loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Down,
}

impl ComponentStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

impl Default for ComponentStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: ComponentStatus,
    pub store: ComponentStatus,
    pub worker_pool: ComponentStatus,
    pub active_workflows: u64,
    pub worker_slots_total: u64,
    pub worker_slots_free: u64,
    pub checked_at: DateTime<Utc>,
}

impl HealthSummary {
    #[must_use]
    pub fn starting() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            store: ComponentStatus::Healthy,
            worker_pool: ComponentStatus::Healthy,
            active_workflows: 0,
            worker_slots_total: 0,
            worker_slots_free: 0,
            checked_at: Utc::now(),
        }
    }

    /// Overall status is the worst component status.
    pub fn roll_up(&mut self) {
        self.status = match (self.store, self.worker_pool) {
            (ComponentStatus::Down, _) | (_, ComponentStatus::Down) => ComponentStatus::Down,
            (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                ComponentStatus::Degraded
            }
            _ => ComponentStatus::Healthy,
        };
    }
}
