use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn value(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(AgentId, "agent");
opaque_id!(CrewId, "crew");
opaque_id!(WorkflowId, "wf");
opaque_id!(InstructionId, "instr");

/// Mints server-side identifiers.
///
/// Production minting is random (UUID v4). The deterministic mode is a
/// test-only switch that produces a stable per-process sequence so the same
/// creation spec yields the same ids on every run.
#[derive(Debug)]
pub struct IdMinter {
    deterministic: bool,
    counter: AtomicU64,
}

impl IdMinter {
    #[must_use]
    pub const fn new(deterministic: bool) -> Self {
        Self {
            deterministic,
            counter: AtomicU64::new(1),
        }
    }

    fn mint(&self, prefix: &str) -> String {
        if self.deterministic {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            format!("{prefix}-{n:06}")
        } else {
            format!("{prefix}-{}", Uuid::new_v4().simple())
        }
    }

    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        AgentId::new(self.mint(AgentId::prefix()))
    }

    #[must_use]
    pub fn crew_id(&self) -> CrewId {
        CrewId::new(self.mint(CrewId::prefix()))
    }

    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        WorkflowId::new(self.mint(WorkflowId::prefix()))
    }

    #[must_use]
    pub fn instruction_id(&self) -> InstructionId {
        InstructionId::new(self.mint(InstructionId::prefix()))
    }
}

#[cfg(test)]
mod tests {
    use super::IdMinter;

    #[test]
    fn deterministic_minter_is_sequential() {
        let minter = IdMinter::new(true);
        assert_eq!(minter.agent_id().value(), "agent-000001");
        assert_eq!(minter.crew_id().value(), "crew-000002");
    }

    #[test]
    fn random_ids_are_unique() {
        let minter = IdMinter::new(false);
        let a = minter.workflow_id();
        let b = minter.workflow_id();
        assert_ne!(a, b);
    }
}
