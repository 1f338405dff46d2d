mod agent;
mod crew;
mod evolution;
mod health;
mod identifiers;
mod instruction;
mod workflow;

pub use agent::{
    AgentProfile, ExperienceCounters, Personality, PersonalityPreset, Reflection, DEFAULT_TRAITS,
    MAX_REFLECTIONS, OUTCOME_WINDOW,
};
pub use crew::{AgentSpec, Crew, CrewSpec, CrewState, TaskInput, TaskSpec};
pub use evolution::{EvolutionEvent, EvolutionStrategy, EvolutionTrigger};
pub use health::{ComponentStatus, HealthSummary};
pub use identifiers::{AgentId, CrewId, IdMinter, InstructionId, WorkflowId};
pub use instruction::{
    Instruction, InstructionKind, InstructionStatus, EMERGENCY_PRIORITY,
};
pub use workflow::{CrewOutcome, TaskOutput, Workflow, WorkflowState};
