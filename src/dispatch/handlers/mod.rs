pub(super) mod admin_ops;
pub(super) mod crew_ops;
pub(super) mod evolution_ops;
pub(super) mod instruction_ops;
