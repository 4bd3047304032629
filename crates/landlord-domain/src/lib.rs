pub mod error;
pub mod hash;
pub mod state;
pub mod types;

pub use error::DomainError;
pub use hash::{canonicalize, config_hash};
pub use state::{
    admissible_targets, can_transition, ensure_transition, invoke_target, reconcile_action,
    success_target,
};
pub use types::{
    validate_name, ExecutionSubState, Tenant, TenantAction, TenantId, TenantStatus, WorkerPayload,
};
