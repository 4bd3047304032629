use thiserror::Error;

use crate::types::TenantStatus;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("invalid tenant name: {0}")]
    InvalidName(String),

    #[error("unknown tenant status: {0}")]
    InvalidStatus(String),

    #[error("unknown tenant action: {0}")]
    InvalidAction(String),

    #[error("unknown execution sub-state: {0}")]
    InvalidSubState(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TenantStatus, to: TenantStatus },
}
