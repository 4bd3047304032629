use landlord_compute::ComputeError;
use landlord_domain::{DomainError, TenantId};
use landlord_store::StoreError;
use landlord_workflow::WorkflowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Persistent optimistic-lock conflict after one fresh-read retry.
    #[error("version conflict persisted for tenant {0}")]
    Conflict(TenantId),

    /// stop-and-restart could not confirm termination within its budget.
    #[error("stop of execution {0} not confirmed within budget")]
    StopBudgetExceeded(String),

    #[error("status call timed out for execution {0}")]
    StatusTimeout(String),

    /// Shutdown cancelled the pass. Nothing is persisted; the tenant stays
    /// actionable for the next instance.
    #[error("reconciliation cancelled by shutdown")]
    Cancelled,
}

impl ReconcileError {
    /// Transient failures requeue with backoff; fatal ones move the tenant to
    /// `failed`.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_retryable(),
            ReconcileError::Workflow(e) => e.is_transient(),
            ReconcileError::Compute(e) => e.is_transient(),
            ReconcileError::Domain(_) => false,
            ReconcileError::Conflict(_)
            | ReconcileError::StopBudgetExceeded(_)
            | ReconcileError::StatusTimeout(_)
            | ReconcileError::Cancelled => true,
        }
    }
}
