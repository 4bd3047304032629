use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow provider not configured: {0}")]
    ProviderUnknown(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// Structurally invalid request. Never retried.
    #[error("invalid workflow spec: {0}")]
    InvalidSpec(String),

    /// Transient backend failure. Safe to retry with backoff.
    #[error("workflow backend error: {0}")]
    Remote(String),

    #[error("internal workflow error: {0}")]
    Internal(String),
}

impl WorkflowError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkflowError::Remote(_) | WorkflowError::Internal(_))
    }
}
