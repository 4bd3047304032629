use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("compute provider not configured: {0}")]
    ProviderUnknown(String),

    /// Config rejected by the provider's schema. Never retried.
    #[error("invalid compute config: {0}")]
    InvalidConfig(String),

    /// Transient infrastructure failure. Safe to retry.
    #[error("compute operation failed: {0}")]
    OperationFailed(String),

    #[error("internal compute error: {0}")]
    Internal(String),
}

impl ComputeError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ComputeError::OperationFailed(_) | ComputeError::Internal(_)
        )
    }
}
