use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant name already exists: {0}")]
    NameTaken(String),

    /// Optimistic-lock conflict: the supplied version no longer matches the
    /// stored one. The caller must re-read and retry.
    #[error("stale version for tenant {tenant}: version {expected} was superseded")]
    Concurrency { tenant: String, expected: i64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Storage errors are retryable; uniqueness and version violations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Internal(_))
    }
}
