use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane returned status {0}")]
    Status(u16),

    #[error("could not resolve a compute provider for tenant {0}")]
    ProviderUnresolved(String),
}
