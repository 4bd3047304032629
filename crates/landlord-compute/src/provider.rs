use async_trait::async_trait;
use landlord_domain::TenantId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComputeError;

/// JSON-Schema (draft 2020-12) describing a provider's accepted
/// `desired_config`, plus optional defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeSchema {
    pub provider_id: String,
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Value>,
}

/// What a lifecycle operation acts on.
#[derive(Debug, Clone)]
pub struct ComputeSpec {
    pub tenant_id: TenantId,
    pub config: Value,
}

/// Observed runtime state of a tenant's compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeState {
    Active,
    Degraded,
    Missing,
}

/// Result of a lifecycle operation or a status read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeOutcome {
    pub state: ComputeState,
    pub observed_config: Value,
    pub resource_ids: Value,
    pub error: Option<String>,
}

/// Capability set every compute backend must satisfy. Lifecycle operations
/// are idempotent: repeating a call converges on the same runtime state.
#[async_trait]
pub trait ComputeProvider: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn schema(&self) -> ComputeSchema;

    /// Synchronous schema validation used at ingress and at invoke time.
    /// No remote calls.
    fn validate(&self, config: &Value) -> Result<(), ComputeError>;

    async fn provision(&self, spec: &ComputeSpec) -> Result<ComputeOutcome, ComputeError>;

    async fn update(&self, spec: &ComputeSpec) -> Result<ComputeOutcome, ComputeError>;

    async fn destroy(&self, spec: &ComputeSpec) -> Result<ComputeOutcome, ComputeError>;

    async fn get_status(&self, tenant_id: &TenantId) -> Result<ComputeOutcome, ComputeError>;
}
