use async_trait::async_trait;
use landlord_domain::{ExecutionSubState, WorkerPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::WorkflowError;

/// Metadata attached to every execution at trigger time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Who triggered the execution (e.g. "reconciler").
    pub trigger_source: String,
    /// SHA-256 of the canonical desired config the execution was started
    /// with. None on executions started before hashing was introduced.
    pub config_hash: Option<String>,
}

/// Full input for starting an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInput {
    pub payload: WorkerPayload,
    pub metadata: ExecutionMetadata,
}

/// Enriched status of an execution as reported by a workflow backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    /// Backend-native state string, kept for debugging.
    pub state: String,
    /// Canonical sub-state the native state maps to.
    pub sub_state: ExecutionSubState,
    /// Output produced by a succeeded execution, if any. Keys recognised by
    /// the reconciler: `observed_config`, `resource_ids`.
    pub output: Option<Value>,
    pub error: Option<String>,
    pub metadata: ExecutionMetadata,
    pub retry_count: Option<u32>,
}

/// Backend-provided context handed to the stateless worker.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub attempt: u32,
}

/// Observed state a worker reports back into a running execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeCallback {
    pub succeeded: bool,
    /// None leaves the tenant's observed config untouched; Some(Null)
    /// explicitly clears it (the destroy path).
    pub observed_config: Option<Value>,
    pub resource_ids: Option<Value>,
    pub error: Option<String>,
}

impl ComputeCallback {
    pub fn success(observed_config: Option<Value>, resource_ids: Option<Value>) -> Self {
        ComputeCallback {
            succeeded: true,
            observed_config,
            resource_ids,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ComputeCallback {
            succeeded: false,
            observed_config: None,
            resource_ids: None,
            error: Some(error.into()),
        }
    }
}

/// The stateless worker seam. The workflow backend drives implementations of
/// this trait; they invoke the compute provider and post a
/// [`ComputeCallback`], never touching the control-plane database.
///
/// An `Err` return is a retryable infrastructure failure — the backend
/// schedules another attempt. Fatal outcomes are reported by posting a
/// failure callback and returning `Ok`.
#[async_trait]
pub trait ExecutionHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: ExecutionContext,
        input: ExecutionInput,
    ) -> Result<(), WorkflowError>;
}

impl std::fmt::Debug for dyn WorkflowProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowProvider").field("id", &self.id()).finish()
    }
}

/// Capability set every workflow backend must satisfy.
#[async_trait]
pub trait WorkflowProvider: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Structural validation without remote calls.
    fn validate(&self, input: &ExecutionInput) -> Result<(), WorkflowError>;

    /// Start an execution. MUST be idempotent by `execution_id`: a second
    /// call with the same id returns without creating a second execution.
    async fn start_execution(
        &self,
        execution_id: &str,
        input: ExecutionInput,
    ) -> Result<(), WorkflowError>;

    /// Idempotent; succeeds when the execution is already terminal.
    async fn stop_execution(&self, execution_id: &str, reason: &str) -> Result<(), WorkflowError>;

    async fn get_execution_status(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatus, WorkflowError>;

    /// Completion channel used by stateless workers to report observed state.
    async fn post_compute_callback(
        &self,
        execution_id: &str,
        callback: ComputeCallback,
    ) -> Result<(), WorkflowError>;
}

/// The completion channel alone, for code that should only be able to post
/// callbacks. Every provider is a sink.
#[async_trait]
pub trait CallbackSink: Send + Sync + 'static {
    async fn post_compute_callback(
        &self,
        execution_id: &str,
        callback: ComputeCallback,
    ) -> Result<(), WorkflowError>;
}

#[async_trait]
impl<T: WorkflowProvider> CallbackSink for T {
    async fn post_compute_callback(
        &self,
        execution_id: &str,
        callback: ComputeCallback,
    ) -> Result<(), WorkflowError> {
        WorkflowProvider::post_compute_callback(self, execution_id, callback).await
    }
}

/// Map a backend-native state string into the canonical sub-state set.
/// Unknown native states default to `running` so a new backend state never
/// stalls the reconciler.
pub fn map_native_state(provider: &str, native: &str) -> ExecutionSubState {
    match native.to_ascii_lowercase().as_str() {
        "running" | "started" | "executing" => ExecutionSubState::Running,
        "waiting" | "pending" | "scheduled" | "queued" => ExecutionSubState::Waiting,
        "backing-off" | "backoff" | "retry_scheduled" | "retrying" => {
            ExecutionSubState::BackingOff
        }
        "error" | "errored" => ExecutionSubState::Error,
        "succeeded" | "completed" | "success" => ExecutionSubState::Succeeded,
        "failed" | "stopped" | "terminated" | "canceled" | "cancelled" => {
            ExecutionSubState::Failed
        }
        other => {
            warn!(provider, native = other, "unknown native execution state, defaulting to running");
            ExecutionSubState::Running
        }
    }
}
