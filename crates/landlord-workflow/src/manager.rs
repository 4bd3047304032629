use std::collections::HashMap;
use std::sync::Arc;

use landlord_domain::{TenantAction, TenantId};
use tracing::debug;

use crate::error::WorkflowError;
use crate::provider::{ComputeCallback, ExecutionInput, ExecutionStatus, WorkflowProvider};

/// Routes workflow operations to the backend named by the provider id and
/// enforces idempotent trigger semantics through deterministic execution ids.
///
/// Immutable after startup: register every enabled provider, then share via
/// `Arc`.
pub struct WorkflowManager {
    providers: HashMap<String, Arc<dyn WorkflowProvider>>,
    default_provider: Option<String>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        WorkflowManager {
            providers: HashMap::new(),
            default_provider: None,
        }
    }

    /// Register a provider. The first registered provider becomes the default
    /// unless [`WorkflowManager::set_default`] overrides it.
    pub fn register(&mut self, provider: Arc<dyn WorkflowProvider>) -> &mut Self {
        let id = provider.id().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(id.clone());
        }
        self.providers.insert(id, provider);
        self
    }

    pub fn set_default(&mut self, id: impl Into<String>) -> &mut Self {
        self.default_provider = Some(id.into());
        self
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn provider(&self, id: &str) -> Result<Arc<dyn WorkflowProvider>, WorkflowError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::ProviderUnknown(id.to_string()))
    }

    /// Deterministic execution id: `{provider}:{tenant}:{action}:{seq}`.
    ///
    /// `seq` is the tenant version read at invoke time, so concurrent
    /// reconciliation attempts for the same tenant and action collapse into a
    /// single execution at the provider.
    pub fn execution_id(
        provider: &str,
        tenant_id: &TenantId,
        action: TenantAction,
        seq: i64,
    ) -> String {
        format!("{provider}:{tenant_id}:{action}:{seq}")
    }

    /// The provider prefix of an execution id issued by
    /// [`WorkflowManager::execution_id`].
    pub fn provider_of(execution_id: &str) -> Option<&str> {
        execution_id.split(':').next().filter(|s| !s.is_empty())
    }

    /// The action segment of an execution id issued by
    /// [`WorkflowManager::execution_id`].
    pub fn action_of(execution_id: &str) -> Option<TenantAction> {
        execution_id.split(':').nth(2)?.parse().ok()
    }

    fn route(&self, execution_id: &str) -> Result<Arc<dyn WorkflowProvider>, WorkflowError> {
        let id = Self::provider_of(execution_id)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        self.provider(id)
    }

    /// Validate and start an execution on the named provider.
    pub async fn invoke(
        &self,
        provider_id: &str,
        execution_id: &str,
        input: ExecutionInput,
    ) -> Result<(), WorkflowError> {
        let provider = self.provider(provider_id)?;
        provider.validate(&input)?;
        debug!(provider = provider_id, execution_id, "starting execution");
        provider.start_execution(execution_id, input).await
    }

    pub async fn stop_execution(
        &self,
        execution_id: &str,
        reason: &str,
    ) -> Result<(), WorkflowError> {
        self.route(execution_id)?
            .stop_execution(execution_id, reason)
            .await
    }

    pub async fn get_execution_status(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatus, WorkflowError> {
        self.route(execution_id)?
            .get_execution_status(execution_id)
            .await
    }

    pub async fn post_compute_callback(
        &self,
        execution_id: &str,
        callback: ComputeCallback,
    ) -> Result<(), WorkflowError> {
        self.route(execution_id)?
            .post_compute_callback(execution_id, callback)
            .await
    }
}

impl Default for WorkflowManager {
    fn default() -> Self {
        Self::new()
    }
}
