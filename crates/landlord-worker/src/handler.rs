use std::sync::Arc;

use async_trait::async_trait;
use landlord_compute::{ComputeError, ComputeRegistry, ComputeSpec};
use landlord_domain::TenantAction;
use landlord_workflow::{
    CallbackSink, ComputeCallback, ExecutionContext, ExecutionHandler, ExecutionInput,
    WorkflowError,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::control_plane::ControlPlaneClient;

/// The stateless worker invoked by the workflow backend.
///
/// Receives the full execution context in the payload, dispatches the compute
/// operation and reports observed state through the backend's completion
/// channel. Holds no database credentials.
pub struct WorkerHandler {
    computes: Arc<ComputeRegistry>,
    callbacks: Arc<dyn CallbackSink>,
    control_plane: Option<ControlPlaneClient>,
}

impl WorkerHandler {
    pub fn new(
        computes: Arc<ComputeRegistry>,
        callbacks: Arc<dyn CallbackSink>,
        control_plane: Option<ControlPlaneClient>,
    ) -> Self {
        WorkerHandler {
            computes,
            callbacks,
            control_plane,
        }
    }

    async fn resolve_provider_id(
        &self,
        input: &ExecutionInput,
    ) -> Result<Option<String>, WorkflowError> {
        if input.payload.compute_provider_id.is_some() {
            return Ok(input.payload.compute_provider_id.clone());
        }
        // Payload carries no binding: ask the control plane's read API.
        if let Some(client) = &self.control_plane {
            let id = client
                .tenant_compute_provider(&input.payload.tenant_id)
                .await
                .map_err(|e| WorkflowError::Remote(e.to_string()))?;
            return Ok(Some(id));
        }
        // Fall back to the registry default.
        Ok(None)
    }
}

#[async_trait]
impl ExecutionHandler for WorkerHandler {
    async fn handle(
        &self,
        ctx: ExecutionContext,
        input: ExecutionInput,
    ) -> Result<(), WorkflowError> {
        let tenant_id = input.payload.tenant_id;
        let action = input.payload.action;
        info!(%tenant_id, %action, execution_id = %ctx.execution_id, attempt = ctx.attempt, "worker handling execution");

        let provider_id = self.resolve_provider_id(&input).await?;
        let provider = match self.computes.resolve(provider_id.as_deref()) {
            Ok(p) => p,
            Err(e) => {
                // Unknown provider is fatal for this execution, not retryable.
                warn!(%tenant_id, error = %e, "compute provider unresolved");
                self.callbacks
                    .post_compute_callback(&ctx.execution_id, ComputeCallback::failure(e.to_string()))
                    .await?;
                return Ok(());
            }
        };

        let spec = ComputeSpec {
            tenant_id,
            config: input.payload.desired_config.clone(),
        };

        let result = match action {
            TenantAction::Plan => {
                // A plan validates the config against the provider without
                // touching infrastructure; it produces no observed state.
                match provider.validate(&spec.config) {
                    Ok(()) => {
                        self.callbacks
                            .post_compute_callback(
                                &ctx.execution_id,
                                ComputeCallback::success(None, None),
                            )
                            .await?;
                        return Ok(());
                    }
                    Err(e) => Err(e),
                }
            }
            TenantAction::Provision => provider.provision(&spec).await,
            TenantAction::Update => provider.update(&spec).await,
            TenantAction::Delete => provider.destroy(&spec).await,
        };

        match result {
            Ok(outcome) => {
                let (observed, resources) = match action {
                    // Destroy explicitly clears observed state.
                    TenantAction::Delete => (Some(Value::Null), Some(Value::Null)),
                    _ => (
                        Some(outcome.observed_config),
                        Some(outcome.resource_ids),
                    ),
                };
                self.callbacks
                    .post_compute_callback(
                        &ctx.execution_id,
                        ComputeCallback::success(observed, resources),
                    )
                    .await?;
                Ok(())
            }
            Err(e @ ComputeError::InvalidConfig(_)) | Err(e @ ComputeError::ProviderUnknown(_)) => {
                warn!(%tenant_id, %action, error = %e, "compute operation rejected");
                self.callbacks
                    .post_compute_callback(&ctx.execution_id, ComputeCallback::failure(e.to_string()))
                    .await?;
                Ok(())
            }
            Err(e) => {
                // Transient: let the backend schedule another attempt.
                warn!(%tenant_id, %action, error = %e, "compute operation failed, will retry");
                Err(WorkflowError::Remote(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landlord_compute::LocalComputeProvider;
    use landlord_domain::{ExecutionSubState, TenantId, WorkerPayload};
    use landlord_workflow::{
        ExecutionMetadata, LocalEngineConfig, LocalWorkflowEngine, WorkflowProvider,
    };
    use serde_json::json;
    use std::time::Duration;

    fn input(action: TenantAction, config: Value) -> ExecutionInput {
        ExecutionInput {
            payload: WorkerPayload {
                tenant_id: TenantId::new(),
                action,
                desired_config: config,
                compute_provider_id: Some("local".into()),
            },
            metadata: ExecutionMetadata {
                trigger_source: "test".into(),
                config_hash: None,
            },
        }
    }

    async fn wired_engine() -> (Arc<LocalWorkflowEngine>, Arc<ComputeRegistry>) {
        let mut registry = ComputeRegistry::new();
        registry.register(Arc::new(LocalComputeProvider::new().unwrap()));
        let registry = Arc::new(registry);

        let engine = Arc::new(LocalWorkflowEngine::new(LocalEngineConfig {
            max_attempts: 2,
            retry_delay: Duration::from_millis(5),
        }));
        let handler = Arc::new(WorkerHandler::new(registry.clone(), engine.clone(), None));
        engine.set_handler(handler).await;
        (engine, registry)
    }

    async fn wait_terminal(engine: &LocalWorkflowEngine, id: &str) -> landlord_workflow::ExecutionStatus {
        for _ in 0..200 {
            let status = engine.get_execution_status(id).await.unwrap();
            if status.sub_state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {id} never terminated");
    }

    #[tokio::test]
    async fn provision_reports_observed_state() {
        let (engine, _) = wired_engine().await;
        engine
            .start_execution(
                "local:t:provision:1",
                input(TenantAction::Provision, json!({"image": "nginx:alpine"})),
            )
            .await
            .unwrap();

        let status = wait_terminal(&engine, "local:t:provision:1").await;
        assert_eq!(status.sub_state, ExecutionSubState::Succeeded);
        let output = status.output.unwrap();
        assert_eq!(output["observed_config"]["image"], "nginx:alpine");
        assert!(output["resource_ids"]["runtime_id"]
            .as_str()
            .unwrap()
            .starts_with("local://"));
    }

    #[tokio::test]
    async fn plan_succeeds_without_observed_state() {
        let (engine, _) = wired_engine().await;
        engine
            .start_execution(
                "local:t:plan:1",
                input(TenantAction::Plan, json!({"image": "nginx:alpine"})),
            )
            .await
            .unwrap();

        let status = wait_terminal(&engine, "local:t:plan:1").await;
        assert_eq!(status.sub_state, ExecutionSubState::Succeeded);
        let output = status.output.unwrap();
        assert!(output.get("observed_config").is_none());
        assert!(output.get("resource_ids").is_none());
    }

    #[tokio::test]
    async fn invalid_config_fails_the_execution_without_retries() {
        let (engine, _) = wired_engine().await;
        engine
            .start_execution(
                "local:t:provision:2",
                input(TenantAction::Provision, json!({"replicas": 2})),
            )
            .await
            .unwrap();

        let status = wait_terminal(&engine, "local:t:provision:2").await;
        assert_eq!(status.sub_state, ExecutionSubState::Failed);
        assert_eq!(status.retry_count, Some(0));
        assert!(status.error.unwrap().contains("invalid compute config"));
    }

    #[tokio::test]
    async fn unknown_provider_fails_the_execution() {
        let (engine, _) = wired_engine().await;
        let mut bad = input(TenantAction::Provision, json!({"image": "nginx"}));
        bad.payload.compute_provider_id = Some("gcp".into());
        engine.start_execution("local:t:provision:3", bad).await.unwrap();

        let status = wait_terminal(&engine, "local:t:provision:3").await;
        assert_eq!(status.sub_state, ExecutionSubState::Failed);
        assert!(status.error.unwrap().contains("gcp"));
    }

    #[tokio::test]
    async fn delete_clears_observed_state() {
        let (engine, _) = wired_engine().await;
        engine
            .start_execution(
                "local:t:provision:4",
                input(TenantAction::Provision, json!({"image": "nginx:alpine"})),
            )
            .await
            .unwrap();
        wait_terminal(&engine, "local:t:provision:4").await;

        engine
            .start_execution(
                "local:t:delete:1",
                input(TenantAction::Delete, json!({"image": "nginx:alpine"})),
            )
            .await
            .unwrap();
        let status = wait_terminal(&engine, "local:t:delete:1").await;
        assert_eq!(status.sub_state, ExecutionSubState::Succeeded);
        let output = status.output.unwrap();
        assert!(output["observed_config"].is_null());
        assert!(output["resource_ids"].is_null());
    }
}
