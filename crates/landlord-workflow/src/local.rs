use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use landlord_domain::ExecutionSubState;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::WorkflowError;
use crate::provider::{
    map_native_state, ComputeCallback, ExecutionContext, ExecutionHandler, ExecutionInput,
    ExecutionStatus, WorkflowProvider,
};

#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Attempts before an execution is marked failed.
    pub max_attempts: u32,
    /// Base delay between attempts; doubles per attempt.
    pub retry_delay: Duration,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        LocalEngineConfig {
            max_attempts: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
struct ExecutionRecord {
    input: ExecutionInput,
    native_state: String,
    sub_state: ExecutionSubState,
    output: Option<Value>,
    error: Option<String>,
    retry_count: u32,
}

/// In-process workflow backend.
///
/// Executions live in a concurrent map and are driven by tokio tasks that
/// invoke the registered [`ExecutionHandler`] (the stateless worker) with
/// bounded, exponentially delayed attempts. The map is the durability
/// boundary: state survives as long as the process.
pub struct LocalWorkflowEngine {
    config: LocalEngineConfig,
    executions: Arc<RwLock<HashMap<String, ExecutionRecord>>>,
    handler: Arc<RwLock<Option<Arc<dyn ExecutionHandler>>>>,
}

impl LocalWorkflowEngine {
    pub fn new(config: LocalEngineConfig) -> Self {
        LocalWorkflowEngine {
            config,
            executions: Arc::new(RwLock::new(HashMap::new())),
            handler: Arc::new(RwLock::new(None)),
        }
    }

    /// Wire the stateless worker in. Must happen before the first execution
    /// starts; executions started without a handler fail immediately.
    pub async fn set_handler(&self, handler: Arc<dyn ExecutionHandler>) {
        *self.handler.write().await = Some(handler);
    }

    async fn drive(
        executions: Arc<RwLock<HashMap<String, ExecutionRecord>>>,
        handler_slot: Arc<RwLock<Option<Arc<dyn ExecutionHandler>>>>,
        config: LocalEngineConfig,
        execution_id: String,
        input: ExecutionInput,
    ) {
        let mut attempt: u32 = 0;
        loop {
            {
                let mut guard = executions.write().await;
                match guard.get_mut(&execution_id) {
                    None => return,
                    // Stopped or completed via callback while backing off.
                    Some(rec) if rec.sub_state.is_terminal() => return,
                    Some(rec) => {
                        rec.sub_state = ExecutionSubState::Running;
                        rec.native_state = "running".into();
                        rec.retry_count = attempt;
                    }
                }
            }

            let handler = handler_slot.read().await.clone();
            let Some(handler) = handler else {
                let mut guard = executions.write().await;
                if let Some(rec) = guard.get_mut(&execution_id) {
                    rec.sub_state = ExecutionSubState::Failed;
                    rec.native_state = "failed".into();
                    rec.error = Some("no execution handler registered".into());
                }
                return;
            };

            let ctx = ExecutionContext {
                execution_id: execution_id.clone(),
                attempt,
            };
            match handler.handle(ctx, input.clone()).await {
                Ok(()) => {
                    let mut guard = executions.write().await;
                    if let Some(rec) = guard.get_mut(&execution_id) {
                        if !rec.sub_state.is_terminal() {
                            rec.sub_state = ExecutionSubState::Failed;
                            rec.native_state = "failed".into();
                            rec.error =
                                Some("worker returned without reporting observed state".into());
                        }
                    }
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = {
                        let mut guard = executions.write().await;
                        let Some(rec) = guard.get_mut(&execution_id) else {
                            return;
                        };
                        if rec.sub_state.is_terminal() {
                            return;
                        }
                        rec.retry_count = attempt;
                        rec.error = Some(e.to_string());
                        if attempt >= config.max_attempts {
                            warn!(%execution_id, attempts = attempt, error = %e, "execution exhausted its attempts");
                            rec.sub_state = ExecutionSubState::Failed;
                            rec.native_state = "failed".into();
                            return;
                        }
                        rec.sub_state = ExecutionSubState::BackingOff;
                        rec.native_state = "retry_scheduled".into();
                        config
                            .retry_delay
                            .saturating_mul(1 << (attempt - 1).min(6))
                    };
                    debug!(%execution_id, attempt, ?delay, "retrying execution");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl WorkflowProvider for LocalWorkflowEngine {
    fn id(&self) -> &str {
        "local"
    }

    fn validate(&self, input: &ExecutionInput) -> Result<(), WorkflowError> {
        if !input.payload.desired_config.is_object() {
            return Err(WorkflowError::InvalidSpec(
                "desired_config must be a JSON object".into(),
            ));
        }
        if input.metadata.trigger_source.is_empty() {
            return Err(WorkflowError::InvalidSpec(
                "trigger_source must not be empty".into(),
            ));
        }
        if let Some(hash) = &input.metadata.config_hash {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(WorkflowError::InvalidSpec(
                    "config_hash must be a 64-character hex digest".into(),
                ));
            }
        }
        Ok(())
    }

    async fn start_execution(
        &self,
        execution_id: &str,
        input: ExecutionInput,
    ) -> Result<(), WorkflowError> {
        {
            let mut guard = self.executions.write().await;
            if guard.contains_key(execution_id) {
                debug!(execution_id, "start_execution on existing id is a no-op");
                return Ok(());
            }
            guard.insert(
                execution_id.to_string(),
                ExecutionRecord {
                    input: input.clone(),
                    native_state: "scheduled".into(),
                    sub_state: ExecutionSubState::Waiting,
                    output: None,
                    error: None,
                    retry_count: 0,
                },
            );
        }

        tokio::spawn(Self::drive(
            self.executions.clone(),
            self.handler.clone(),
            self.config.clone(),
            execution_id.to_string(),
            input,
        ));
        Ok(())
    }

    async fn stop_execution(&self, execution_id: &str, reason: &str) -> Result<(), WorkflowError> {
        let mut guard = self.executions.write().await;
        match guard.get_mut(execution_id) {
            None => Err(WorkflowError::ExecutionNotFound(execution_id.to_string())),
            Some(rec) if rec.sub_state.is_terminal() => Ok(()),
            Some(rec) => {
                rec.sub_state = ExecutionSubState::Failed;
                rec.native_state = "stopped".into();
                rec.error = Some(format!("stopped: {reason}"));
                Ok(())
            }
        }
    }

    async fn get_execution_status(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatus, WorkflowError> {
        let guard = self.executions.read().await;
        let rec = guard
            .get(execution_id)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        Ok(ExecutionStatus {
            state: rec.native_state.clone(),
            sub_state: map_native_state(self.id(), &rec.native_state),
            output: rec.output.clone(),
            error: rec.error.clone(),
            metadata: rec.input.metadata.clone(),
            retry_count: Some(rec.retry_count),
        })
    }

    async fn post_compute_callback(
        &self,
        execution_id: &str,
        callback: ComputeCallback,
    ) -> Result<(), WorkflowError> {
        let mut guard = self.executions.write().await;
        let rec = guard
            .get_mut(execution_id)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        if rec.sub_state.is_terminal() {
            debug!(execution_id, "ignoring callback on terminal execution");
            return Ok(());
        }
        if callback.succeeded {
            let mut out = serde_json::Map::new();
            if let Some(v) = callback.observed_config {
                out.insert("observed_config".into(), v);
            }
            if let Some(v) = callback.resource_ids {
                out.insert("resource_ids".into(), v);
            }
            rec.output = Some(Value::Object(out));
            rec.sub_state = ExecutionSubState::Succeeded;
            rec.native_state = "succeeded".into();
            rec.error = None;
        } else {
            rec.sub_state = ExecutionSubState::Failed;
            rec.native_state = "failed".into();
            rec.error = callback.error.or_else(|| Some("compute operation failed".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landlord_domain::{TenantAction, TenantId, WorkerPayload};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::provider::ExecutionMetadata;

    fn input() -> ExecutionInput {
        ExecutionInput {
            payload: WorkerPayload {
                tenant_id: TenantId::new(),
                action: TenantAction::Provision,
                desired_config: json!({"image": "nginx:alpine"}),
                compute_provider_id: Some("local".into()),
            },
            metadata: ExecutionMetadata {
                trigger_source: "test".into(),
                config_hash: Some("ab".repeat(32)),
            },
        }
    }

    /// Handler that posts a success callback and counts invocations.
    struct SucceedingHandler {
        engine: Arc<LocalWorkflowEngine>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ExecutionHandler for SucceedingHandler {
        async fn handle(
            &self,
            ctx: ExecutionContext,
            input: ExecutionInput,
        ) -> Result<(), WorkflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            WorkflowProvider::post_compute_callback(
                self.engine.as_ref(),
                &ctx.execution_id,
                ComputeCallback::success(
                    Some(input.payload.desired_config.clone()),
                    Some(json!({"runtime_id": "local://test"})),
                ),
            )
            .await
        }
    }

    struct AlwaysFailingHandler;

    #[async_trait]
    impl ExecutionHandler for AlwaysFailingHandler {
        async fn handle(
            &self,
            _ctx: ExecutionContext,
            _input: ExecutionInput,
        ) -> Result<(), WorkflowError> {
            Err(WorkflowError::Remote("compute endpoint unreachable".into()))
        }
    }

    async fn wait_terminal(engine: &LocalWorkflowEngine, id: &str) -> ExecutionStatus {
        for _ in 0..200 {
            let status = engine.get_execution_status(id).await.unwrap();
            if status.sub_state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {id} never reached a terminal sub-state");
    }

    #[tokio::test]
    async fn start_is_idempotent_by_execution_id() {
        let engine = Arc::new(LocalWorkflowEngine::new(LocalEngineConfig::default()));
        let handler = Arc::new(SucceedingHandler {
            engine: engine.clone(),
            calls: AtomicU32::new(0),
        });
        engine.set_handler(handler.clone()).await;

        engine.start_execution("local:t:plan:1", input()).await.unwrap();
        engine.start_execution("local:t:plan:1", input()).await.unwrap();

        let status = wait_terminal(&engine, "local:t:plan:1").await;
        assert_eq!(status.sub_state, ExecutionSubState::Succeeded);
        // Give the duplicate (if any were spawned) a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_callback_carries_output() {
        let engine = Arc::new(LocalWorkflowEngine::new(LocalEngineConfig::default()));
        engine
            .set_handler(Arc::new(SucceedingHandler {
                engine: engine.clone(),
                calls: AtomicU32::new(0),
            }))
            .await;

        engine.start_execution("local:t:provision:1", input()).await.unwrap();
        let status = wait_terminal(&engine, "local:t:provision:1").await;

        let output = status.output.unwrap();
        assert_eq!(output["observed_config"]["image"], "nginx:alpine");
        assert_eq!(output["resource_ids"]["runtime_id"], "local://test");
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn failing_handler_exhausts_attempts() {
        let engine = Arc::new(LocalWorkflowEngine::new(LocalEngineConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
        }));
        engine.set_handler(Arc::new(AlwaysFailingHandler)).await;

        engine.start_execution("local:t:provision:2", input()).await.unwrap();
        let status = wait_terminal(&engine, "local:t:provision:2").await;

        assert_eq!(status.sub_state, ExecutionSubState::Failed);
        assert_eq!(status.retry_count, Some(3));
        assert!(status.error.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminalizes() {
        let engine = Arc::new(LocalWorkflowEngine::new(LocalEngineConfig {
            max_attempts: 50,
            retry_delay: Duration::from_millis(100),
        }));
        engine.set_handler(Arc::new(AlwaysFailingHandler)).await;

        engine.start_execution("local:t:update:1", input()).await.unwrap();
        engine
            .stop_execution("local:t:update:1", "configuration updated")
            .await
            .unwrap();
        // Second stop has the same effect as one.
        engine
            .stop_execution("local:t:update:1", "configuration updated")
            .await
            .unwrap();

        let status = engine.get_execution_status("local:t:update:1").await.unwrap();
        assert_eq!(status.sub_state, ExecutionSubState::Failed);
        assert_eq!(status.state, "stopped");
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let engine = LocalWorkflowEngine::new(LocalEngineConfig::default());
        let err = engine.get_execution_status("local:nope:plan:1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));

        let err = engine.stop_execution("local:nope:plan:1", "x").await.unwrap_err();
        assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn validate_rejects_non_object_config() {
        let engine = LocalWorkflowEngine::new(LocalEngineConfig::default());
        let mut bad = input();
        bad.payload.desired_config = json!("not an object");
        assert!(matches!(
            engine.validate(&bad),
            Err(WorkflowError::InvalidSpec(_))
        ));

        let mut bad_hash = input();
        bad_hash.metadata.config_hash = Some("zz".into());
        assert!(engine.validate(&bad_hash).is_err());

        assert!(engine.validate(&input()).is_ok());
    }
}
