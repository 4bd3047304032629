use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use landlord_domain::TenantId;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ComputeError;
use crate::provider::{
    ComputeOutcome, ComputeProvider, ComputeSchema, ComputeSpec, ComputeState,
};

fn config_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Local compute configuration",
        "type": "object",
        "required": ["image"],
        "properties": {
            "image": {
                "type": "string",
                "minLength": 1,
                "description": "Container image reference"
            },
            "replicas": {
                "type": "integer",
                "minimum": 1,
                "default": 1
            },
            "command": {
                "type": "array",
                "items": { "type": "string" }
            },
            "env": {
                "type": "object",
                "additionalProperties": { "type": "string" }
            }
        },
        "additionalProperties": false
    })
}

#[derive(Debug, Clone)]
struct LocalRuntime {
    config: Value,
    resource_ids: Value,
}

/// Compute provider that simulates a container runtime in process memory.
///
/// Produces `local://` resource ids and performs no real I/O. Registered in
/// local mode and used throughout the test suite.
pub struct LocalComputeProvider {
    validator: Validator,
    runtimes: Arc<RwLock<HashMap<TenantId, LocalRuntime>>>,
}

impl LocalComputeProvider {
    pub fn new() -> Result<Self, ComputeError> {
        let validator = jsonschema::validator_for(&config_schema())
            .map_err(|e| ComputeError::Internal(format!("schema compilation: {e}")))?;
        Ok(LocalComputeProvider {
            validator,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn resource_ids_for(tenant_id: &TenantId, config: &Value) -> Value {
        json!({
            "runtime_id": format!("local://runtime/{tenant_id}"),
            "image": config.get("image").cloned().unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl ComputeProvider for LocalComputeProvider {
    fn id(&self) -> &str {
        "local"
    }

    fn schema(&self) -> ComputeSchema {
        ComputeSchema {
            provider_id: "local".into(),
            schema: config_schema(),
            defaults: Some(json!({ "replicas": 1 })),
        }
    }

    fn validate(&self, config: &Value) -> Result<(), ComputeError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(config)
            .map(|e| format!("{} at {}", e, e.instance_path()))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ComputeError::InvalidConfig(errors.join("; ")))
        }
    }

    async fn provision(&self, spec: &ComputeSpec) -> Result<ComputeOutcome, ComputeError> {
        self.validate(&spec.config)?;
        debug!(tenant_id = %spec.tenant_id, "local provision");
        let resource_ids = Self::resource_ids_for(&spec.tenant_id, &spec.config);
        let mut guard = self.runtimes.write().await;
        guard.insert(
            spec.tenant_id,
            LocalRuntime {
                config: spec.config.clone(),
                resource_ids: resource_ids.clone(),
            },
        );
        Ok(ComputeOutcome {
            state: ComputeState::Active,
            observed_config: spec.config.clone(),
            resource_ids,
            error: None,
        })
    }

    async fn update(&self, spec: &ComputeSpec) -> Result<ComputeOutcome, ComputeError> {
        self.validate(&spec.config)?;
        debug!(tenant_id = %spec.tenant_id, "local update");
        // Updating an absent runtime converges on provisioning it.
        self.provision(spec).await
    }

    async fn destroy(&self, spec: &ComputeSpec) -> Result<ComputeOutcome, ComputeError> {
        debug!(tenant_id = %spec.tenant_id, "local destroy");
        let mut guard = self.runtimes.write().await;
        guard.remove(&spec.tenant_id);
        Ok(ComputeOutcome {
            state: ComputeState::Missing,
            observed_config: Value::Null,
            resource_ids: Value::Null,
            error: None,
        })
    }

    async fn get_status(&self, tenant_id: &TenantId) -> Result<ComputeOutcome, ComputeError> {
        let guard = self.runtimes.read().await;
        Ok(match guard.get(tenant_id) {
            Some(runtime) => ComputeOutcome {
                state: ComputeState::Active,
                observed_config: runtime.config.clone(),
                resource_ids: runtime.resource_ids.clone(),
                error: None,
            },
            None => ComputeOutcome {
                state: ComputeState::Missing,
                observed_config: Value::Null,
                resource_ids: Value::Null,
                error: None,
            },
        })
    }
}
