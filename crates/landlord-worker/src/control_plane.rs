use std::collections::HashMap;
use std::time::{Duration, Instant};

use landlord_domain::TenantId;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::WorkerError;

struct CacheEntry {
    provider_id: String,
    fetched_at: Instant,
}

/// Read-only client against the control plane's HTTP API.
///
/// Workers use it to resolve a tenant's compute-provider binding when the
/// payload does not carry one. Lookups are cached with a TTL; the worker
/// never talks to the control-plane database.
pub struct ControlPlaneClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
    ttl: Duration,
    cache: Mutex<HashMap<TenantId, CacheEntry>>,
}

impl ControlPlaneClient {
    pub fn new(base: impl Into<String>, token: Option<String>, ttl: Duration) -> Self {
        ControlPlaneClient {
            base: base.into(),
            token,
            http: reqwest::Client::new(),
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The compute provider the control plane has bound `tenant_id` to.
    pub async fn tenant_compute_provider(
        &self,
        tenant_id: &TenantId,
    ) -> Result<String, WorkerError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(tenant_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.provider_id.clone());
                }
            }
        }

        let url = format!("{}/tenants/{}", self.base.trim_end_matches('/'), tenant_id);
        debug!(%tenant_id, "resolving compute provider via control plane");
        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(WorkerError::Status(resp.status().as_u16()));
        }
        let body: Value = resp.json().await?;
        let provider_id = body
            .get("compute_provider")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WorkerError::ProviderUnresolved(tenant_id.to_string()))?
            .to_string();

        let mut cache = self.cache.lock().await;
        cache.insert(
            *tenant_id,
            CacheEntry {
                provider_id: provider_id.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(provider_id)
    }
}
