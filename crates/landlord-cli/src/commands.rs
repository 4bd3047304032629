use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use landlord_api::build_app;
use landlord_compute::{ComputeRegistry, LocalComputeProvider};
use landlord_config::Settings;
use landlord_reconciler::{Reconciler, ReconcilerConfig};
use landlord_store::{InMemoryStore, PostgresStore, TenantStore};
use landlord_worker::WorkerHandler;
use landlord_workflow::{LocalEngineConfig, LocalWorkflowEngine, WorkflowManager};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::output;

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(config: Option<PathBuf>, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let mut settings = Settings::load(config.as_deref())?;
    if let Some(bind) = bind {
        settings.api.bind = bind;
    }
    if let Some(port) = port {
        settings.api.port = port;
    }

    // Store: a connection string selects Postgres, otherwise local mode.
    let store: Arc<dyn TenantStore> = match &settings.store.url {
        Some(url) => {
            info!("connecting to postgres store");
            Arc::new(PostgresStore::connect(url, settings.store.max_connections).await?)
        }
        None => {
            info!("no store url configured, using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    // Compute providers are enabled by configuration presence; with nothing
    // configured, local mode gets the local provider.
    let mut computes = ComputeRegistry::new();
    if settings.compute.local.is_some() || settings.compute_provider_ids().is_empty() {
        computes.register(Arc::new(LocalComputeProvider::new()?));
    }
    let computes = Arc::new(computes);

    // Workflow backend, same presence rule.
    let local_workflow = settings.workflow.local.clone().unwrap_or_default();
    let engine = Arc::new(LocalWorkflowEngine::new(LocalEngineConfig {
        max_attempts: local_workflow.max_attempts,
        retry_delay: Duration::from_millis(local_workflow.retry_delay_ms),
    }));
    let mut workflows = WorkflowManager::new();
    workflows.register(engine.clone());
    if let Some(default) = &settings.workflow.default_provider {
        workflows.set_default(default.clone());
    }
    let workflows = Arc::new(workflows);

    // The stateless worker runs in-process with the local engine and posts
    // observed state back through the engine's completion channel.
    let handler = Arc::new(WorkerHandler::new(computes.clone(), engine.clone(), None));
    engine.set_handler(handler).await;

    let reconciler = Reconciler::new(
        store.clone(),
        workflows,
        computes.clone(),
        ReconcilerConfig {
            poll_interval: settings.reconciler.poll_interval(),
            workers: settings.reconciler.workers,
            max_retries: settings.reconciler.max_retries,
            backoff_base: settings.reconciler.backoff_base(),
            backoff_cap: settings.reconciler.backoff_cap(),
            stop_restart_budget: settings.reconciler.stop_restart_budget(),
            status_timeout: Duration::from_secs(5),
        },
    );
    reconciler.start();

    let token = settings
        .api
        .auth_token
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if settings.api.auth_token.is_none() {
        info!(%token, "generated api token for this run");
    }

    let app = build_app(store, computes, Arc::new(token));
    let addr = format!("{}:{}", settings.api.bind, settings.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "landlord api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("api stopped, draining the reconciler");
    reconciler.stop(settings.reconciler.shutdown_timeout()).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ── Remote client ─────────────────────────────────────────────────────────────

struct RemoteClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl RemoteClient {
    fn new(remote: Option<String>, token: Option<String>) -> Result<Self> {
        let Some(base) = remote else {
            bail!("no server given: pass --remote or set LANDLORD_URL");
        };
        Ok(RemoteClient {
            base: base.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut req = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let value: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            let message = value["error_message"].as_str().unwrap_or("request failed");
            bail!("{} ({})", message, status);
        }
        Ok(value)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::DELETE, path, None).await
    }
}

// ── Tenant commands ───────────────────────────────────────────────────────────

pub async fn tenant_create(
    name: String,
    config: String,
    provider: Option<String>,
    labels: Vec<String>,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let desired: Value = serde_json::from_str(&config).context("parsing --config as JSON")?;
    let labels = parse_labels(&labels)?;

    let mut body = json!({ "name": name, "desired_config": desired, "labels": labels });
    if let Some(provider) = provider {
        body["compute_provider"] = json!(provider);
    }
    let created = client.post("/tenants", body).await?;
    output::print_json(&created);
    Ok(())
}

pub async fn tenant_get(name: String, remote: Option<String>, token: Option<String>) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let tenant = client.get(&format!("/tenants/{name}")).await?;
    output::print_json(&tenant);
    Ok(())
}

pub async fn tenant_list(
    include_archived: bool,
    limit: i64,
    offset: i64,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let page = client
        .get(&format!(
            "/tenants?include_archived={include_archived}&limit={limit}&offset={offset}"
        ))
        .await?;
    output::print_tenant_table(&page);
    Ok(())
}

pub async fn tenant_update(
    name: String,
    config: String,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let desired: Value = serde_json::from_str(&config).context("parsing --config as JSON")?;
    let updated = client
        .patch(
            &format!("/tenants/{name}"),
            json!({ "desired_config": desired }),
        )
        .await?;
    output::print_json(&updated);
    Ok(())
}

pub async fn tenant_archive(
    name: String,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let archived = client
        .post(&format!("/tenants/{name}/archive"), Value::Null)
        .await?;
    output::print_json(&archived);
    Ok(())
}

pub async fn tenant_delete(
    name: String,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let result = client.delete(&format!("/tenants/{name}")).await?;
    if result.is_null() {
        println!("deleted {name}");
    } else {
        output::print_json(&result);
    }
    Ok(())
}

// ── Schema and status ─────────────────────────────────────────────────────────

pub async fn schema(
    provider: Option<String>,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let path = match provider {
        Some(id) => format!("/schemas/compute/{id}"),
        None => "/schemas/compute".to_string(),
    };
    let schema = client.get(&path).await?;
    output::print_json(&schema);
    Ok(())
}

pub async fn status(remote: Option<String>, token: Option<String>) -> Result<()> {
    let client = RemoteClient::new(remote, token)?;
    let page = client
        .get("/tenants?include_archived=true&limit=500&offset=0")
        .await?;
    output::print_status_summary(&page);
    Ok(())
}

fn parse_labels(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("label '{entry}' is not key=value");
        };
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}
