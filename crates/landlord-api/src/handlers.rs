use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use landlord_domain::{
    can_transition, ensure_transition, validate_name, Tenant, TenantId, TenantStatus,
};
use landlord_store::{ListParams, TransitionAudit};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

const TRIGGERED_BY: &str = "api";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .store
        .list_tenants(&ListParams {
            limit: 1,
            ..Default::default()
        })
        .await?;
    Ok(StatusCode::OK)
}

// ── Tenants ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTenantBody {
    pub name: String,
    pub desired_config: Value,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub compute_provider: Option<String>,
}

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<CreateTenantBody>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let name = validate_name(&body.name)?;

    let provider = state
        .computes
        .resolve(body.compute_provider.as_deref())
        .map_err(|e| {
            ApiError::provider_unknown(e.to_string(), state.computes.provider_ids())
        })?;
    provider.validate(&body.desired_config)?;

    let mut tenant = Tenant::new(name, body.desired_config);
    tenant.compute_provider = Some(provider.id().to_string());
    tenant.labels = body.labels.unwrap_or_default();
    tenant.annotations = body.annotations.unwrap_or_default();

    let created = state.store.create_tenant(&tenant).await?;
    info!(tenant_id = %created.id, name = %created.name, "tenant created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_archived: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<landlord_store::TenantPage>, ApiError> {
    let params = ListParams {
        include_archived: query.include_archived,
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let page = state.store.list_tenants(&params).await?;
    Ok(Json(page))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    let tenant = resolve_tenant(&state, &key).await?;
    Ok(Json(tenant))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantBody {
    pub desired_config: Option<Value>,
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
}

pub async fn update_tenant(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<UpdateTenantBody>,
) -> Result<Json<Tenant>, ApiError> {
    let mut tenant = resolve_tenant(&state, &key).await?;
    if tenant.status == TenantStatus::Archived {
        return Err(ApiError::invalid_transition(
            format!("tenant '{}' is archived and cannot be updated", tenant.name),
            vec![],
        ));
    }

    let config_changed = match body.desired_config {
        Some(config) => {
            let provider = state
                .computes
                .resolve(tenant.compute_provider.as_deref())
                .map_err(|e| {
                    ApiError::provider_unknown(e.to_string(), state.computes.provider_ids())
                })?;
            provider.validate(&config)?;
            let changed = config != tenant.desired_config;
            tenant.desired_config = config;
            changed
        }
        None => false,
    };
    if let Some(labels) = body.labels {
        tenant.labels = labels;
    }
    if let Some(annotations) = body.annotations {
        tenant.annotations = annotations;
    }

    // Stage the next reconciliation for settled tenants. In-flight tenants
    // keep their status; the reconciler folds the new hash in via the drift
    // check.
    if config_changed {
        let staged = match tenant.status {
            TenantStatus::Ready => Some(TenantStatus::Updating),
            TenantStatus::Failed => Some(TenantStatus::Planning),
            _ => None,
        };
        if let Some(next) = staged {
            ensure_transition(tenant.status, next)?;
            tenant.status = next;
            tenant.status_message = "update requested".to_string();
        }
    }

    let updated = state
        .store
        .update_tenant(&tenant, &TransitionAudit::new("tenant updated", TRIGGERED_BY))
        .await?;
    Ok(Json(updated))
}

pub async fn archive_tenant(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    let mut tenant = resolve_tenant(&state, &key).await?;
    ensure_transition(tenant.status, TenantStatus::Archiving)?;
    tenant.status = TenantStatus::Archiving;
    tenant.status_message = "archive requested".to_string();

    let updated = state
        .store
        .update_tenant(
            &tenant,
            &TransitionAudit::new("archive requested", TRIGGERED_BY),
        )
        .await?;
    info!(tenant_id = %updated.id, "tenant archiving");
    Ok(Json(updated))
}

pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let mut tenant = resolve_tenant(&state, &key).await?;

    match tenant.status {
        // Archived: the compute is gone, remove the record.
        // Requested: nothing was ever provisioned, same deal.
        TenantStatus::Archived | TenantStatus::Requested => {
            state.store.delete_tenant(&tenant.id).await?;
            info!(tenant_id = %tenant.id, "tenant hard-deleted");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        // Already on its way out.
        TenantStatus::Archiving | TenantStatus::Deleting => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": tenant.status })),
        )
            .into_response()),
        status if can_transition(status, TenantStatus::Archiving) => {
            tenant.status = TenantStatus::Archiving;
            tenant.status_message = "delete requested".to_string();
            let updated = state
                .store
                .update_tenant(
                    &tenant,
                    &TransitionAudit::new("delete requested", TRIGGERED_BY),
                )
                .await?;
            info!(tenant_id = %updated.id, "tenant archiving before delete");
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": updated.status })),
            )
                .into_response())
        }
        status => Err(ApiError::invalid_transition(
            format!("tenant '{}' at status {status} cannot be deleted yet", tenant.name),
            landlord_domain::admissible_targets(status)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )),
    }
}

// ── Audit reads ───────────────────────────────────────────────────────────────

pub async fn list_history(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<landlord_store::StateTransition>>, ApiError> {
    let tenant = resolve_tenant(&state, &key).await?;
    let history = state.store.list_history(&tenant.id, 100).await?;
    Ok(Json(history))
}

pub async fn list_executions(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<landlord_store::ComputeExecutionRecord>>, ApiError> {
    let tenant = resolve_tenant(&state, &key).await?;
    let executions = state.store.list_executions(&tenant.id).await?;
    Ok(Json(executions))
}

// ── Compute config schemas ────────────────────────────────────────────────────

pub async fn get_default_schema(
    State(state): State<AppState>,
) -> Result<Json<landlord_compute::ComputeSchema>, ApiError> {
    let provider = state.computes.resolve(None).map_err(|e| {
        ApiError::provider_unknown(e.to_string(), state.computes.provider_ids())
    })?;
    Ok(Json(provider.schema()))
}

pub async fn get_schema(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<landlord_compute::ComputeSchema>, ApiError> {
    let provider = state.computes.resolve(Some(&provider_id)).map_err(|e| {
        ApiError::provider_unknown(e.to_string(), state.computes.provider_ids())
    })?;
    Ok(Json(provider.schema()))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Resolve a path segment as a tenant id first, then as a name.
async fn resolve_tenant(state: &AppState, key: &str) -> Result<Tenant, ApiError> {
    if let Ok(id) = TenantId::parse(key) {
        if let Some(tenant) = state.store.get_tenant(&id).await? {
            return Ok(tenant);
        }
    }
    state
        .store
        .get_tenant_by_name(key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("tenant '{key}' not found")))
}
