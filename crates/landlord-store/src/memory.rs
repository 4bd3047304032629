use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use landlord_domain::{Tenant, TenantId, TenantStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::records::{
    ComputeExecutionEvent, ComputeExecutionRecord, ListParams, StateTransition, TenantPage,
    TransitionAudit,
};
use crate::store::TenantStore;

#[derive(Debug, Default)]
struct Inner {
    tenants: HashMap<TenantId, Tenant>,
    history: Vec<StateTransition>,
    executions: Vec<ComputeExecutionRecord>,
    execution_events: Vec<ComputeExecutionEvent>,
}

/// In-memory implementation of [`TenantStore`].
///
/// All data is lost on process exit. Suitable for tests and local mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<Tenant, StoreError> {
        let mut guard = self.inner.write().await;
        if guard.tenants.values().any(|t| t.name == tenant.name) {
            return Err(StoreError::NameTaken(tenant.name.clone()));
        }
        guard.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant.clone())
    }

    async fn get_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.tenants.get(id).cloned())
    }

    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.tenants.values().find(|t| t.name == name).cloned())
    }

    async fn list_tenants(&self, params: &ListParams) -> Result<TenantPage, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<Tenant> = guard
            .tenants
            .values()
            .filter(|t| params.include_archived || t.status != TenantStatus::Archived)
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.as_uuid().cmp(&b.id.as_uuid()))
        });

        let total = all.len() as u64;
        let offset = params.offset.max(0) as usize;
        let limit = params.limit.max(0) as usize;
        let tenants = all.into_iter().skip(offset).take(limit).collect();
        Ok(TenantPage { tenants, total })
    }

    async fn list_for_reconciliation(&self) -> Result<Vec<Tenant>, StoreError> {
        let guard = self.inner.read().await;
        let mut due: Vec<Tenant> = guard
            .tenants
            .values()
            .filter(|t| {
                t.status != TenantStatus::Archived && t.status != TenantStatus::Failed
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(due)
    }

    async fn update_tenant(
        &self,
        tenant: &Tenant,
        audit: &TransitionAudit,
    ) -> Result<Tenant, StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .tenants
            .get(&tenant.id)
            .ok_or_else(|| StoreError::TenantNotFound(tenant.id.to_string()))?;

        if stored.version != tenant.version {
            return Err(StoreError::Concurrency {
                tenant: tenant.id.to_string(),
                expected: tenant.version,
            });
        }
        let from_status = stored.status;

        let mut updated = tenant.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();

        guard.history.push(StateTransition {
            id: Uuid::new_v4(),
            tenant_id: updated.id,
            from_status,
            to_status: updated.status,
            reason: audit.reason.clone(),
            triggered_by: audit.triggered_by.clone(),
            desired_snapshot: updated.desired_config.clone(),
            observed_snapshot: updated.observed_config.clone(),
            created_at: updated.updated_at,
        });
        guard.tenants.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn list_history(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<StateTransition>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<StateTransition> = guard
            .history
            .iter()
            .filter(|h| h.tenant_id == *tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn record_execution(&self, record: &ComputeExecutionRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard
            .executions
            .iter_mut()
            .find(|r| r.execution_id == record.execution_id)
        {
            *existing = record.clone();
        } else {
            guard.executions.push(record.clone());
        }
        Ok(())
    }

    async fn append_execution_event(
        &self,
        event: &ComputeExecutionEvent,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.execution_events.push(event.clone());
        Ok(())
    }

    async fn list_executions(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ComputeExecutionRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<ComputeExecutionRecord> = guard
            .executions
            .iter()
            .filter(|r| r.tenant_id == *tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn delete_tenant(&self, id: &TenantId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.tenants.remove(id);
        guard.history.retain(|h| h.tenant_id != *id);
        let retired: Vec<String> = guard
            .executions
            .iter()
            .filter(|r| r.tenant_id == *id)
            .map(|r| r.execution_id.clone())
            .collect();
        guard.executions.retain(|r| r.tenant_id != *id);
        guard
            .execution_events
            .retain(|e| !retired.contains(&e.execution_id));
        Ok(())
    }
}
