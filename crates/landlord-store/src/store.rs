use async_trait::async_trait;
use landlord_domain::{Tenant, TenantId};

use crate::error::StoreError;
use crate::records::{
    ComputeExecutionEvent, ComputeExecutionRecord, ListParams, StateTransition, TenantPage,
    TransitionAudit,
};

/// Durable tenant repository.
///
/// The `version` column is the sole coordination primitive: updates carry the
/// version the caller read, fail with [`StoreError::Concurrency`] when it is
/// stale, and bump it by exactly 1 on success, writing a history row in the
/// same transaction. No row locks.
#[async_trait]
pub trait TenantStore: Send + Sync + 'static {
    /// Insert a new tenant. Fails with [`StoreError::NameTaken`] when the
    /// name collides with a live row.
    async fn create_tenant(&self, tenant: &Tenant) -> Result<Tenant, StoreError>;

    async fn get_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, StoreError>;

    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StoreError>;

    /// Deterministic order: `created_at` descending, `id` as tie-breaker.
    async fn list_tenants(&self, params: &ListParams) -> Result<TenantPage, StoreError>;

    /// All tenants whose status is neither `archived` nor `failed`, ordered
    /// by `updated_at` ascending. Feeds the reconciler's poll loop.
    async fn list_for_reconciliation(&self) -> Result<Vec<Tenant>, StoreError>;

    /// Persist `tenant` if its `version` still matches the stored row.
    /// Returns the updated tenant (version bumped). Writes the history row
    /// described by `audit` atomically with the update.
    async fn update_tenant(
        &self,
        tenant: &Tenant,
        audit: &TransitionAudit,
    ) -> Result<Tenant, StoreError>;

    /// Most recent transitions first.
    async fn list_history(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<StateTransition>, StoreError>;

    /// Insert or update an execution audit record, keyed on `execution_id`.
    async fn record_execution(&self, record: &ComputeExecutionRecord) -> Result<(), StoreError>;

    async fn append_execution_event(
        &self,
        event: &ComputeExecutionEvent,
    ) -> Result<(), StoreError>;

    /// Most recent executions first.
    async fn list_executions(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ComputeExecutionRecord>, StoreError>;

    /// Remove the tenant row entirely, cascading to history and executions.
    async fn delete_tenant(&self, id: &TenantId) -> Result<(), StoreError>;
}
