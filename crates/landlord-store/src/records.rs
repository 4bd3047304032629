use chrono::{DateTime, Utc};
use landlord_domain::{TenantAction, TenantId, TenantStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One row of the append-only state transition history. Written in the same
/// transaction as the tenant update it describes; cascade-deleted with the
/// tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub from_status: TenantStatus,
    pub to_status: TenantStatus,
    pub reason: String,
    pub triggered_by: String,
    pub desired_snapshot: Value,
    pub observed_snapshot: Value,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied context for the history row written by
/// [`crate::TenantStore::update_tenant`].
#[derive(Debug, Clone)]
pub struct TransitionAudit {
    pub reason: String,
    pub triggered_by: String,
}

impl TransitionAudit {
    pub fn new(reason: impl Into<String>, triggered_by: impl Into<String>) -> Self {
        TransitionAudit {
            reason: reason.into(),
            triggered_by: triggered_by.into(),
        }
    }
}

/// Terminal disposition of a compute execution audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Started,
    Succeeded,
    Failed,
    Stopped,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Started => "started",
            ExecutionOutcome::Succeeded => "succeeded",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(ExecutionOutcome::Started),
            "succeeded" => Ok(ExecutionOutcome::Succeeded),
            "failed" => Ok(ExecutionOutcome::Failed),
            "stopped" => Ok(ExecutionOutcome::Stopped),
            other => Err(format!("unknown execution outcome: {other}")),
        }
    }
}

/// Audit record for one compute operation carried out by a workflow
/// execution. Upserted on `execution_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeExecutionRecord {
    pub execution_id: String,
    pub tenant_id: TenantId,
    pub workflow_execution_id: Option<String>,
    pub operation_type: TenantAction,
    pub status: ExecutionOutcome,
    pub resource_ids: Value,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Append-only status stream keyed on the execution id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeExecutionEvent {
    pub execution_id: String,
    pub status: ExecutionOutcome,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for [`crate::TenantStore::list_tenants`].
#[derive(Debug, Clone)]
pub struct ListParams {
    pub include_archived: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListParams {
    fn default() -> Self {
        ListParams {
            include_archived: false,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantPage {
    pub tenants: Vec<landlord_domain::Tenant>,
    pub total: u64,
}
