use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        TenantId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(s)
            .map(TenantId)
            .map_err(|_| DomainError::InvalidTenantId(s.to_string()))
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

/// The lifecycle status of a tenant.
///
/// Admissible transitions are listed in [`crate::state::admissible_targets`];
/// `requested` is the initial status, `archived` the terminal one for compute.
/// `deleting` is retained for wire compatibility with older records and admits
/// no transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Requested,
    Planning,
    Provisioning,
    Ready,
    Updating,
    Deleting,
    Archiving,
    Archived,
    Failed,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Requested => "requested",
            TenantStatus::Planning => "planning",
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Ready => "ready",
            TenantStatus::Updating => "updating",
            TenantStatus::Deleting => "deleting",
            TenantStatus::Archiving => "archiving",
            TenantStatus::Archived => "archived",
            TenantStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(TenantStatus::Requested),
            "planning" => Ok(TenantStatus::Planning),
            "provisioning" => Ok(TenantStatus::Provisioning),
            "ready" => Ok(TenantStatus::Ready),
            "updating" => Ok(TenantStatus::Updating),
            "deleting" => Ok(TenantStatus::Deleting),
            "archiving" => Ok(TenantStatus::Archiving),
            "archived" => Ok(TenantStatus::Archived),
            "failed" => Ok(TenantStatus::Failed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// Provider-agnostic execution status.
///
/// Every workflow backend maps its native states into this set; unknown native
/// states default to `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionSubState {
    Running,
    Waiting,
    BackingOff,
    Error,
    Succeeded,
    Failed,
}

impl ExecutionSubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionSubState::Running => "running",
            ExecutionSubState::Waiting => "waiting",
            ExecutionSubState::BackingOff => "backing-off",
            ExecutionSubState::Error => "error",
            ExecutionSubState::Succeeded => "succeeded",
            ExecutionSubState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionSubState::Succeeded | ExecutionSubState::Failed)
    }

    /// Degraded executions are eligible for a drift-triggered restart.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ExecutionSubState::BackingOff | ExecutionSubState::Error)
    }
}

impl std::fmt::Display for ExecutionSubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionSubState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionSubState::Running),
            "waiting" => Ok(ExecutionSubState::Waiting),
            "backing-off" => Ok(ExecutionSubState::BackingOff),
            "error" => Ok(ExecutionSubState::Error),
            "succeeded" => Ok(ExecutionSubState::Succeeded),
            "failed" => Ok(ExecutionSubState::Failed),
            other => Err(DomainError::InvalidSubState(other.to_string())),
        }
    }
}

/// The compute operation a workflow execution carries out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantAction {
    Plan,
    Provision,
    Update,
    Delete,
}

impl TenantAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantAction::Plan => "plan",
            TenantAction::Provision => "provision",
            TenantAction::Update => "update",
            TenantAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for TenantAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TenantAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(TenantAction::Plan),
            "provision" => Ok(TenantAction::Provision),
            "update" => Ok(TenantAction::Update),
            "delete" => Ok(TenantAction::Delete),
            other => Err(DomainError::InvalidAction(other.to_string())),
        }
    }
}

// ── Core structs ──────────────────────────────────────────────────────────────

/// A managed unit of compute with desired and observed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Unique human-readable name, 1-255 characters after trimming.
    pub name: String,
    pub status: TenantStatus,
    pub status_message: String,
    /// Declared shape of the tenant; opaque to the core, validated by the
    /// compute provider's schema.
    pub desired_config: Value,
    /// Runtime reality reported by the compute provider via worker callbacks.
    pub observed_config: Value,
    pub observed_resource_ids: Value,
    /// Compute provider this tenant is bound to. None means the registry
    /// default.
    pub compute_provider: Option<String>,
    pub workflow_execution_id: Option<String>,
    pub workflow_sub_state: Option<ExecutionSubState>,
    pub workflow_retry_count: Option<u32>,
    pub workflow_error_message: Option<String>,
    /// SHA-256 of the canonicalized desired config at the moment the active
    /// execution was started. Drives drift detection.
    pub workflow_config_hash: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic lock; increases by exactly 1 on every successful update.
    pub version: i64,
}

impl Tenant {
    pub fn new(name: impl Into<String>, desired_config: Value) -> Self {
        let now = Utc::now();
        Tenant {
            id: TenantId::new(),
            name: name.into(),
            status: TenantStatus::Requested,
            status_message: String::new(),
            desired_config,
            observed_config: Value::Null,
            observed_resource_ids: Value::Null,
            compute_provider: None,
            workflow_execution_id: None,
            workflow_sub_state: None,
            workflow_retry_count: None,
            workflow_error_message: None,
            workflow_config_hash: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn has_active_execution(&self) -> bool {
        self.workflow_execution_id.is_some()
    }

    /// Attach a freshly started execution. Retry counters reset.
    pub fn set_execution(&mut self, execution_id: impl Into<String>, config_hash: impl Into<String>) {
        self.workflow_execution_id = Some(execution_id.into());
        self.workflow_sub_state = Some(ExecutionSubState::Running);
        self.workflow_retry_count = Some(0);
        self.workflow_error_message = None;
        self.workflow_config_hash = Some(config_hash.into());
    }

    /// Retire the active execution: all workflow observability fields are
    /// cleared together so they stay jointly null.
    pub fn clear_workflow_fields(&mut self) {
        self.workflow_execution_id = None;
        self.workflow_sub_state = None;
        self.workflow_retry_count = None;
        self.workflow_error_message = None;
        self.workflow_config_hash = None;
    }
}

/// Payload handed to the stateless worker. Carries the full execution context
/// so workers never read the control-plane database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub tenant_id: TenantId,
    pub action: TenantAction,
    pub desired_config: Value,
    pub compute_provider_id: Option<String>,
}

/// Trim and validate a tenant name: 1-255 characters after trimming.
pub fn validate_name(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(DomainError::InvalidName("name must not be empty".into()));
    }
    if len > 255 {
        return Err(DomainError::InvalidName(format!(
            "name is {len} characters, maximum is 255"
        )));
    }
    Ok(trimmed.to_string())
}
