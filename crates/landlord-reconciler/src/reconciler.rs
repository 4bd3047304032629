//! The reconciliation control loop.
//!
//! A poll loop sweeps the store for actionable tenants and feeds a
//! de-duplicating work queue; N workers pull tenant ids and run one of two
//! reconciliation modes. Invoke mode starts a workflow execution for the
//! action the status calls for; poll mode tracks the active execution,
//! merges its output on success, and stops-and-restarts degraded executions
//! whose desired config has drifted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use landlord_compute::ComputeRegistry;
use landlord_domain::{
    can_transition, config_hash, ensure_transition, invoke_target, reconcile_action,
    success_target, ExecutionSubState, Tenant, TenantId, TenantStatus, WorkerPayload,
};
use landlord_store::{
    ComputeExecutionEvent, ComputeExecutionRecord, ExecutionOutcome, StoreError, TenantStore,
    TransitionAudit,
};
use landlord_workflow::{
    ExecutionInput, ExecutionMetadata, ExecutionStatus, WorkflowError, WorkflowManager,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::queue::WorkQueue;

const TRIGGERED_BY: &str = "reconciler";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    pub workers: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub stop_restart_budget: Duration,
    /// Per-call timeout on execution status reads.
    pub status_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            poll_interval: Duration::from_secs(10),
            workers: 4,
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            stop_restart_budget: Duration::from_secs(30),
            status_timeout: Duration::from_secs(5),
        }
    }
}

struct Ctx {
    store: Arc<dyn TenantStore>,
    workflows: Arc<WorkflowManager>,
    computes: Arc<ComputeRegistry>,
    config: ReconcilerConfig,
    queue: WorkQueue,
    /// Halts the poll loop as soon as a stop begins.
    stop_signal: CancellationToken,
    /// Cancels in-flight provider calls once the stop timeout elapses.
    cancel: CancellationToken,
    last_pass: Mutex<HashMap<TenantId, Instant>>,
}

/// Process-wide reconciler singleton with an explicit start/stop lifecycle.
pub struct Reconciler {
    ctx: Arc<Ctx>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug)]
enum Outcome {
    Done,
    /// Re-enqueue immediately: the pass retired an execution and the next
    /// invoke-mode pass should run without waiting for the poll loop.
    Requeue,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TenantStore>,
        workflows: Arc<WorkflowManager>,
        computes: Arc<ComputeRegistry>,
        config: ReconcilerConfig,
    ) -> Self {
        let queue = WorkQueue::new(config.backoff_base, config.backoff_cap);
        Reconciler {
            ctx: Arc::new(Ctx {
                store,
                workflows,
                computes,
                config,
                queue,
                stop_signal: CancellationToken::new(),
                cancel: CancellationToken::new(),
                last_pass: Mutex::new(HashMap::new()),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the poll loop and the worker pool. Idempotent.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if !handles.is_empty() {
            return;
        }
        handles.push(tokio::spawn(poll_loop(self.ctx.clone())));
        for worker in 0..self.ctx.config.workers.max(1) {
            handles.push(tokio::spawn(worker_loop(self.ctx.clone(), worker)));
        }
        info!(
            workers = self.ctx.config.workers,
            poll_interval = ?self.ctx.config.poll_interval,
            "reconciler started"
        );
    }

    /// Nudge a tenant onto the queue without waiting for the next sweep.
    pub fn enqueue(&self, id: TenantId) {
        self.ctx.queue.add(id);
    }

    /// Stop the reconciler: the poll loop halts, the queue hands out no more
    /// keys, in-flight workers get up to `timeout` to finish, then their
    /// context is cancelled.
    pub async fn stop(&self, timeout: Duration) {
        info!("reconciler stopping");
        self.ctx.stop_signal.cancel();
        self.ctx.queue.shut_down();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let deadline = Instant::now() + timeout;
        let mut stragglers = Vec::new();
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => {}
                Err(_) => stragglers.push(handle),
            }
        }

        if !stragglers.is_empty() {
            warn!(
                count = stragglers.len(),
                "workers still busy after the shutdown timeout, cancelling their context"
            );
            self.ctx.cancel.cancel();
            for mut handle in stragglers {
                if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                    .await
                    .is_err()
                {
                    handle.abort();
                }
            }
        } else {
            self.ctx.cancel.cancel();
        }
        info!("reconciler stopped");
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

async fn poll_loop(ctx: Arc<Ctx>) {
    let interval = ctx.config.poll_interval.max(Duration::from_secs(1));
    // Skip tenants reconciled within a small fraction of the interval.
    let debounce = interval / 10;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ctx.stop_signal.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match ctx.store.list_for_reconciliation().await {
            Ok(tenants) => {
                let now = Instant::now();
                for tenant in tenants {
                    let debounced = {
                        let last = ctx.last_pass.lock().unwrap_or_else(|e| e.into_inner());
                        last.get(&tenant.id)
                            .is_some_and(|at| now.duration_since(*at) < debounce)
                    };
                    if !debounced {
                        ctx.queue.add(tenant.id);
                    }
                }
            }
            Err(e) => warn!(error = %e, "reconciliation sweep failed"),
        }
    }
    debug!("poll loop halted");
}

async fn worker_loop(ctx: Arc<Ctx>, worker: usize) {
    while let Some(key) = ctx.queue.get().await {
        {
            let mut last = ctx.last_pass.lock().unwrap_or_else(|e| e.into_inner());
            last.insert(key, Instant::now());
        }

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ReconcileError::Cancelled),
            r = reconcile_tenant(&ctx, key) => r,
        };

        let mut requeue = false;
        match result {
            Ok(Outcome::Done) => ctx.queue.forget(&key),
            Ok(Outcome::Requeue) => {
                ctx.queue.forget(&key);
                requeue = true;
            }
            // Shutdown: persist nothing, the tenant stays actionable for the
            // next instance's sweep.
            Err(ReconcileError::Cancelled) => {}
            Err(e) if e.is_transient() => {
                if ctx.queue.failures(&key) >= ctx.config.max_retries {
                    warn!(tenant_id = %key, error = %e, "retries exhausted, marking tenant failed");
                    mark_failed(&ctx, key, format!("retries exhausted: {e}")).await;
                    ctx.queue.forget(&key);
                } else {
                    let delay = ctx.queue.add_rate_limited(key);
                    debug!(tenant_id = %key, ?delay, error = %e, "transient failure, requeued");
                }
            }
            Err(e) => {
                warn!(tenant_id = %key, error = %e, "fatal reconcile failure");
                mark_failed(&ctx, key, e.to_string()).await;
                ctx.queue.forget(&key);
            }
        }

        ctx.queue.done(key);
        if requeue {
            ctx.queue.add(key);
        }
    }
    debug!(worker, "worker exited");
}

// ── One reconciliation pass ───────────────────────────────────────────────────

async fn reconcile_tenant(ctx: &Ctx, key: TenantId) -> Result<Outcome, ReconcileError> {
    let Some(tenant) = ctx.store.get_tenant(&key).await? else {
        debug!(tenant_id = %key, "tenant gone, dropping key");
        return Ok(Outcome::Done);
    };

    match tenant.workflow_execution_id.clone() {
        Some(execution_id) => poll_execution(ctx, tenant, execution_id).await,
        None => invoke(ctx, tenant).await,
    }
}

/// Invoke mode: the tenant has no active execution and its status calls for
/// an action.
async fn invoke(ctx: &Ctx, tenant: Tenant) -> Result<Outcome, ReconcileError> {
    let Some(action) = reconcile_action(tenant.status) else {
        return Ok(Outcome::Done);
    };

    let provider_id = ctx
        .workflows
        .default_provider()
        .ok_or_else(|| WorkflowError::ProviderUnknown("<default>".to_string()))
        .map_err(ReconcileError::Workflow)?
        .to_string();

    // Re-check the config against the compute provider before spending a
    // workflow execution on it. Schema violations here are fatal.
    let compute = ctx.computes.resolve(tenant.compute_provider.as_deref())?;
    compute.validate(&tenant.desired_config)?;

    let hash = config_hash(&tenant.desired_config);
    let execution_id =
        WorkflowManager::execution_id(&provider_id, &tenant.id, action, tenant.version);
    let input = ExecutionInput {
        payload: WorkerPayload {
            tenant_id: tenant.id,
            action,
            desired_config: tenant.desired_config.clone(),
            compute_provider_id: tenant.compute_provider.clone(),
        },
        metadata: ExecutionMetadata {
            trigger_source: TRIGGERED_BY.to_string(),
            config_hash: Some(hash.clone()),
        },
    };

    with_cancel(ctx, ctx.workflows.invoke(&provider_id, &execution_id, input)).await?;
    info!(tenant_id = %tenant.id, %action, %execution_id, "workflow execution started");
    record_execution_started(ctx, &tenant, &execution_id, action).await;

    let exec_id = execution_id.clone();
    try_update(
        ctx,
        tenant,
        &TransitionAudit::new(format!("{action} execution started"), TRIGGERED_BY),
        move |t| {
            if reconcile_action(t.status) != Some(action) || t.workflow_execution_id.is_some() {
                // The tenant moved under us; re-decide on the next pass.
                return Err(ReconcileError::Conflict(t.id));
            }
            let next = invoke_target(t.status);
            if next != t.status {
                ensure_transition(t.status, next)?;
                t.status = next;
            }
            t.status_message = format!("{action} in progress");
            t.set_execution(exec_id.clone(), hash.clone());
            Ok(())
        },
    )
    .await?;
    Ok(Outcome::Done)
}

/// Poll mode: the tenant has an active execution; track it.
async fn poll_execution(
    ctx: &Ctx,
    tenant: Tenant,
    execution_id: String,
) -> Result<Outcome, ReconcileError> {
    let status = match execution_status(ctx, &execution_id).await {
        Err(ReconcileError::Workflow(WorkflowError::ExecutionNotFound(_))) => {
            // The provider lost the execution: clear the reference and let
            // invoke mode start over.
            warn!(tenant_id = %tenant.id, %execution_id, "execution missing at provider, clearing");
            let eid = execution_id.clone();
            try_update(
                ctx,
                tenant,
                &TransitionAudit::new("execution missing at provider", TRIGGERED_BY),
                move |t| {
                    if t.workflow_execution_id.as_deref() != Some(eid.as_str()) {
                        return Err(ReconcileError::Conflict(t.id));
                    }
                    t.clear_workflow_fields();
                    Ok(())
                },
            )
            .await?;
            return Ok(Outcome::Requeue);
        }
        other => other?,
    };

    if status.sub_state == ExecutionSubState::Succeeded {
        return handle_success(ctx, tenant, execution_id, status).await;
    }
    if status.sub_state == ExecutionSubState::Failed {
        return handle_failure(ctx, tenant, execution_id, status).await;
    }

    // Drift check: restart only degraded executions. A running or waiting
    // execution is left to complete even when the desired config moved on.
    // A missing hash (legacy execution) never triggers a restart.
    let current_hash = config_hash(&tenant.desired_config);
    let drifted = tenant
        .workflow_config_hash
        .as_deref()
        .is_some_and(|h| h != current_hash);
    if drifted && status.sub_state.is_degraded() {
        return stop_and_restart(ctx, tenant, execution_id).await;
    }

    // Write back only when a watched field changed, to minimise write
    // amplification.
    let sub_state = Some(status.sub_state);
    let retry_count = status.retry_count.or(tenant.workflow_retry_count);
    let error_message = status.error.clone();
    if tenant.workflow_sub_state != sub_state
        || tenant.workflow_retry_count != retry_count
        || tenant.workflow_error_message != error_message
    {
        let eid = execution_id.clone();
        try_update(
            ctx,
            tenant,
            &TransitionAudit::new("execution status updated", TRIGGERED_BY),
            move |t| {
                if t.workflow_execution_id.as_deref() != Some(eid.as_str()) {
                    return Err(ReconcileError::Conflict(t.id));
                }
                t.workflow_sub_state = sub_state;
                t.workflow_retry_count = retry_count;
                t.workflow_error_message = error_message.clone();
                Ok(())
            },
        )
        .await?;
    }
    Ok(Outcome::Done)
}

async fn handle_success(
    ctx: &Ctx,
    tenant: Tenant,
    execution_id: String,
    status: ExecutionStatus,
) -> Result<Outcome, ReconcileError> {
    let output = status.output.unwrap_or(Value::Null);
    let observed = output.get("observed_config").cloned();
    let resources = output.get("resource_ids").cloned();

    let eid = execution_id.clone();
    let updated = try_update(
        ctx,
        tenant,
        &TransitionAudit::new("execution succeeded", TRIGGERED_BY),
        move |t| {
            if t.workflow_execution_id.as_deref() != Some(eid.as_str()) {
                return Err(ReconcileError::Conflict(t.id));
            }
            if let Some(v) = observed.clone() {
                t.observed_config = v;
            }
            if let Some(v) = resources.clone() {
                t.observed_resource_ids = v;
            }
            t.clear_workflow_fields();
            match success_target(t.status) {
                Some(next) => {
                    ensure_transition(t.status, next)?;
                    t.status = next;
                    t.status_message = match next {
                        TenantStatus::Ready => "tenant is ready".to_string(),
                        TenantStatus::Archived => "tenant archived".to_string(),
                        other => other.to_string(),
                    };
                }
                // A finished plan retires its execution without a status
                // change; the next invoke pass starts the provision.
                None => t.status_message = "plan complete".to_string(),
            }
            Ok(())
        },
    )
    .await?;

    info!(tenant_id = %updated.id, status = %updated.status, %execution_id, "execution succeeded");
    record_execution_finished(
        ctx,
        &execution_id,
        ExecutionOutcome::Succeeded,
        updated.observed_resource_ids.clone(),
        None,
    )
    .await;

    if updated.status == TenantStatus::Planning {
        Ok(Outcome::Requeue)
    } else {
        Ok(Outcome::Done)
    }
}

async fn handle_failure(
    ctx: &Ctx,
    tenant: Tenant,
    execution_id: String,
    status: ExecutionStatus,
) -> Result<Outcome, ReconcileError> {
    let tenant_id = tenant.id;
    let error = status
        .error
        .unwrap_or_else(|| "execution failed".to_string());

    let eid = execution_id.clone();
    let message = error.clone();
    try_update(
        ctx,
        tenant,
        &TransitionAudit::new(format!("execution failed: {error}"), TRIGGERED_BY),
        move |t| {
            if t.workflow_execution_id.as_deref() != Some(eid.as_str()) {
                return Err(ReconcileError::Conflict(t.id));
            }
            ensure_transition(t.status, TenantStatus::Failed)?;
            t.status = TenantStatus::Failed;
            t.status_message = message.clone();
            t.clear_workflow_fields();
            Ok(())
        },
    )
    .await?;

    warn!(%tenant_id, %execution_id, %error, "execution failed");
    record_execution_finished(
        ctx,
        &execution_id,
        ExecutionOutcome::Failed,
        Value::Null,
        Some(error),
    )
    .await;
    Ok(Outcome::Done)
}

/// Stop a degraded execution whose config has drifted, confirm termination
/// within the budget, clear the workflow fields and re-enqueue so the next
/// invoke pass starts fresh with the new hash. Idempotent end to end.
async fn stop_and_restart(
    ctx: &Ctx,
    tenant: Tenant,
    execution_id: String,
) -> Result<Outcome, ReconcileError> {
    info!(tenant_id = %tenant.id, %execution_id, "config drifted on a degraded execution, stopping");

    match with_cancel(
        ctx,
        ctx.workflows
            .stop_execution(&execution_id, "configuration updated"),
    )
    .await
    {
        Ok(()) => {}
        // Already gone counts as terminal.
        Err(ReconcileError::Workflow(WorkflowError::ExecutionNotFound(_))) => {}
        Err(e) => return Err(e),
    }

    let deadline = Instant::now() + ctx.config.stop_restart_budget;
    loop {
        match execution_status(ctx, &execution_id).await {
            Ok(st) if st.sub_state.is_terminal() => break,
            Err(ReconcileError::Workflow(WorkflowError::ExecutionNotFound(_))) => break,
            Err(ReconcileError::Cancelled) => return Err(ReconcileError::Cancelled),
            Ok(_) | Err(_) => {
                if Instant::now() >= deadline {
                    return Err(ReconcileError::StopBudgetExceeded(execution_id));
                }
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(ReconcileError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }
            }
        }
    }

    let eid = execution_id.clone();
    try_update(
        ctx,
        tenant,
        &TransitionAudit::new(
            "execution stopped after configuration update",
            TRIGGERED_BY,
        ),
        move |t| {
            if t.workflow_execution_id.as_deref() != Some(eid.as_str()) {
                return Err(ReconcileError::Conflict(t.id));
            }
            t.clear_workflow_fields();
            Ok(())
        },
    )
    .await?;

    record_execution_finished(
        ctx,
        &execution_id,
        ExecutionOutcome::Stopped,
        Value::Null,
        Some("configuration updated".to_string()),
    )
    .await;
    Ok(Outcome::Requeue)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Race a provider call against the root cancellation token.
async fn with_cancel<T, E>(
    ctx: &Ctx,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, ReconcileError>
where
    ReconcileError: From<E>,
{
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ReconcileError::Cancelled),
        r = fut => r.map_err(ReconcileError::from),
    }
}

/// Status read with the per-call timeout applied.
async fn execution_status(
    ctx: &Ctx,
    execution_id: &str,
) -> Result<ExecutionStatus, ReconcileError> {
    let fut = ctx.workflows.get_execution_status(execution_id);
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ReconcileError::Cancelled),
        r = tokio::time::timeout(ctx.config.status_timeout, fut) => match r {
            Ok(inner) => inner.map_err(ReconcileError::from),
            Err(_) => Err(ReconcileError::StatusTimeout(execution_id.to_string())),
        }
    }
}

/// Optimistically persist a mutation: on a version conflict, re-read once,
/// re-apply and retry. A second conflict is reported as transient so the key
/// requeues with backoff.
async fn try_update<F>(
    ctx: &Ctx,
    mut tenant: Tenant,
    audit: &TransitionAudit,
    mut mutate: F,
) -> Result<Tenant, ReconcileError>
where
    F: FnMut(&mut Tenant) -> Result<(), ReconcileError>,
{
    for attempt in 0..2 {
        let mut candidate = tenant.clone();
        mutate(&mut candidate)?;
        match ctx.store.update_tenant(&candidate, audit).await {
            Ok(updated) => return Ok(updated),
            Err(StoreError::Concurrency { .. }) if attempt == 0 => {
                debug!(tenant_id = %tenant.id, "version conflict, re-reading");
                match ctx.store.get_tenant(&tenant.id).await? {
                    Some(fresh) => tenant = fresh,
                    None => {
                        return Err(StoreError::TenantNotFound(tenant.id.to_string()).into())
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReconcileError::Conflict(tenant.id))
}

/// Move a tenant to `failed` with a descriptive message. Best effort: a
/// tenant that vanished or no longer admits the transition is left alone.
async fn mark_failed(ctx: &Ctx, key: TenantId, message: String) {
    let tenant = match ctx.store.get_tenant(&key).await {
        Ok(Some(t)) => t,
        Ok(None) => return,
        Err(e) => {
            warn!(tenant_id = %key, error = %e, "could not read tenant to mark it failed");
            return;
        }
    };
    if !can_transition(tenant.status, TenantStatus::Failed) {
        warn!(tenant_id = %key, status = %tenant.status, "tenant does not admit the failed transition");
        return;
    }

    let msg = message.clone();
    let result = try_update(
        ctx,
        tenant,
        &TransitionAudit::new(message, TRIGGERED_BY),
        move |t| {
            ensure_transition(t.status, TenantStatus::Failed)?;
            t.status = TenantStatus::Failed;
            t.status_message = msg.clone();
            t.clear_workflow_fields();
            Ok(())
        },
    )
    .await;
    if let Err(e) = result {
        warn!(tenant_id = %key, error = %e, "could not persist failed status");
    }
}

// ── Execution audit stream (best effort) ──────────────────────────────────────

async fn record_execution_started(
    ctx: &Ctx,
    tenant: &Tenant,
    execution_id: &str,
    action: landlord_domain::TenantAction,
) {
    let record = ComputeExecutionRecord {
        execution_id: execution_id.to_string(),
        tenant_id: tenant.id,
        workflow_execution_id: Some(execution_id.to_string()),
        operation_type: action,
        status: ExecutionOutcome::Started,
        resource_ids: Value::Null,
        error_code: None,
        error_message: None,
        started_at: Utc::now(),
        finished_at: None,
    };
    if let Err(e) = ctx.store.record_execution(&record).await {
        warn!(execution_id, error = %e, "could not record execution start");
        return;
    }
    let event = ComputeExecutionEvent {
        execution_id: execution_id.to_string(),
        status: ExecutionOutcome::Started,
        message: None,
        created_at: Utc::now(),
    };
    if let Err(e) = ctx.store.append_execution_event(&event).await {
        warn!(execution_id, error = %e, "could not append execution event");
    }
}

async fn record_execution_finished(
    ctx: &Ctx,
    execution_id: &str,
    outcome: ExecutionOutcome,
    resource_ids: Value,
    error_message: Option<String>,
) {
    let Some(action) = WorkflowManager::action_of(execution_id) else {
        return;
    };
    let Some(tenant_segment) = execution_id.split(':').nth(1) else {
        return;
    };
    let Ok(tenant_id) = TenantId::parse(tenant_segment) else {
        return;
    };

    let record = ComputeExecutionRecord {
        execution_id: execution_id.to_string(),
        tenant_id,
        workflow_execution_id: Some(execution_id.to_string()),
        operation_type: action,
        status: outcome,
        resource_ids,
        error_code: match outcome {
            ExecutionOutcome::Failed => Some("ExecutionFailed".to_string()),
            _ => None,
        },
        error_message: error_message.clone(),
        started_at: Utc::now(),
        finished_at: Some(Utc::now()),
    };
    if let Err(e) = ctx.store.record_execution(&record).await {
        warn!(execution_id, error = %e, "could not record execution outcome");
        return;
    }
    let event = ComputeExecutionEvent {
        execution_id: execution_id.to_string(),
        status: outcome,
        message: error_message,
        created_at: Utc::now(),
    };
    if let Err(e) = ctx.store.append_execution_event(&event).await {
        warn!(execution_id, error = %e, "could not append execution event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use landlord_compute::LocalComputeProvider;
    use landlord_domain::TenantAction;
    use landlord_store::InMemoryStore;
    use landlord_workflow::{
        ExecutionHandler, LocalEngineConfig, LocalWorkflowEngine, WorkflowProvider,
    };
    use landlord_worker::WorkerHandler;
    use serde_json::json;

    struct Harness {
        store: Arc<InMemoryStore>,
        engine: Arc<LocalWorkflowEngine>,
        reconciler: Reconciler,
    }

    impl Harness {
        fn ctx(&self) -> &Ctx {
            &self.reconciler.ctx
        }
    }

    /// Wraps the real worker so tests can inject transient failures and
    /// slowness keyed on the image name.
    struct GatedHandler {
        inner: WorkerHandler,
    }

    #[async_trait]
    impl ExecutionHandler for GatedHandler {
        async fn handle(
            &self,
            ctx: landlord_workflow::ExecutionContext,
            input: ExecutionInput,
        ) -> Result<(), WorkflowError> {
            let image = input.payload.desired_config["image"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if image == "nginx:broken" {
                return Err(WorkflowError::Remote("simulated backend outage".into()));
            }
            if image == "nginx:hang" {
                tokio::time::sleep(Duration::from_secs(30)).await;
                return Err(WorkflowError::Remote("hung".into()));
            }
            if image == "nginx:slow" && input.payload.action == TenantAction::Provision {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            self.inner.handle(ctx, input).await
        }
    }

    async fn harness(engine_cfg: LocalEngineConfig) -> Harness {
        let store = Arc::new(InMemoryStore::new());

        let mut computes = ComputeRegistry::new();
        computes.register(Arc::new(LocalComputeProvider::new().unwrap()));
        let computes = Arc::new(computes);

        let engine = Arc::new(LocalWorkflowEngine::new(engine_cfg));
        engine
            .set_handler(Arc::new(GatedHandler {
                inner: WorkerHandler::new(computes.clone(), engine.clone(), None),
            }))
            .await;

        let mut workflows = WorkflowManager::new();
        workflows.register(engine.clone());
        let workflows = Arc::new(workflows);

        let reconciler = Reconciler::new(
            store.clone(),
            workflows,
            computes,
            ReconcilerConfig {
                poll_interval: Duration::from_secs(1),
                workers: 2,
                max_retries: 5,
                backoff_base: Duration::from_millis(20),
                backoff_cap: Duration::from_secs(1),
                stop_restart_budget: Duration::from_secs(5),
                status_timeout: Duration::from_secs(5),
            },
        );
        Harness {
            store,
            engine,
            reconciler,
        }
    }

    fn new_tenant(name: &str, image: &str) -> Tenant {
        let mut t = Tenant::new(name, json!({ "image": image }));
        t.compute_provider = Some("local".into());
        t
    }

    /// Drive reconciliation passes for one tenant until the predicate holds.
    async fn drive_until(
        harness: &Harness,
        id: TenantId,
        what: &str,
        pred: impl Fn(&Tenant) -> bool,
    ) -> Tenant {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let _ = reconcile_tenant(harness.ctx(), id).await;
            if let Some(t) = harness.store.get_tenant(&id).await.unwrap() {
                if pred(&t) {
                    return t;
                }
                if Instant::now() >= deadline {
                    panic!("timed out waiting for {what}; tenant: {t:?}");
                }
            } else if Instant::now() >= deadline {
                panic!("timed out waiting for {what}; tenant gone");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn status_walk(history: &[landlord_store::StateTransition]) -> Vec<TenantStatus> {
        // Oldest first, status changes only.
        let mut walk = Vec::new();
        for row in history.iter().rev() {
            if row.from_status != row.to_status {
                if walk.is_empty() {
                    walk.push(row.from_status);
                }
                walk.push(row.to_status);
            }
        }
        walk
    }

    #[tokio::test]
    async fn happy_path_reaches_ready() {
        let h = harness(LocalEngineConfig::default()).await;
        let tenant = new_tenant("demo", "nginx:alpine");
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        let ready = drive_until(&h, id, "ready", |t| t.status == TenantStatus::Ready).await;

        assert_eq!(ready.observed_config["image"], "nginx:alpine");
        assert!(ready.observed_resource_ids["runtime_id"]
            .as_str()
            .unwrap()
            .starts_with("local://"));
        // All workflow fields are null once the execution is retired.
        assert!(ready.workflow_execution_id.is_none());
        assert!(ready.workflow_sub_state.is_none());
        assert!(ready.workflow_retry_count.is_none());
        assert!(ready.workflow_error_message.is_none());
        assert!(ready.workflow_config_hash.is_none());

        let history = h.store.list_history(&id, 100).await.unwrap();
        assert_eq!(
            status_walk(&history),
            vec![
                TenantStatus::Requested,
                TenantStatus::Planning,
                TenantStatus::Provisioning,
                TenantStatus::Ready,
            ]
        );
        for row in &history {
            if row.from_status != row.to_status {
                assert!(
                    can_transition(row.from_status, row.to_status),
                    "history contains inadmissible transition {} -> {}",
                    row.from_status,
                    row.to_status
                );
            }
        }

        // Exactly one execution per action.
        let executions = h.store.list_executions(&id).await.unwrap();
        let plans = executions
            .iter()
            .filter(|e| e.operation_type == TenantAction::Plan)
            .count();
        let provisions = executions
            .iter()
            .filter(|e| e.operation_type == TenantAction::Provision)
            .count();
        assert_eq!(plans, 1);
        assert_eq!(provisions, 1);
        assert!(executions
            .iter()
            .all(|e| e.status == ExecutionOutcome::Succeeded));
    }

    #[tokio::test]
    async fn archive_then_hard_delete() {
        let h = harness(LocalEngineConfig::default()).await;
        let tenant = new_tenant("archive-me", "nginx:alpine");
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        let ready = drive_until(&h, id, "ready", |t| t.status == TenantStatus::Ready).await;

        // The surface stages the archive.
        let mut staged = ready.clone();
        ensure_transition(staged.status, TenantStatus::Archiving).unwrap();
        staged.status = TenantStatus::Archiving;
        h.store
            .update_tenant(&staged, &TransitionAudit::new("tenant deleted", "api"))
            .await
            .unwrap();

        let archived =
            drive_until(&h, id, "archived", |t| t.status == TenantStatus::Archived).await;
        assert!(archived.observed_config.is_null());
        assert!(archived.observed_resource_ids.is_null());
        assert!(archived.workflow_execution_id.is_none());

        let history = h.store.list_history(&id, 100).await.unwrap();
        let walk = status_walk(&history);
        assert!(walk.ends_with(&[
            TenantStatus::Ready,
            TenantStatus::Archiving,
            TenantStatus::Archived
        ]));

        h.store.delete_tenant(&id).await.unwrap();
        assert!(h.store.get_tenant(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drift_restarts_a_backing_off_execution() {
        let h = harness(LocalEngineConfig {
            max_attempts: 100,
            retry_delay: Duration::from_millis(200),
        })
        .await;
        let tenant = new_tenant("drifter", "nginx:broken");
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        // The plan execution fails transiently and backs off.
        let degraded = drive_until(&h, id, "backing-off", |t| {
            t.workflow_sub_state == Some(ExecutionSubState::BackingOff)
        })
        .await;
        let first_execution = degraded.workflow_execution_id.clone().unwrap();
        let first_hash = degraded.workflow_config_hash.clone().unwrap();
        assert!(degraded
            .workflow_error_message
            .as_deref()
            .unwrap()
            .contains("outage"));

        // The operator fixes the config; its hash drifts from the one the
        // degraded execution was started with.
        let mut fixed = degraded.clone();
        fixed.desired_config = json!({ "image": "nginx:alpine" });
        h.store
            .update_tenant(&fixed, &TransitionAudit::new("tenant updated", "api"))
            .await
            .unwrap();
        assert_ne!(first_hash, config_hash(&json!({ "image": "nginx:alpine" })));

        let ready = drive_until(&h, id, "ready", |t| t.status == TenantStatus::Ready).await;
        assert_eq!(ready.observed_config["image"], "nginx:alpine");

        // The degraded execution was stopped, not left to flail.
        let stopped = h
            .engine
            .get_execution_status(&first_execution)
            .await
            .unwrap();
        assert_eq!(stopped.state, "stopped");
    }

    #[tokio::test]
    async fn no_restart_while_the_execution_is_running() {
        let h = harness(LocalEngineConfig::default()).await;
        let tenant = new_tenant("steady", "nginx:slow");
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        // Wait for the provision execution to be live.
        let provisioning = drive_until(&h, id, "provisioning", |t| {
            t.status == TenantStatus::Provisioning && t.workflow_execution_id.is_some()
        })
        .await;
        let execution_id = provisioning.workflow_execution_id.clone().unwrap();

        // Config drifts while the execution is healthy: no restart.
        let mut drifted = provisioning.clone();
        drifted.desired_config = json!({ "image": "nginx:alpine" });
        h.store
            .update_tenant(&drifted, &TransitionAudit::new("tenant updated", "api"))
            .await
            .unwrap();

        let ready = drive_until(&h, id, "ready", |t| t.status == TenantStatus::Ready).await;
        // Observed state was produced under the original config.
        assert_eq!(ready.observed_config["image"], "nginx:slow");

        let finished = h.engine.get_execution_status(&execution_id).await.unwrap();
        assert_eq!(finished.sub_state, ExecutionSubState::Succeeded);
        assert_ne!(finished.state, "stopped");
    }

    #[tokio::test]
    async fn missing_execution_clears_and_reinvokes() {
        let h = harness(LocalEngineConfig::default()).await;
        let mut tenant = new_tenant("orphaned", "nginx:alpine");
        tenant.status = TenantStatus::Provisioning;
        tenant.set_execution(
            format!("local:{}:provision:1", tenant.id),
            config_hash(&tenant.desired_config),
        );
        let id = tenant.id;
        // The engine has never heard of this execution.
        h.store.create_tenant(&tenant).await.unwrap();

        let ready = drive_until(&h, id, "ready", |t| t.status == TenantStatus::Ready).await;
        assert_eq!(ready.observed_config["image"], "nginx:alpine");
    }

    #[tokio::test]
    async fn invalid_config_is_fatal_at_invoke_time() {
        let h = harness(LocalEngineConfig::default()).await;
        let mut tenant = new_tenant("bad-config", "nginx:alpine");
        tenant.desired_config = json!({ "image": "nginx:alpine", "replicas": 0 });
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        let result = reconcile_tenant(h.ctx(), id).await;
        let err = result.unwrap_err();
        assert!(!err.is_transient());
        // The worker loop turns a fatal error into a failed tenant.
        mark_failed(h.ctx(), id, err.to_string()).await;

        let t = h.store.get_tenant(&id).await.unwrap().unwrap();
        assert_eq!(t.status, TenantStatus::Failed);
        assert!(t.status_message.contains("invalid compute config"));
        assert!(t.workflow_execution_id.is_none());
    }

    #[tokio::test]
    async fn unknown_compute_provider_is_fatal() {
        let h = harness(LocalEngineConfig::default()).await;
        let mut tenant = new_tenant("bad-provider", "nginx:alpine");
        tenant.compute_provider = Some("gcp".into());
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        let err = reconcile_tenant(h.ctx(), id).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Compute(landlord_compute::ComputeError::ProviderUnknown(_))
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn poll_mode_skips_writes_when_nothing_changed() {
        let h = harness(LocalEngineConfig::default()).await;
        let mut tenant = new_tenant("quiet", "nginx:hang");
        let hash = config_hash(&tenant.desired_config);
        let id = tenant.id;
        let execution_id = format!("local:{id}:provision:2");

        // A live execution that will sit in `running` for the whole test.
        h.engine
            .start_execution(
                &execution_id,
                ExecutionInput {
                    payload: WorkerPayload {
                        tenant_id: id,
                        action: TenantAction::Provision,
                        desired_config: tenant.desired_config.clone(),
                        compute_provider_id: Some("local".into()),
                    },
                    metadata: ExecutionMetadata {
                        trigger_source: TRIGGERED_BY.into(),
                        config_hash: Some(hash.clone()),
                    },
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tenant.status = TenantStatus::Provisioning;
        tenant.set_execution(execution_id, hash);
        h.store.create_tenant(&tenant).await.unwrap();
        let before = h.store.get_tenant(&id).await.unwrap().unwrap().version;

        reconcile_tenant(h.ctx(), id).await.unwrap();
        reconcile_tenant(h.ctx(), id).await.unwrap();

        let after = h.store.get_tenant(&id).await.unwrap().unwrap().version;
        assert_eq!(before, after, "unchanged status must not be re-persisted");
    }

    #[tokio::test]
    async fn version_conflict_retries_with_a_fresh_read() {
        let h = harness(LocalEngineConfig::default()).await;
        let tenant = new_tenant("contended", "nginx:alpine");
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        // The reconciler reads v1...
        let snapshot = h.store.get_tenant(&id).await.unwrap().unwrap();

        // ...and the surface updates labels concurrently, moving to v2.
        let mut surface = snapshot.clone();
        surface.labels.insert("team".into(), "platform".into());
        h.store
            .update_tenant(&surface, &TransitionAudit::new("labels updated", "api"))
            .await
            .unwrap();

        // The reconciler's write at v1 conflicts, re-reads and retries.
        let updated = try_update(
            h.ctx(),
            snapshot,
            &TransitionAudit::new("status note", TRIGGERED_BY),
            |t| {
                t.status_message = "noted".into();
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.version, 3);
        assert_eq!(updated.status_message, "noted");
        // No lost update: the surface's labels survive.
        assert_eq!(updated.labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(h.store.list_history(&id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reconciler_lifecycle_start_and_stop() {
        let h = harness(LocalEngineConfig::default()).await;
        let tenant = new_tenant("lifecycle", "nginx:alpine");
        let id = tenant.id;
        h.store.create_tenant(&tenant).await.unwrap();

        h.reconciler.start();
        h.reconciler.enqueue(id);

        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let t = h.store.get_tenant(&id).await.unwrap().unwrap();
            if t.status == TenantStatus::Ready {
                break;
            }
            if Instant::now() >= deadline {
                panic!("reconciler never drove the tenant to ready: {t:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Stop returns within the timeout and the queue hands out nothing.
        tokio::time::timeout(Duration::from_secs(10), h.reconciler.stop(Duration::from_secs(5)))
            .await
            .expect("stop must return within its timeout");
        assert!(h.reconciler.ctx.queue.get().await.is_none());
    }
}
