//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use flowgrid_core::error::FlowGridError;
use flowgrid_core::types::TriggerType;
use flowgrid_delivery::completion_envelope;
use flowgrid_engine::{Automation, CompletionReport, TaskTemplate, TriggerConfig, graph};
use flowgrid_quota::ActionKind;
use flowgrid_schedule::ScheduleSpec;
use serde::Deserialize;
use std::sync::Arc;

use crate::server::AppState;
use crate::trigger;

type ApiReply = (StatusCode, Json<serde_json::Value>);

fn ok_reply(value: serde_json::Value) -> ApiReply {
    (StatusCode::OK, Json(value))
}

fn error_reply(error: FlowGridError) -> ApiReply {
    let status = match &error {
        FlowGridError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FlowGridError::NotFound(_) => StatusCode::NOT_FOUND,
        FlowGridError::ConcurrencyHeld(_) => StatusCode::CONFLICT,
        FlowGridError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        FlowGridError::Auth => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": error.to_string()})),
    )
}

/// Opaque rejection for inbound hook authentication. Every failure mode —
/// unknown id, stale timestamp, bad signature — looks identical from the
/// outside.
fn unauthorized() -> ApiReply {
    error_reply(FlowGridError::Auth)
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "flowgrid-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// ─── Tenants ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpsertTenantRequest {
    pub tenant_id: String,
    #[serde(default = "default_plan")]
    pub plan: String,
}

fn default_plan() -> String {
    "free".into()
}

/// Register a tenant / assign its plan tier.
pub async fn upsert_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertTenantRequest>,
) -> ApiReply {
    if !state.config.quota.tiers.contains_key(&req.plan) {
        return error_reply(FlowGridError::Validation(format!(
            "unknown plan tier '{}'",
            req.plan
        )));
    }
    let gate = state.gate.lock().await;
    if let Err(e) = gate.usage_db().set_plan(&req.tenant_id, &req.plan) {
        return error_reply(e);
    }
    ok_reply(serde_json::json!({"ok": true, "tenant_id": req.tenant_id, "plan": req.plan}))
}

// ─── Automations ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerRequest {
    Manual,
    Scheduled { schedule: String },
    Webhook,
}

#[derive(Debug, Deserialize)]
pub struct CreateAutomationRequest {
    pub tenant_id: String,
    pub title: String,
    pub trigger: TriggerRequest,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
    #[serde(default)]
    pub single_concurrency: bool,
    #[serde(default)]
    pub notify_url: Option<String>,
}

/// Create an automation template (draft). Webhook-triggered automations
/// get a credential issued here — the secret appears in this response and
/// never again.
pub async fn create_automation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAutomationRequest>,
) -> ApiReply {
    let now = Utc::now();

    // Admission first: a tenant at their automation cap gets the upgrade
    // message, not a draft they can never activate.
    {
        let gate = state.gate.lock().await;
        let decision = gate.check(&req.tenant_id, ActionKind::CreateAutomation, None, now);
        if !decision.allowed {
            return error_reply(FlowGridError::QuotaExceeded(
                decision.reason.unwrap_or_else(|| "automation limit reached".into()),
            ));
        }
    }

    // Strict validation at save time: descriptors that would only ever run
    // on the fallback cadence and malformed graphs are rejected here.
    let trigger = match req.trigger {
        TriggerRequest::Manual => TriggerConfig::Manual,
        TriggerRequest::Webhook => TriggerConfig::Webhook,
        TriggerRequest::Scheduled { schedule } => {
            let spec = ScheduleSpec::parse(&schedule);
            if let Err(e) = spec.validate() {
                return error_reply(e);
            }
            TriggerConfig::Scheduled { schedule: spec }
        }
    };
    if let Err(e) = graph::resolve(&req.tasks) {
        return error_reply(FlowGridError::Validation(e.to_string()));
    }

    let mut automation = Automation::new(&req.tenant_id, &req.title, trigger, req.tasks);
    automation.single_concurrency = req.single_concurrency;
    automation.notify_url = req.notify_url;

    let orchestrator = state.orchestrator.lock().await;
    if let Err(e) = orchestrator.db().save_automation(&automation) {
        return error_reply(e);
    }
    drop(orchestrator);

    {
        let gate = state.gate.lock().await;
        if let Err(e) = gate.record(&req.tenant_id, ActionKind::CreateAutomation, 1, now) {
            return error_reply(e);
        }
    }

    // Webhook-triggered automations need an inbound credential; automations
    // with a notify_url need one for outbound signing.
    let needs_credential =
        matches!(automation.trigger, TriggerConfig::Webhook) || automation.notify_url.is_some();
    let mut webhook = None;
    if needs_credential {
        let credentials = state.credentials.lock().await;
        match credentials.issue(&automation.tenant_id, Some(&automation.id)) {
            Ok(cred) => {
                webhook = Some(serde_json::json!({
                    "webhook_id": cred.webhook_id,
                    "secret": cred.secret,
                }));
            }
            Err(e) => return error_reply(e),
        }
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "ok": true,
            "automation": automation,
            "webhook": webhook,
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: String,
    pub limit: Option<usize>,
}

/// List a tenant's automations.
pub async fn list_automations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.db().list_automations(&query.tenant_id) {
        Ok(automations) => ok_reply(serde_json::json!({"ok": true, "automations": automations})),
        Err(e) => error_reply(e),
    }
}

/// Read one automation.
pub async fn get_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.db().get_automation(&id) {
        Ok(Some(automation)) => ok_reply(serde_json::json!({"ok": true, "automation": automation})),
        Ok(None) => error_reply(FlowGridError::NotFound(format!("automation {id}"))),
        Err(e) => error_reply(e),
    }
}

/// Activate an automation; scheduled ones get queued for their next
/// occurrence.
pub async fn activate_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.activate_automation(&id, Utc::now()) {
        Ok(automation) => {
            if let Some(next) = automation.next_run_at {
                state.queue.lock().await.push(&automation.id, next);
            }
            ok_reply(serde_json::json!({"ok": true, "automation": automation}))
        }
        Err(e) => error_reply(e),
    }
}

/// Pause an automation.
pub async fn pause_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.pause_automation(&id) {
        Ok(automation) => ok_reply(serde_json::json!({"ok": true, "automation": automation})),
        Err(e) => error_reply(e),
    }
}

/// Archive an automation (soft delete) and release its plan slot.
pub async fn archive_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.archive_automation(&id) {
        Ok(automation) => {
            drop(orchestrator);
            let gate = state.gate.lock().await;
            if let Err(e) = gate.release(
                &automation.tenant_id,
                ActionKind::CreateAutomation,
                1,
                Utc::now(),
            ) {
                tracing::warn!("⚠️ Failed to release automation slot: {e}");
            }
            ok_reply(serde_json::json!({"ok": true, "automation": automation}))
        }
        Err(e) => error_reply(e),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TriggerRunRequest {
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Manually trigger a run.
pub async fn trigger_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TriggerRunRequest>,
) -> ApiReply {
    let automation = {
        let orchestrator = state.orchestrator.lock().await;
        match orchestrator.db().get_automation(&id) {
            Ok(Some(a)) => a,
            Ok(None) => return error_reply(FlowGridError::NotFound(format!("automation {id}"))),
            Err(e) => return error_reply(e),
        }
    };

    match trigger::fire(&state, &automation, TriggerType::Manual, req.input).await {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "run_id": run.id, "status": run.status})),
        ),
        Err(e) => error_reply(e),
    }
}

// ─── Inbound webhooks ──────────────────────────────────────

/// Authenticated inbound webhook trigger.
///
/// Headers: `x-webhook-timestamp` (unix seconds) and `x-webhook-signature`
/// (`v1=<hex>`); the body is the raw JSON that becomes the run input. Any
/// authentication failure is an identical opaque 401.
pub async fn inbound_hook(
    State(state): State<Arc<AppState>>,
    Path(webhook_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiReply {
    let Some(timestamp) = headers
        .get("x-webhook-timestamp")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
    else {
        return unauthorized();
    };
    let Some(signature) = headers.get("x-webhook-signature").and_then(|v| v.to_str().ok())
    else {
        return unauthorized();
    };
    // When the id header is present it must agree with the path.
    if let Some(header_id) = headers.get("x-webhook-id").and_then(|v| v.to_str().ok())
        && header_id != webhook_id
    {
        return unauthorized();
    }

    let (secret, automation_id) = {
        let credentials = state.credentials.lock().await;
        let Ok(Some(secret)) = credentials.secret_for(&webhook_id) else {
            return unauthorized();
        };
        let binding = credentials.binding_for(&webhook_id).ok().flatten();
        (secret, binding.and_then(|(_, automation_id)| automation_id))
    };

    if let Err(reason) =
        flowgrid_security::verify(&body, signature, &secret, timestamp, Utc::now().timestamp())
    {
        tracing::debug!("🔒 Inbound hook {webhook_id} rejected: {reason}");
        return unauthorized();
    }

    // Authenticated from here on — failures may say why.
    let Some(automation_id) = automation_id else {
        return error_reply(FlowGridError::NotFound(format!(
            "webhook {webhook_id} is not bound to an automation"
        )));
    };
    let automation = {
        let orchestrator = state.orchestrator.lock().await;
        match orchestrator.db().get_automation(&automation_id) {
            Ok(Some(a)) => a,
            Ok(None) => {
                return error_reply(FlowGridError::NotFound(format!("automation {automation_id}")));
            }
            Err(e) => return error_reply(e),
        }
    };
    if !matches!(automation.trigger, TriggerConfig::Webhook) {
        return error_reply(FlowGridError::Validation(format!(
            "automation {automation_id} is not webhook-triggered"
        )));
    }

    let input = if body.trim().is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                return error_reply(FlowGridError::Validation(format!("body is not valid JSON: {e}")));
            }
        }
    };

    match trigger::fire(&state, &automation, TriggerType::Webhook, input).await {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "run_id": run.id})),
        ),
        Err(e) => error_reply(e),
    }
}

/// Rotate a webhook credential. The old secret dies immediately; the new
/// one appears in this response and never again.
pub async fn rotate_credential(
    State(state): State<Arc<AppState>>,
    Path(webhook_id): Path<String>,
) -> ApiReply {
    let credentials = state.credentials.lock().await;
    match credentials.rotate(&webhook_id) {
        Ok(secret) => ok_reply(serde_json::json!({
            "ok": true,
            "webhook_id": webhook_id,
            "secret": secret,
        })),
        Err(e) => error_reply(e),
    }
}

// ─── Completion callback ──────────────────────────────────────

/// Worker-pool completion callback. Idempotent: duplicates are
/// acknowledged with `duplicate: true` and change nothing.
pub async fn complete_run(
    State(state): State<Arc<AppState>>,
    Json(report): Json<CompletionReport>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    let completed = match orchestrator.complete_run(&report, Utc::now()) {
        Ok(c) => c,
        Err(e) => return error_reply(e),
    };

    let Some(run) = completed else {
        return ok_reply(serde_json::json!({"ok": true, "duplicate": true}));
    };

    // Outbound notification, off the callback path — the worker pool
    // shouldn't wait on a subscriber's endpoint.
    let automation = orchestrator.db().get_automation(&run.automation_id).ok().flatten();
    drop(orchestrator);

    // A completed scheduled run re-queues its next occurrence for the poller.
    if let Some(automation) = &automation
        && let Some(next) = automation.next_run_at
    {
        state.queue.lock().await.push(&automation.id, next);
    }

    if let Some(automation) = automation
        && let Some(url) = automation.notify_url.clone()
    {
        let envelope = completion_envelope(&run, &automation.title);
        let credentials = state.credentials.clone();
        let delivery = state.delivery.clone();
        let options = state.delivery_options;
        let automation_id = automation.id.clone();
        tokio::spawn(async move {
            let cred = {
                let credentials = credentials.lock().await;
                credentials.credential_for_automation(&automation_id)
            };
            match cred {
                Ok(Some((webhook_id, secret))) => {
                    delivery
                        .deliver(&url, &webhook_id, &envelope.to_string(), &secret, &options)
                        .await;
                }
                Ok(None) => {
                    tracing::warn!(
                        "⚠️ Automation {automation_id} has notify_url but no credential — skipping notification"
                    );
                }
                Err(e) => tracing::warn!("⚠️ Credential lookup for notification failed: {e}"),
            }
        });
    }

    ok_reply(serde_json::json!({
        "ok": true,
        "duplicate": false,
        "run_id": run.id,
        "status": run.status,
        "duration_ms": run.duration_ms,
    }))
}

// ─── Runs ──────────────────────────────────────

/// Recent runs for a tenant.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator
        .db()
        .list_runs(&query.tenant_id, query.limit.unwrap_or(50))
    {
        Ok(runs) => ok_reply(serde_json::json!({"ok": true, "runs": runs})),
        Err(e) => error_reply(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    pub minutes: Option<u32>,
}

/// Runs stuck in `running` past the stale threshold — an observability
/// signal, nothing is transitioned.
pub async fn stale_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StaleQuery>,
) -> ApiReply {
    let minutes = query
        .minutes
        .unwrap_or(state.config.engine.stale_after_minutes);
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.stale_runs(chrono::Duration::minutes(minutes as i64), Utc::now()) {
        Ok(runs) => ok_reply(serde_json::json!({
            "ok": true,
            "stale_after_minutes": minutes,
            "runs": runs,
        })),
        Err(e) => error_reply(e),
    }
}

/// Read one run.
pub async fn get_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.db().get_run(&id) {
        Ok(Some(run)) => {
            let tasks = orchestrator.db().tasks_for_run(&id).unwrap_or_default();
            ok_reply(serde_json::json!({"ok": true, "run": run, "tasks": tasks}))
        }
        Ok(None) => error_reply(FlowGridError::NotFound(format!("run {id}"))),
        Err(e) => error_reply(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AppendLogRequest {
    #[serde(default = "default_log_level")]
    pub level: flowgrid_core::types::LogLevel,
    pub step: String,
    #[serde(default)]
    pub ordinal: Option<u32>,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_log_level() -> flowgrid_core::types::LogLevel {
    flowgrid_core::types::LogLevel::Info
}

/// Append a log entry to a run — used by the worker pool to report
/// per-task progress. Entries are append-only.
pub async fn append_run_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AppendLogRequest>,
) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.db().get_run(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_reply(FlowGridError::NotFound(format!("run {id}"))),
        Err(e) => return error_reply(e),
    }
    let entry = flowgrid_engine::LogEntry {
        run_id: id.clone(),
        level: req.level,
        step: req.step,
        ordinal: req.ordinal,
        created_at: Utc::now(),
        data: req.data,
    };
    match orchestrator.db().append_log(&entry) {
        Ok(()) => ok_reply(serde_json::json!({"ok": true})),
        Err(e) => error_reply(e),
    }
}

/// A run's append-only log.
pub async fn run_logs(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.db().logs_for_run(&id) {
        Ok(logs) => ok_reply(serde_json::json!({"ok": true, "logs": logs})),
        Err(e) => error_reply(e),
    }
}

/// Tenant-visible soft delete; advisory stop signal for live runs.
pub async fn archive_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.archive_run(&id) {
        Ok(()) => ok_reply(serde_json::json!({"ok": true, "run_id": id, "archived": true})),
        Err(e) => error_reply(e),
    }
}

/// Privileged cascading purge — the only way to hard-delete a run that
/// has log entries.
pub async fn purge_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiReply {
    let orchestrator = state.orchestrator.lock().await;
    match orchestrator.purge_run(&id) {
        Ok(()) => ok_reply(serde_json::json!({"ok": true, "run_id": id, "purged": true})),
        Err(e) => error_reply(e),
    }
}
