//! Outbound notification envelopes.

use chrono::Utc;
use flowgrid_engine::Run;

/// Event name for run-completion notifications.
pub const EVENT_RUN_COMPLETED: &str = "run.completed";

/// Build the JSON envelope subscribers receive when a run reaches a
/// terminal state.
pub fn completion_envelope(run: &Run, automation_title: &str) -> serde_json::Value {
    serde_json::json!({
        "event": EVENT_RUN_COMPLETED,
        "automation_id": run.automation_id,
        "run_id": run.id,
        "tenant_id": run.tenant_id,
        "timestamp": Utc::now().timestamp(),
        "data": {
            "title": automation_title,
            "trigger_type": run.trigger_type.as_str(),
            "status": run.status.as_str(),
            "duration_ms": run.duration_ms,
            "error": run.error_message,
            "output": run.output,
        },
    })
}
