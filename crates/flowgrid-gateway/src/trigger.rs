//! Shared trigger path: gate → create → start → record usage.
//!
//! Used by the manual-trigger route, the inbound webhook route, and the
//! schedule poller in the server binary, so all three enforce the same
//! admission rules.

use chrono::Utc;
use flowgrid_core::error::{FlowGridError, Result};
use flowgrid_core::types::TriggerType;
use flowgrid_engine::{Automation, Run};
use flowgrid_quota::ActionKind;

use crate::server::AppState;

/// Fire one run of an automation through the usage gate.
///
/// Quota denials come back as [`FlowGridError::QuotaExceeded`] carrying the
/// gate's upgrade-facing reason; nothing is created or counted for a denied
/// or failed attempt. Usage is recorded only after the run is dispatched.
pub async fn fire(
    state: &AppState,
    automation: &Automation,
    trigger_type: TriggerType,
    input: serde_json::Value,
) -> Result<Run> {
    let now = Utc::now();

    {
        let gate = state.gate.lock().await;
        let runs = gate.check(&automation.tenant_id, ActionKind::RunAutomation, None, now);
        if !runs.allowed {
            return Err(FlowGridError::QuotaExceeded(
                runs.reason.unwrap_or_else(|| "run limit reached".into()),
            ));
        }
        let tasks = gate.check(&automation.tenant_id, ActionKind::ExecuteTask, None, now);
        if !tasks.allowed {
            return Err(FlowGridError::QuotaExceeded(
                tasks.reason.unwrap_or_else(|| "task limit reached".into()),
            ));
        }
    }

    let orchestrator = state.orchestrator.lock().await;
    let run = orchestrator.create_run(automation, trigger_type, input, now)?;
    let event = orchestrator.start_run(&run.id)?;
    drop(orchestrator);

    let gate = state.gate.lock().await;
    gate.record(&automation.tenant_id, ActionKind::RunAutomation, 1, now)?;
    gate.record(
        &automation.tenant_id,
        ActionKind::ExecuteTask,
        event.ordered_tasks.len() as i64,
        now,
    )?;

    Ok(run)
}
