//! Run orchestration — the pending → running → success|failed state machine.
//!
//! `start_run` returns as soon as the dispatch event is on the outbound
//! channel; completion arrives later (possibly from another thread or
//! process) through `complete_run`. Duplicate completion callbacks are
//! tolerated as warned no-ops, matching the worker pool's at-least-once
//! delivery.

use chrono::{DateTime, Utc};
use flowgrid_core::error::{FlowGridError, Result};
use flowgrid_core::types::{AutomationStatus, LogLevel, RunOutcome, RunStatus, TriggerType};
use flowgrid_schedule::next_run_time;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::graph;
use crate::model::{Automation, LogEntry, Run, RunTask};
use crate::store::EngineDb;

/// The execution request handed to the external worker pool. Delivered
/// at-least-once; consumers must be idempotent per `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub run_id: String,
    pub automation_id: String,
    pub tenant_id: String,
    pub trigger_type: TriggerType,
    /// Tasks in topological order; each still carries its `depends_on`
    /// set so the pool can gate tasks on predecessor success.
    pub ordered_tasks: Vec<RunTask>,
}

/// What the worker pool reports back when a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Orchestrates run lifecycle over the engine store.
pub struct RunOrchestrator {
    db: EngineDb,
    dispatch_tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl RunOrchestrator {
    /// Build an orchestrator and the receiving half of its dispatch channel.
    pub fn new(db: EngineDb) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        (Self { db, dispatch_tx }, dispatch_rx)
    }

    pub fn db(&self) -> &EngineDb {
        &self.db
    }

    // ─── Automation lifecycle ──────────────────────────────────────

    /// Activate an automation. For schedule-triggered automations this also
    /// computes the first `next_run_at`.
    pub fn activate_automation(&self, id: &str, now: DateTime<Utc>) -> Result<Automation> {
        let automation = self.require_automation(id)?;
        if automation.status == AutomationStatus::Archived {
            return Err(FlowGridError::Validation(format!(
                "automation {id} is archived and cannot be activated"
            )));
        }
        self.db.set_automation_status(id, AutomationStatus::Active)?;

        let next = automation
            .trigger
            .schedule()
            .map(|spec| next_run_time(spec, now));
        self.db.set_next_run(id, next)?;

        tracing::info!(
            "▶️ Activated automation '{}' ({id}){}",
            automation.title,
            next.map(|t| format!(" — next run {t}")).unwrap_or_default()
        );
        self.require_automation(id)
    }

    /// Pause an automation; scheduled occurrences stop being due.
    pub fn pause_automation(&self, id: &str) -> Result<Automation> {
        let automation = self.require_automation(id)?;
        if automation.status == AutomationStatus::Archived {
            return Err(FlowGridError::Validation(format!(
                "automation {id} is archived and cannot be paused"
            )));
        }
        self.db.set_automation_status(id, AutomationStatus::Paused)?;
        self.db.set_next_run(id, None)?;
        self.require_automation(id)
    }

    /// Archive an automation (soft delete). Refused while a run is still
    /// live — archive the runs first.
    pub fn archive_automation(&self, id: &str) -> Result<Automation> {
        self.require_automation(id)?;
        if self.db.live_run_exists(id)? {
            return Err(FlowGridError::Validation(format!(
                "automation {id} has a live run; wait for completion before archiving"
            )));
        }
        self.db.set_automation_status(id, AutomationStatus::Archived)?;
        self.db.set_next_run(id, None)?;
        self.require_automation(id)
    }

    // ─── Run lifecycle ──────────────────────────────────────

    /// Materialize a run from the automation template.
    ///
    /// Copies the task graph by value (template edits never reach this run)
    /// and validates it — a cyclic or malformed graph is rejected here and
    /// nothing is persisted. Callers are responsible for the usage-gate
    /// check; this only enforces structural rules.
    pub fn create_run(
        &self,
        automation: &Automation,
        trigger_type: TriggerType,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Run> {
        if automation.status != AutomationStatus::Active {
            return Err(FlowGridError::Validation(format!(
                "automation {} is {} — only active automations can run",
                automation.id,
                automation.status.as_str()
            )));
        }

        if automation.single_concurrency && self.db.live_run_exists(&automation.id)? {
            return Err(FlowGridError::ConcurrencyHeld(format!(
                "automation {} already has a live run",
                automation.id
            )));
        }

        let ordered_tasks = graph::resolve(&automation.tasks)
            .map_err(|e| FlowGridError::Validation(e.to_string()))?;

        let run = Run {
            id: uuid::Uuid::new_v4().to_string(),
            automation_id: automation.id.clone(),
            tenant_id: automation.tenant_id.clone(),
            status: RunStatus::Pending,
            trigger_type,
            input,
            output: None,
            started_at: now,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            archived: false,
        };
        self.db.insert_run(&run, &ordered_tasks)?;
        self.log(
            &run.id,
            LogLevel::Info,
            "run_created",
            None,
            serde_json::json!({
                "trigger_type": trigger_type.as_str(),
                "task_count": ordered_tasks.len(),
            }),
        );
        tracing::info!(
            "🆕 Run {} created for automation '{}' ({} tasks, {} trigger)",
            run.id,
            automation.title,
            ordered_tasks.len(),
            trigger_type.as_str()
        );
        Ok(run)
    }

    /// Move a run `pending → running` and emit exactly one dispatch event.
    /// The sole integration point with the task-executing worker pool.
    pub fn start_run(&self, run_id: &str) -> Result<DispatchEvent> {
        if !self.db.mark_run_running(run_id)? {
            let state = self
                .db
                .get_run(run_id)?
                .map(|r| r.status.as_str().to_string())
                .unwrap_or_else(|| "missing".into());
            return Err(FlowGridError::Engine(format!(
                "run {run_id} cannot start from state '{state}'"
            )));
        }

        let run = self.require_run(run_id)?;
        let event = DispatchEvent {
            run_id: run.id.clone(),
            automation_id: run.automation_id.clone(),
            tenant_id: run.tenant_id.clone(),
            trigger_type: run.trigger_type,
            ordered_tasks: self.db.tasks_for_run(run_id)?,
        };
        self.dispatch_tx
            .send(event.clone())
            .map_err(|_| FlowGridError::Engine("dispatch channel closed".into()))?;

        self.log(
            run_id,
            LogLevel::Info,
            "dispatched",
            None,
            serde_json::json!({"task_count": event.ordered_tasks.len()}),
        );
        tracing::debug!("📤 Run {run_id} dispatched to worker pool");
        Ok(event)
    }

    /// Apply a completion callback from the worker pool.
    ///
    /// Returns the terminal run on the first (effective) completion, `None`
    /// on a duplicate. Duplicates are warned, never errored — the pool
    /// delivers at-least-once.
    pub fn complete_run(
        &self,
        report: &CompletionReport,
        now: DateTime<Utc>,
    ) -> Result<Option<Run>> {
        let Some(run) = self.db.get_run(&report.run_id)? else {
            return Err(FlowGridError::NotFound(format!("run {}", report.run_id)));
        };

        if run.status.is_terminal() {
            tracing::warn!(
                "🔁 Duplicate completion callback for run {} (already {}) — ignoring",
                run.id,
                run.status.as_str()
            );
            return Ok(None);
        }

        let status = match report.outcome {
            RunOutcome::Success => RunStatus::Success,
            RunOutcome::Failed => RunStatus::Failed,
        };
        let duration_ms = (now - run.started_at).num_milliseconds().max(0);

        // Guarded single-statement transition; a concurrent duplicate loses
        // the race here and changes nothing.
        let transitioned = self.db.mark_run_completed(
            &run.id,
            status,
            report.output.as_ref(),
            report.error.as_deref(),
            now,
            duration_ms,
        )?;
        if !transitioned {
            tracing::warn!(
                "🔁 Run {} left 'running' while this callback was in flight — ignoring",
                run.id
            );
            return Ok(None);
        }

        self.db.mark_run_tasks(&run.id, status)?;
        let failed = status == RunStatus::Failed;
        self.db
            .record_run_completion(&run.automation_id, failed, report.error.as_deref(), now)?;

        self.log(
            &run.id,
            if failed { LogLevel::Error } else { LogLevel::Info },
            if failed { "run_failed" } else { "run_succeeded" },
            None,
            serde_json::json!({
                "duration_ms": duration_ms,
                "error": report.error,
            }),
        );

        // Schedule-triggered automations get their next occurrence computed
        // off the completion instant.
        if let Some(automation) = self.db.get_automation(&run.automation_id)?
            && automation.status == AutomationStatus::Active
            && let Some(spec) = automation.trigger.schedule()
        {
            let next = next_run_time(spec, now);
            self.db.set_next_run(&automation.id, Some(next))?;
            tracing::debug!("⏭ Automation {} next run at {next}", automation.id);
        }

        tracing::info!(
            "{} Run {} completed as {} in {}ms",
            if failed { "❌" } else { "✅" },
            run.id,
            status.as_str(),
            duration_ms
        );
        self.require_run(&run.id).map(Some)
    }

    /// Tenant-visible soft delete. Advisory to the worker pool for live
    /// runs — a "please stop", not a kill.
    pub fn archive_run(&self, run_id: &str) -> Result<()> {
        self.db.set_run_archived(run_id, true)?;
        tracing::debug!("🗄 Run {run_id} archived");
        Ok(())
    }

    /// Privileged cascading purge. A run with log entries cannot be
    /// hard-deleted any other way.
    pub fn purge_run(&self, run_id: &str) -> Result<()> {
        self.require_run(run_id)?;
        self.db.purge_run(run_id)?;
        tracing::warn!("🧹 Run {run_id} purged with its tasks and logs");
        Ok(())
    }

    /// Runs stuck in `running` past the threshold — surfaced, not auto-failed.
    pub fn stale_runs(&self, stale_after: chrono::Duration, now: DateTime<Utc>) -> Result<Vec<Run>> {
        self.db.stale_runs(stale_after, now)
    }

    // ─── Helpers ──────────────────────────────────────

    fn require_automation(&self, id: &str) -> Result<Automation> {
        self.db
            .get_automation(id)?
            .ok_or_else(|| FlowGridError::NotFound(format!("automation {id}")))
    }

    fn require_run(&self, id: &str) -> Result<Run> {
        self.db
            .get_run(id)?
            .ok_or_else(|| FlowGridError::NotFound(format!("run {id}")))
    }

    /// Best-effort log append; a logging failure never fails the operation.
    fn log(
        &self,
        run_id: &str,
        level: LogLevel,
        step: &str,
        ordinal: Option<u32>,
        data: serde_json::Value,
    ) {
        let entry = LogEntry {
            run_id: run_id.to_string(),
            level,
            step: step.to_string(),
            ordinal,
            created_at: Utc::now(),
            data,
        };
        if let Err(e) = self.db.append_log(&entry) {
            tracing::warn!("⚠️ Failed to append run log for {run_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskTemplate, TriggerConfig};
    use flowgrid_schedule::ScheduleSpec;

    fn setup(name: &str) -> (RunOrchestrator, mpsc::UnboundedReceiver<DispatchEvent>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("flowgrid-orch-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = EngineDb::open(&dir.join("engine.db")).unwrap();
        let (orch, rx) = RunOrchestrator::new(db);
        (orch, rx, dir)
    }

    fn chain_tasks() -> Vec<TaskTemplate> {
        vec![
            TaskTemplate {
                ordinal: 0,
                name: "fetch".into(),
                depends_on: vec![],
                instructions: serde_json::json!({}),
            },
            TaskTemplate {
                ordinal: 1,
                name: "send".into(),
                depends_on: vec![0],
                instructions: serde_json::json!({}),
            },
        ]
    }

    fn active_automation(orch: &RunOrchestrator, trigger: TriggerConfig) -> Automation {
        let auto = Automation::new("tenant-1", "Test automation", trigger, chain_tasks());
        orch.db().save_automation(&auto).unwrap();
        orch.activate_automation(&auto.id, Utc::now()).unwrap()
    }

    #[test]
    fn test_create_start_complete_success() {
        let (orch, mut rx, dir) = setup("happy");
        let auto = active_automation(&orch, TriggerConfig::Manual);

        let started = Utc::now();
        let run = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({"k": 1}), started)
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        let event = orch.start_run(&run.id).unwrap();
        assert_eq!(event.ordered_tasks.len(), 2);
        assert_eq!(event.ordered_tasks[0].name, "fetch");
        // Exactly one event on the channel.
        assert_eq!(rx.try_recv().unwrap().run_id, run.id);
        assert!(rx.try_recv().is_err());

        let report = CompletionReport {
            run_id: run.id.clone(),
            outcome: RunOutcome::Success,
            output: Some(serde_json::json!({"sent": true})),
            error: None,
        };
        let completed_at = started + chrono::Duration::seconds(2);
        let completed = orch.complete_run(&report, completed_at).unwrap().unwrap();
        assert_eq!(completed.status, RunStatus::Success);
        assert_eq!(completed.duration_ms, Some(2000));
        assert!(completed.completed_at.is_some());

        let auto = orch.db().get_automation(&auto.id).unwrap().unwrap();
        assert_eq!(auto.run_count, 1);
        assert_eq!(auto.error_count, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let (orch, _rx, dir) = setup("dup");
        let auto = active_automation(&orch, TriggerConfig::Manual);

        let run = orch
            .create_run(&auto, TriggerType::Api, serde_json::json!({}), Utc::now())
            .unwrap();
        orch.start_run(&run.id).unwrap();

        let report = CompletionReport {
            run_id: run.id.clone(),
            outcome: RunOutcome::Failed,
            output: None,
            error: Some("executor crashed".into()),
        };
        let now = Utc::now();
        assert!(orch.complete_run(&report, now).unwrap().is_some());
        // At-least-once delivery: three more callbacks, all ignored.
        for _ in 0..3 {
            assert!(orch.complete_run(&report, now).unwrap().is_none());
        }

        let auto = orch.db().get_automation(&auto.id).unwrap().unwrap();
        assert_eq!(auto.run_count, 1, "counters bump exactly once");
        assert_eq!(auto.error_count, 1);
        assert_eq!(auto.last_error.as_deref(), Some("executor crashed"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cyclic_template_rejected_before_persist() {
        let (orch, _rx, dir) = setup("cycle");
        let mut auto = Automation::new(
            "tenant-1",
            "Cyclic",
            TriggerConfig::Manual,
            vec![
                TaskTemplate {
                    ordinal: 0,
                    name: "a".into(),
                    depends_on: vec![1],
                    instructions: serde_json::json!({}),
                },
                TaskTemplate {
                    ordinal: 1,
                    name: "b".into(),
                    depends_on: vec![0],
                    instructions: serde_json::json!({}),
                },
            ],
        );
        auto.status = AutomationStatus::Active;
        orch.db().save_automation(&auto).unwrap();

        let err = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap_err();
        assert!(matches!(err, FlowGridError::Validation(_)));
        // Nothing persisted.
        assert!(orch.db().list_runs("tenant-1", 10).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_inactive_automation_cannot_run() {
        let (orch, _rx, dir) = setup("inactive");
        let auto = Automation::new("tenant-1", "Draft", TriggerConfig::Manual, chain_tasks());
        orch.db().save_automation(&auto).unwrap();

        let err = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap_err();
        assert!(matches!(err, FlowGridError::Validation(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_single_concurrency_holds_second_run() {
        let (orch, _rx, dir) = setup("concurrency");
        let mut auto = active_automation(&orch, TriggerConfig::Manual);
        auto.single_concurrency = true;
        orch.db().save_automation(&auto).unwrap();

        let first = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();
        let err = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap_err();
        assert!(matches!(err, FlowGridError::ConcurrencyHeld(_)));

        // After completion the hold clears.
        orch.start_run(&first.id).unwrap();
        orch.complete_run(
            &CompletionReport {
                run_id: first.id.clone(),
                outcome: RunOutcome::Success,
                output: None,
                error: None,
            },
            Utc::now(),
        )
        .unwrap();
        assert!(
            orch.create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
                .is_ok()
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_concurrent_runs_allowed_by_default() {
        let (orch, _rx, dir) = setup("parallel");
        let auto = active_automation(&orch, TriggerConfig::Manual);
        let a = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();
        let b = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();
        assert_ne!(a.id, b.id);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_scheduled_completion_sets_next_run() {
        let (orch, _rx, dir) = setup("resched");
        let auto = active_automation(
            &orch,
            TriggerConfig::Scheduled {
                schedule: ScheduleSpec::parse("every@6h"),
            },
        );
        assert!(auto.next_run_at.is_some());

        let run = orch
            .create_run(&auto, TriggerType::Scheduled, serde_json::json!({}), Utc::now())
            .unwrap();
        orch.start_run(&run.id).unwrap();
        let completed_at = Utc::now();
        orch.complete_run(
            &CompletionReport {
                run_id: run.id.clone(),
                outcome: RunOutcome::Success,
                output: None,
                error: None,
            },
            completed_at,
        )
        .unwrap();

        let auto = orch.db().get_automation(&auto.id).unwrap().unwrap();
        let next = auto.next_run_at.unwrap();
        assert!(next > completed_at);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_start_requires_pending() {
        let (orch, _rx, dir) = setup("start-guard");
        let auto = active_automation(&orch, TriggerConfig::Manual);
        let run = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();
        orch.start_run(&run.id).unwrap();
        assert!(orch.start_run(&run.id).is_err(), "double start refused");
        assert!(orch.start_run("missing").is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_archive_automation_refused_with_live_run() {
        let (orch, _rx, dir) = setup("arch-live");
        let auto = active_automation(&orch, TriggerConfig::Manual);
        let run = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();

        assert!(orch.archive_automation(&auto.id).is_err());

        orch.start_run(&run.id).unwrap();
        orch.complete_run(
            &CompletionReport {
                run_id: run.id.clone(),
                outcome: RunOutcome::Success,
                output: None,
                error: None,
            },
            Utc::now(),
        )
        .unwrap();
        let archived = orch.archive_automation(&auto.id).unwrap();
        assert_eq!(archived.status, AutomationStatus::Archived);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_archive_run_any_state_counters_untouched() {
        let (orch, _rx, dir) = setup("arch-run");
        let auto = active_automation(&orch, TriggerConfig::Manual);
        let run = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();

        orch.archive_run(&run.id).unwrap();
        let archived = orch.db().get_run(&run.id).unwrap().unwrap();
        assert!(archived.archived);
        assert_eq!(archived.status, RunStatus::Pending, "state machine untouched");

        let auto = orch.db().get_automation(&auto.id).unwrap().unwrap();
        assert_eq!(auto.run_count, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_run_logs_written_through_lifecycle() {
        let (orch, _rx, dir) = setup("logs");
        let auto = active_automation(&orch, TriggerConfig::Manual);
        let run = orch
            .create_run(&auto, TriggerType::Manual, serde_json::json!({}), Utc::now())
            .unwrap();
        orch.start_run(&run.id).unwrap();
        orch.complete_run(
            &CompletionReport {
                run_id: run.id.clone(),
                outcome: RunOutcome::Failed,
                output: None,
                error: Some("task 1 failed".into()),
            },
            Utc::now(),
        )
        .unwrap();

        let logs = orch.db().logs_for_run(&run.id).unwrap();
        let steps: Vec<&str> = logs.iter().map(|l| l.step.as_str()).collect();
        assert_eq!(steps, vec!["run_created", "dispatched", "run_failed"]);
        assert_eq!(logs[2].level, LogLevel::Error);
        std::fs::remove_dir_all(&dir).ok();
    }
}
