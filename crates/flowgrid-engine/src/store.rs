//! SQLite-backed persistence for automations, runs, tasks, and run logs.
//!
//! Counter updates (`run_count`, `error_count`) and run state transitions
//! are single guarded statements — never read-then-write from a snapshot —
//! so concurrent completions and admissions cannot race each other past an
//! invariant.

use chrono::{DateTime, Duration, Utc};
use flowgrid_core::error::{FlowGridError, Result};
use flowgrid_core::types::{AutomationStatus, LogLevel, RunStatus, TriggerType};
use flowgrid_schedule::ScheduleSpec;
use rusqlite::{Connection, params};
use std::path::Path;

use crate::model::{Automation, LogEntry, Run, RunTask, TriggerConfig};

/// Engine database handle.
pub struct EngineDb {
    conn: Connection,
}

impl EngineDb {
    /// Open or create the engine database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| FlowGridError::Database(format!("Engine DB open: {e}")))?;

        // WAL allows concurrent readers/writers and prevents "database is
        // locked" errors under the gateway + poller.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| FlowGridError::Database(format!("Engine DB pragma: {e}")))?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            -- Automation templates
            CREATE TABLE IF NOT EXISTS automations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,      -- 'manual', 'scheduled', 'webhook'
                schedule TEXT,                   -- descriptor when scheduled
                tasks TEXT NOT NULL,             -- JSON array of task templates
                status TEXT NOT NULL DEFAULT 'draft',
                single_concurrency INTEGER NOT NULL DEFAULT 0,
                notify_url TEXT,
                run_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                last_error TEXT,
                next_run_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Execution instances
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                automation_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                trigger_type TEXT NOT NULL,
                input TEXT NOT NULL DEFAULT '{}',
                output TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER,
                error_message TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (automation_id) REFERENCES automations(id)
            );
            CREATE INDEX IF NOT EXISTS idx_runs_automation ON runs(automation_id);
            CREATE INDEX IF NOT EXISTS idx_runs_tenant ON runs(tenant_id);

            -- Per-run task graph, copied from the template at creation
            CREATE TABLE IF NOT EXISTS run_tasks (
                run_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                name TEXT NOT NULL,
                depends_on TEXT NOT NULL DEFAULT '[]',   -- JSON array of ordinals
                status TEXT NOT NULL DEFAULT 'pending',
                instructions TEXT NOT NULL DEFAULT '{}',
                position INTEGER NOT NULL,
                PRIMARY KEY (run_id, ordinal),
                FOREIGN KEY (run_id) REFERENCES runs(id)
            );

            -- Append-only run logs
            CREATE TABLE IF NOT EXISTS run_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                level TEXT NOT NULL DEFAULT 'info',
                step TEXT NOT NULL,
                ordinal INTEGER,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_run_logs_run ON run_logs(run_id);
         ",
            )
            .map_err(|e| FlowGridError::Database(format!("Engine migration: {e}")))?;
        Ok(())
    }

    // ─── Automations ──────────────────────────────────────

    /// Insert or update an automation template.
    pub fn save_automation(&self, automation: &Automation) -> Result<()> {
        let tasks_json = serde_json::to_string(&automation.tasks)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO automations
                 (id, tenant_id, title, trigger_kind, schedule, tasks, status, single_concurrency,
                  notify_url, run_count, error_count, last_run_at, last_error, next_run_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    automation.id,
                    automation.tenant_id,
                    automation.title,
                    automation.trigger.kind(),
                    automation.trigger.schedule().map(|s| s.descriptor()),
                    tasks_json,
                    automation.status.as_str(),
                    automation.single_concurrency as i32,
                    automation.notify_url,
                    automation.run_count,
                    automation.error_count,
                    automation.last_run_at.map(|t| t.to_rfc3339()),
                    automation.last_error,
                    automation.next_run_at.map(|t| t.to_rfc3339()),
                    automation.created_at.to_rfc3339(),
                    automation.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| FlowGridError::Database(format!("Save automation: {e}")))?;
        Ok(())
    }

    /// Load one automation.
    pub fn get_automation(&self, id: &str) -> Result<Option<Automation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{AUTOMATION_SELECT} WHERE id = ?1"))
            .map_err(|e| FlowGridError::Database(format!("Get automation: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_automation)
            .map_err(|e| FlowGridError::Database(format!("Get automation: {e}")))?;
        match rows.next() {
            Some(Ok(a)) => Ok(Some(a)),
            Some(Err(e)) => Err(FlowGridError::Database(format!("Get automation: {e}"))),
            None => Ok(None),
        }
    }

    /// List a tenant's automations (archived included — callers filter).
    pub fn list_automations(&self, tenant_id: &str) -> Result<Vec<Automation>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{AUTOMATION_SELECT} WHERE tenant_id = ?1 ORDER BY created_at"
            ))
            .map_err(|e| FlowGridError::Database(format!("List automations: {e}")))?;
        let rows = stmt
            .query_map(params![tenant_id], row_to_automation)
            .map_err(|e| FlowGridError::Database(format!("List automations: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All active schedule-triggered automations (queue rebuild on startup).
    pub fn active_scheduled_automations(&self) -> Result<Vec<Automation>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{AUTOMATION_SELECT} WHERE status = 'active' AND trigger_kind = 'scheduled'"
            ))
            .map_err(|e| FlowGridError::Database(format!("List scheduled: {e}")))?;
        let rows = stmt
            .query_map([], row_to_automation)
            .map_err(|e| FlowGridError::Database(format!("List scheduled: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Update lifecycle status.
    pub fn set_automation_status(&self, id: &str, status: AutomationStatus) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE automations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| FlowGridError::Database(format!("Set automation status: {e}")))?;
        if changed == 0 {
            return Err(FlowGridError::NotFound(format!("automation {id}")));
        }
        Ok(())
    }

    /// Set (or clear) the next scheduled occurrence.
    pub fn set_next_run(&self, id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE automations SET next_run_at = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    next_run_at.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                    id
                ],
            )
            .map_err(|e| FlowGridError::Database(format!("Set next run: {e}")))?;
        Ok(())
    }

    /// Atomically fold one completed run into the automation's stats.
    /// Single statement — two concurrent completions can't lose an
    /// increment.
    pub fn record_run_completion(
        &self,
        id: &str,
        failed: bool,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE automations
                 SET run_count = run_count + 1,
                     error_count = error_count + ?1,
                     last_run_at = ?2,
                     last_error = CASE WHEN ?1 = 1 THEN ?3 ELSE last_error END,
                     updated_at = ?2
                 WHERE id = ?4",
                params![failed as i32, completed_at.to_rfc3339(), error, id],
            )
            .map_err(|e| FlowGridError::Database(format!("Record completion: {e}")))?;
        Ok(())
    }

    // ─── Runs ──────────────────────────────────────

    /// Persist a new run and its copied task graph in one transaction.
    pub fn insert_run(&self, run: &Run, tasks: &[RunTask]) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| FlowGridError::Database(format!("Insert run: {e}")))?;
        let result = self.insert_run_inner(run, tasks);
        if result.is_ok() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| FlowGridError::Database(format!("Insert run: {e}")))?;
        } else {
            self.conn.execute_batch("ROLLBACK").ok();
        }
        result
    }

    fn insert_run_inner(&self, run: &Run, tasks: &[RunTask]) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO runs
                 (id, automation_id, tenant_id, status, trigger_type, input, output,
                  started_at, completed_at, duration_ms, error_message, archived)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    run.id,
                    run.automation_id,
                    run.tenant_id,
                    run.status.as_str(),
                    run.trigger_type.as_str(),
                    run.input.to_string(),
                    run.output.as_ref().map(|v| v.to_string()),
                    run.started_at.to_rfc3339(),
                    run.completed_at.map(|t| t.to_rfc3339()),
                    run.duration_ms,
                    run.error_message,
                    run.archived as i32,
                ],
            )
            .map_err(|e| FlowGridError::Database(format!("Insert run: {e}")))?;
        for task in tasks {
            self.conn
                .execute(
                    "INSERT INTO run_tasks (run_id, ordinal, name, depends_on, status, instructions, position)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        run.id,
                        task.ordinal,
                        task.name,
                        serde_json::to_string(&task.depends_on)?,
                        task.status.as_str(),
                        task.instructions.to_string(),
                        task.position,
                    ],
                )
                .map_err(|e| FlowGridError::Database(format!("Insert run task: {e}")))?;
        }
        Ok(())
    }

    /// Load one run.
    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RUN_SELECT} WHERE id = ?1"))
            .map_err(|e| FlowGridError::Database(format!("Get run: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_run)
            .map_err(|e| FlowGridError::Database(format!("Get run: {e}")))?;
        match rows.next() {
            Some(Ok(r)) => Ok(Some(r)),
            Some(Err(e)) => Err(FlowGridError::Database(format!("Get run: {e}"))),
            None => Ok(None),
        }
    }

    /// Recent runs for a tenant, newest first.
    pub fn list_runs(&self, tenant_id: &str, limit: usize) -> Result<Vec<Run>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{RUN_SELECT} WHERE tenant_id = ?1 ORDER BY started_at DESC LIMIT ?2"
            ))
            .map_err(|e| FlowGridError::Database(format!("List runs: {e}")))?;
        let rows = stmt
            .query_map(params![tenant_id, limit as i64], row_to_run)
            .map_err(|e| FlowGridError::Database(format!("List runs: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The copied task graph of a run, in topological order.
    pub fn tasks_for_run(&self, run_id: &str) -> Result<Vec<RunTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ordinal, name, depends_on, status, instructions, position
                 FROM run_tasks WHERE run_id = ?1 ORDER BY position",
            )
            .map_err(|e| FlowGridError::Database(format!("Run tasks: {e}")))?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let depends_on_str: String = row.get(2)?;
                let status_str: String = row.get(3)?;
                let instructions_str: String = row.get(4)?;
                Ok(RunTask {
                    ordinal: row.get(0)?,
                    name: row.get(1)?,
                    depends_on: serde_json::from_str(&depends_on_str).unwrap_or_default(),
                    status: RunStatus::parse(&status_str).unwrap_or(RunStatus::Pending),
                    instructions: serde_json::from_str(&instructions_str).unwrap_or_default(),
                    position: row.get(5)?,
                })
            })
            .map_err(|e| FlowGridError::Database(format!("Run tasks: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Guarded transition `pending → running`. Returns false when the run
    /// was not pending (already started, finished, or missing).
    pub fn mark_run_running(&self, run_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE runs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
                params![run_id],
            )
            .map_err(|e| FlowGridError::Database(format!("Start run: {e}")))?;
        Ok(changed == 1)
    }

    /// Guarded terminal transition `running → success|failed`. Returns
    /// false when the run was not in `running` — the idempotency guard for
    /// duplicate completion callbacks.
    pub fn mark_run_completed(
        &self,
        run_id: &str,
        status: RunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE runs
                 SET status = ?1, output = ?2, error_message = ?3, completed_at = ?4, duration_ms = ?5
                 WHERE id = ?6 AND status = 'running'",
                params![
                    status.as_str(),
                    output.map(|v| v.to_string()),
                    error,
                    completed_at.to_rfc3339(),
                    duration_ms,
                    run_id
                ],
            )
            .map_err(|e| FlowGridError::Database(format!("Complete run: {e}")))?;
        Ok(changed == 1)
    }

    /// Mark task states in bulk when a run terminates.
    pub fn mark_run_tasks(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE run_tasks SET status = ?1 WHERE run_id = ?2 AND status IN ('pending', 'running')",
                params![status.as_str(), run_id],
            )
            .map_err(|e| FlowGridError::Database(format!("Mark run tasks: {e}")))?;
        Ok(())
    }

    /// Whether the automation has a live (pending or running, not archived)
    /// run — the single-concurrency guard.
    pub fn live_run_exists(&self, automation_id: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM runs
                 WHERE automation_id = ?1 AND archived = 0 AND status IN ('pending', 'running')",
                params![automation_id],
                |row| row.get(0),
            )
            .map_err(|e| FlowGridError::Database(format!("Live run check: {e}")))?;
        Ok(count > 0)
    }

    /// Set the tenant-visible archived flag. Valid in any state; the state
    /// machine itself is untouched.
    pub fn set_run_archived(&self, run_id: &str, archived: bool) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE runs SET archived = ?1 WHERE id = ?2",
                params![archived as i32, run_id],
            )
            .map_err(|e| FlowGridError::Database(format!("Archive run: {e}")))?;
        if changed == 0 {
            return Err(FlowGridError::NotFound(format!("run {run_id}")));
        }
        Ok(())
    }

    /// Hard-delete a run with its tasks and logs. Privileged cascading
    /// purge — ordinary archival never reaches this.
    pub fn purge_run(&self, run_id: &str) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| FlowGridError::Database(format!("Purge run: {e}")))?;
        let result = (|| -> Result<()> {
            self.conn
                .execute("DELETE FROM run_logs WHERE run_id = ?1", params![run_id])
                .map_err(|e| FlowGridError::Database(format!("Purge run logs: {e}")))?;
            self.conn
                .execute("DELETE FROM run_tasks WHERE run_id = ?1", params![run_id])
                .map_err(|e| FlowGridError::Database(format!("Purge run tasks: {e}")))?;
            self.conn
                .execute("DELETE FROM runs WHERE id = ?1", params![run_id])
                .map_err(|e| FlowGridError::Database(format!("Purge run: {e}")))?;
            Ok(())
        })();
        if result.is_ok() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| FlowGridError::Database(format!("Purge run: {e}")))?;
        } else {
            self.conn.execute_batch("ROLLBACK").ok();
        }
        result
    }

    /// Runs stuck in `running` longer than the threshold. An observability
    /// signal — the store never auto-fails them.
    pub fn stale_runs(&self, stale_after: Duration, now: DateTime<Utc>) -> Result<Vec<Run>> {
        let cutoff = (now - stale_after).to_rfc3339();
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{RUN_SELECT} WHERE status = 'running' AND started_at < ?1"
            ))
            .map_err(|e| FlowGridError::Database(format!("Stale runs: {e}")))?;
        let rows = stmt
            .query_map(params![cutoff], row_to_run)
            .map_err(|e| FlowGridError::Database(format!("Stale runs: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Run logs ──────────────────────────────────────

    /// Append a log entry. Entries are never mutated or deleted outside of
    /// a privileged purge.
    pub fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_logs (run_id, level, step, ordinal, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.run_id,
                    entry.level.as_str(),
                    entry.step,
                    entry.ordinal,
                    entry.created_at.to_rfc3339(),
                    entry.data.to_string(),
                ],
            )
            .map_err(|e| FlowGridError::Database(format!("Append log: {e}")))?;
        Ok(())
    }

    /// All log entries for a run, oldest first.
    pub fn logs_for_run(&self, run_id: &str) -> Result<Vec<LogEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, level, step, ordinal, created_at, data
                 FROM run_logs WHERE run_id = ?1 ORDER BY id",
            )
            .map_err(|e| FlowGridError::Database(format!("Run logs: {e}")))?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let level_str: String = row.get(1)?;
                let created_at_str: String = row.get(4)?;
                let data_str: String = row.get(5)?;
                Ok(LogEntry {
                    run_id: row.get(0)?,
                    level: LogLevel::parse(&level_str).unwrap_or(LogLevel::Info),
                    step: row.get(2)?,
                    ordinal: row.get(3)?,
                    created_at: parse_rfc3339(&created_at_str),
                    data: serde_json::from_str(&data_str).unwrap_or_default(),
                })
            })
            .map_err(|e| FlowGridError::Database(format!("Run logs: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Whether a run has any log entries (guards against hard-deleting
    /// evidence without the cascading purge).
    pub fn run_has_logs(&self, run_id: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM run_logs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(|e| FlowGridError::Database(format!("Run logs count: {e}")))?;
        Ok(count > 0)
    }
}

// ─── Row mapping ──────────────────────────────────────

/// Shared SELECT column list for automation queries.
const AUTOMATION_SELECT: &str = "SELECT id, tenant_id, title, trigger_kind, schedule, tasks, status, single_concurrency, notify_url, run_count, error_count, last_run_at, last_error, next_run_at, created_at, updated_at FROM automations";

/// Shared SELECT column list for run queries.
const RUN_SELECT: &str = "SELECT id, automation_id, tenant_id, status, trigger_type, input, output, started_at, completed_at, duration_ms, error_message, archived FROM runs";

fn row_to_automation(row: &rusqlite::Row) -> rusqlite::Result<Automation> {
    let trigger_kind: String = row.get(3)?;
    let schedule: Option<String> = row.get(4)?;
    let tasks_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let last_run_at: Option<String> = row.get(11)?;
    let next_run_at: Option<String> = row.get(13)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    let trigger = match trigger_kind.as_str() {
        "scheduled" => TriggerConfig::Scheduled {
            schedule: ScheduleSpec::parse(schedule.as_deref().unwrap_or("")),
        },
        "webhook" => TriggerConfig::Webhook,
        _ => TriggerConfig::Manual,
    };

    Ok(Automation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        title: row.get(2)?,
        trigger,
        tasks: serde_json::from_str(&tasks_str).unwrap_or_default(),
        status: AutomationStatus::parse(&status_str).unwrap_or(AutomationStatus::Draft),
        single_concurrency: row.get::<_, i32>(7)? != 0,
        notify_url: row.get(8)?,
        run_count: row.get(9)?,
        error_count: row.get(10)?,
        last_run_at: last_run_at.as_deref().map(parse_rfc3339),
        last_error: row.get(12)?,
        next_run_at: next_run_at.as_deref().map(parse_rfc3339),
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
    let status_str: String = row.get(3)?;
    let trigger_str: String = row.get(4)?;
    let input_str: String = row.get(5)?;
    let output_str: Option<String> = row.get(6)?;
    let started_at: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;

    Ok(Run {
        id: row.get(0)?,
        automation_id: row.get(1)?,
        tenant_id: row.get(2)?,
        status: RunStatus::parse(&status_str).unwrap_or(RunStatus::Pending),
        trigger_type: TriggerType::parse(&trigger_str).unwrap_or(TriggerType::Manual),
        input: serde_json::from_str(&input_str).unwrap_or_default(),
        output: output_str.and_then(|s| serde_json::from_str(&s).ok()),
        started_at: parse_rfc3339(&started_at),
        completed_at: completed_at.as_deref().map(parse_rfc3339),
        duration_ms: row.get(9)?,
        error_message: row.get(10)?,
        archived: row.get::<_, i32>(11)? != 0,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
