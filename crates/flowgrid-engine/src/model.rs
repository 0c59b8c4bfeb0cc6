//! Engine data model — automations, runs, tasks, and log entries.

use chrono::{DateTime, Utc};
use flowgrid_core::types::{AutomationStatus, LogLevel, RunStatus, TriggerType};
use flowgrid_schedule::ScheduleSpec;
use serde::{Deserialize, Serialize};

/// How an automation fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// Only fires when the owner asks.
    Manual,
    /// Fires on a schedule.
    Scheduled { schedule: ScheduleSpec },
    /// Fires on an authenticated inbound webhook.
    Webhook,
}

impl TriggerConfig {
    /// Storage tag for the trigger kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerConfig::Manual => "manual",
            TriggerConfig::Scheduled { .. } => "scheduled",
            TriggerConfig::Webhook => "webhook",
        }
    }

    pub fn schedule(&self) -> Option<&ScheduleSpec> {
        match self {
            TriggerConfig::Scheduled { schedule } => Some(schedule),
            _ => None,
        }
    }
}

/// One task definition inside an automation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Position in the template, also the dependency handle.
    pub ordinal: u32,
    pub name: String,
    /// Ordinals that must complete successfully before this task starts.
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Opaque instructions forwarded to the external executor.
    #[serde(default)]
    pub instructions: serde_json::Value,
}

/// A reusable automation template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub trigger: TriggerConfig,
    pub tasks: Vec<TaskTemplate>,
    pub status: AutomationStatus,
    /// When set, a new run is refused while another run of this automation
    /// is still pending or running.
    pub single_concurrency: bool,
    /// Subscriber endpoint notified (signed) when a run completes.
    pub notify_url: Option<String>,
    pub run_count: i64,
    pub error_count: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    /// Create a new draft automation.
    pub fn new(tenant_id: &str, title: &str, trigger: TriggerConfig, tasks: Vec<TaskTemplate>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            title: title.to_string(),
            trigger,
            tasks,
            status: AutomationStatus::Draft,
            single_concurrency: false,
            notify_url: None,
            run_count: 0,
            error_count: 0,
            last_run_at: None,
            last_error: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One node in a run's task graph, copied by value from the template at
/// run-creation time. Template edits never reach in-flight runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTask {
    pub ordinal: u32,
    pub name: String,
    pub depends_on: Vec<u32>,
    pub status: RunStatus,
    pub instructions: serde_json::Value,
    /// Position in the resolved topological order.
    pub position: u32,
}

/// One execution instance of an automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub automation_id: String,
    pub tenant_id: String,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub archived: bool,
}

/// Append-only run log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub run_id: String,
    pub level: LogLevel,
    pub step: String,
    pub ordinal: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_automation_starts_as_draft() {
        let auto = Automation::new("t1", "Daily digest", TriggerConfig::Manual, vec![]);
        assert_eq!(auto.status, AutomationStatus::Draft);
        assert_eq!(auto.run_count, 0);
        assert!(!auto.single_concurrency);
        assert!(auto.next_run_at.is_none());
    }

    #[test]
    fn test_trigger_kind_tags() {
        assert_eq!(TriggerConfig::Manual.kind(), "manual");
        assert_eq!(TriggerConfig::Webhook.kind(), "webhook");
        let scheduled = TriggerConfig::Scheduled {
            schedule: ScheduleSpec::parse("daily@09:00"),
        };
        assert_eq!(scheduled.kind(), "scheduled");
        assert!(scheduled.schedule().is_some());
    }
}
