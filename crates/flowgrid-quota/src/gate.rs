//! The usage gate — admission check before any dispatch.
//!
//! `check` is read-only and safe to call at arbitrary frequency; it never
//! errors the caller path. Incrementing is a separate, explicit `record`
//! performed only after the gated action actually happened.

use chrono::{DateTime, Utc};
use flowgrid_core::config::{QuotaConfig, TierLimits};
use flowgrid_core::error::Result;
use serde::Serialize;

use crate::counters::{TOTAL_PERIOD, UsageDb, daily_key, monthly_key};

/// What kind of consumption is being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// One automation run (daily counter).
    RunAutomation,
    /// One task execution within a run (daily counter).
    ExecuteTask,
    /// One more automation template (non-expiring total).
    CreateAutomation,
    /// Token consumption (monthly counter, projected total check).
    ConsumeTokens,
}

impl ActionKind {
    /// Counter name in the usage store.
    pub fn counter(&self) -> &'static str {
        match self {
            ActionKind::RunAutomation => "actions",
            ActionKind::ExecuteTask => "tasks",
            ActionKind::CreateAutomation => "automations",
            ActionKind::ConsumeTokens => "tokens",
        }
    }

    fn period_key(&self, now: DateTime<Utc>) -> String {
        match self {
            ActionKind::RunAutomation | ActionKind::ExecuteTask => daily_key(now),
            ActionKind::CreateAutomation => TOTAL_PERIOD.to_string(),
            ActionKind::ConsumeTokens => monthly_key(now),
        }
    }

    fn limit(&self, limits: &TierLimits) -> i64 {
        match self {
            ActionKind::RunAutomation => limits.actions_per_day,
            ActionKind::ExecuteTask => limits.tasks_per_day,
            ActionKind::CreateAutomation => limits.automations_total,
            ActionKind::ConsumeTokens => limits.tokens_per_month,
        }
    }

    fn denial_reason(&self, current: i64, limit: i64) -> String {
        match self {
            ActionKind::RunAutomation => {
                format!("daily run limit reached ({current}/{limit}) — upgrade your plan to run more automations")
            }
            ActionKind::ExecuteTask => {
                format!("daily task limit reached ({current}/{limit}) — upgrade your plan for larger runs")
            }
            ActionKind::CreateAutomation => {
                format!("automation limit reached ({current}/{limit}) — upgrade your plan to add more automations")
            }
            ActionKind::ConsumeTokens => {
                format!("monthly token budget would be exceeded ({current}/{limit}) — upgrade your plan for a larger budget")
            }
        }
    }
}

/// Structured admission result. Denial is data, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub limit: i64,
    pub current: i64,
}

impl GateDecision {
    fn allowed(limit: i64, current: i64) -> Self {
        Self { allowed: true, reason: None, limit, current }
    }

    fn denied(kind: ActionKind, limit: i64, current: i64) -> Self {
        Self {
            allowed: false,
            reason: Some(kind.denial_reason(current, limit)),
            limit,
            current,
        }
    }
}

/// Plan-tier admission gate over the usage store.
pub struct UsageGate {
    db: UsageDb,
    quota: QuotaConfig,
}

impl UsageGate {
    pub fn new(db: UsageDb, quota: QuotaConfig) -> Self {
        Self { db, quota }
    }

    pub fn usage_db(&self) -> &UsageDb {
        &self.db
    }

    /// Read-only admission check.
    ///
    /// Count-shaped kinds admit strictly below the limit (current 9 of 10
    /// passes, current 10 is denied). Token checks compare the *projected*
    /// total `current + proposed_token_delta`, so an over-budget request is
    /// denied before any tokens are consumed. A `-1` limit always admits.
    pub fn check(
        &self,
        tenant_id: &str,
        kind: ActionKind,
        proposed_token_delta: Option<i64>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let plan = self
            .db
            .plan_for(tenant_id)
            .unwrap_or_else(|| self.quota.default_tier.clone());
        let limits = self.quota.limits_for(&plan);
        let limit = kind.limit(&limits);

        let current = self.db.count(tenant_id, &kind.period_key(now), kind.counter());

        if limit == TierLimits::UNLIMITED {
            return GateDecision::allowed(limit, current);
        }

        let admitted = match kind {
            ActionKind::ConsumeTokens => current + proposed_token_delta.unwrap_or(0) <= limit,
            _ => current < limit,
        };

        if admitted {
            GateDecision::allowed(limit, current)
        } else {
            tracing::debug!(
                "🚧 Quota denied for tenant {tenant_id}: {} at {current}/{limit}",
                kind.counter()
            );
            GateDecision::denied(kind, limit, current)
        }
    }

    /// Record consumption after the gated action completed. Separate from
    /// `check` so denied or failed attempts never burn quota.
    pub fn record(
        &self,
        tenant_id: &str,
        kind: ActionKind,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .increment(tenant_id, &kind.period_key(now), kind.counter(), amount)
    }

    /// Release previously recorded consumption (archived automations free
    /// their slot in the non-expiring total).
    pub fn release(
        &self,
        tenant_id: &str,
        kind: ActionKind,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .decrement(tenant_id, &kind.period_key(now), kind.counter(), amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flowgrid_core::config::QuotaConfig;

    fn gate(name: &str) -> (UsageGate, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("flowgrid-gate-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = UsageDb::open(&dir.join("usage.db")).unwrap();
        (UsageGate::new(db, QuotaConfig::default()), dir)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_admits_below_limit_denies_at_limit() {
        let (gate, dir) = gate("boundary");
        // free tier: 25 actions/day
        for _ in 0..24 {
            gate.record("t1", ActionKind::RunAutomation, 1, now()).unwrap();
        }
        let decision = gate.check("t1", ActionKind::RunAutomation, None, now());
        assert!(decision.allowed, "current 24 of 25 must be admitted");
        assert_eq!(decision.current, 24);

        gate.record("t1", ActionKind::RunAutomation, 1, now()).unwrap();
        let decision = gate.check("t1", ActionKind::RunAutomation, None, now());
        assert!(!decision.allowed, "current 25 of 25 must be denied");
        assert_eq!(decision.current, 25);
        assert_eq!(decision.limit, 25);
        assert!(decision.reason.unwrap().contains("upgrade"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unlimited_always_admits() {
        let (gate, dir) = gate("unlimited");
        gate.usage_db().set_plan("t1", "enterprise").unwrap();
        for _ in 0..1000 {
            gate.record("t1", ActionKind::RunAutomation, 1, now()).unwrap();
        }
        let decision = gate.check("t1", ActionKind::RunAutomation, None, now());
        assert!(decision.allowed);
        assert_eq!(decision.limit, TierLimits::UNLIMITED);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_token_check_uses_projected_total() {
        let (gate, dir) = gate("tokens");
        // free tier: 50_000 tokens/month
        gate.record("t1", ActionKind::ConsumeTokens, 49_000, now()).unwrap();

        let fits = gate.check("t1", ActionKind::ConsumeTokens, Some(1_000), now());
        assert!(fits.allowed, "49k + 1k = exactly the 50k budget");

        let overshoots = gate.check("t1", ActionKind::ConsumeTokens, Some(1_001), now());
        assert!(!overshoots.allowed, "projected 50_001 must be denied before consuming");
        assert_eq!(overshoots.current, 49_000);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_period_rollover_resets_window() {
        let (gate, dir) = gate("rollover");
        for _ in 0..25 {
            gate.record("t1", ActionKind::RunAutomation, 1, now()).unwrap();
        }
        assert!(!gate.check("t1", ActionKind::RunAutomation, None, now()).allowed);

        // Next day, same tenant: the derived period key changes, no reset
        // job needed.
        let tomorrow = Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 1).unwrap();
        let decision = gate.check("t1", ActionKind::RunAutomation, None, tomorrow);
        assert!(decision.allowed);
        assert_eq!(decision.current, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_automation_total_releases_on_archive() {
        let (gate, dir) = gate("release");
        // free tier: 3 automations total
        for _ in 0..3 {
            gate.record("t1", ActionKind::CreateAutomation, 1, now()).unwrap();
        }
        assert!(!gate.check("t1", ActionKind::CreateAutomation, None, now()).allowed);

        gate.release("t1", ActionKind::CreateAutomation, 1, now()).unwrap();
        assert!(gate.check("t1", ActionKind::CreateAutomation, None, now()).allowed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_check_has_no_side_effects() {
        let (gate, dir) = gate("readonly");
        for _ in 0..100 {
            let d = gate.check("t1", ActionKind::RunAutomation, None, now());
            assert!(d.allowed);
            assert_eq!(d.current, 0, "check must never consume quota");
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
