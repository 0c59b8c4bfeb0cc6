//! SQLite-backed usage counters and tenant plan assignments.
//!
//! Increments are single-statement upserts, so two concurrent admissions
//! can never both read a stale count and write past a hard limit.

use chrono::{DateTime, Utc};
use flowgrid_core::error::{FlowGridError, Result};
use rusqlite::{Connection, params};
use std::path::Path;

/// Period bucket for counters with no expiry (automation totals).
pub const TOTAL_PERIOD: &str = "total";

/// Daily period key, e.g. `2026-08-06`.
pub fn daily_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Monthly period key, e.g. `2026-08`.
pub fn monthly_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Usage counter + tenant plan store.
pub struct UsageDb {
    conn: Connection,
}

impl UsageDb {
    /// Open or create the usage database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| FlowGridError::Database(format!("Usage DB open: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| FlowGridError::Database(format!("Usage DB pragma: {e}")))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS tenant_plans (
                tenant_id TEXT PRIMARY KEY,
                plan TEXT NOT NULL DEFAULT 'free',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS usage_counters (
                tenant_id TEXT NOT NULL,
                period_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, period_key, kind)
            );
         ",
            )
            .map_err(|e| FlowGridError::Database(format!("Usage migration: {e}")))?;
        Ok(())
    }

    // ─── Tenant plans ──────────────────────────────────────

    /// Assign a plan tier to a tenant.
    pub fn set_plan(&self, tenant_id: &str, plan: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tenant_plans (tenant_id, plan, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id) DO UPDATE SET plan = excluded.plan, updated_at = excluded.updated_at",
                params![tenant_id, plan, Utc::now().to_rfc3339()],
            )
            .map_err(|e| FlowGridError::Database(format!("Set plan: {e}")))?;
        Ok(())
    }

    /// The tenant's plan tier, if one was ever assigned.
    pub fn plan_for(&self, tenant_id: &str) -> Option<String> {
        self.conn
            .query_row(
                "SELECT plan FROM tenant_plans WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get::<_, String>(0),
            )
            .ok()
    }

    // ─── Counters ──────────────────────────────────────

    /// Current count for a tenant/period/kind. Missing rows read as 0.
    pub fn count(&self, tenant_id: &str, period_key: &str, kind: &str) -> i64 {
        self.conn
            .query_row(
                "SELECT count FROM usage_counters WHERE tenant_id = ?1 AND period_key = ?2 AND kind = ?3",
                params![tenant_id, period_key, kind],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0)
    }

    /// Atomically add `amount` to a counter. Single statement — safe under
    /// concurrent admissions.
    pub fn increment(&self, tenant_id: &str, period_key: &str, kind: &str, amount: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO usage_counters (tenant_id, period_key, kind, count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, period_key, kind)
                 DO UPDATE SET count = count + excluded.count, updated_at = excluded.updated_at",
                params![tenant_id, period_key, kind, amount, Utc::now().to_rfc3339()],
            )
            .map_err(|e| FlowGridError::Database(format!("Increment counter: {e}")))?;
        Ok(())
    }

    /// Atomically subtract `amount`, clamped at zero (used when an
    /// automation is archived and releases its slot).
    pub fn decrement(&self, tenant_id: &str, period_key: &str, kind: &str, amount: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE usage_counters
                 SET count = MAX(count - ?4, 0), updated_at = ?5
                 WHERE tenant_id = ?1 AND period_key = ?2 AND kind = ?3",
                params![tenant_id, period_key, kind, amount, Utc::now().to_rfc3339()],
            )
            .map_err(|e| FlowGridError::Database(format!("Decrement counter: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_db(name: &str) -> (UsageDb, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("flowgrid-usage-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = UsageDb::open(&dir.join("usage.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_increment_and_count() {
        let (db, dir) = temp_db("inc");
        assert_eq!(db.count("t1", "2026-08-06", "actions"), 0);
        db.increment("t1", "2026-08-06", "actions", 1).unwrap();
        db.increment("t1", "2026-08-06", "actions", 2).unwrap();
        assert_eq!(db.count("t1", "2026-08-06", "actions"), 3);
        // Other tenants and periods are independent.
        assert_eq!(db.count("t2", "2026-08-06", "actions"), 0);
        assert_eq!(db.count("t1", "2026-08-07", "actions"), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_decrement_clamps_at_zero() {
        let (db, dir) = temp_db("dec");
        db.increment("t1", TOTAL_PERIOD, "automations", 2).unwrap();
        db.decrement("t1", TOTAL_PERIOD, "automations", 5).unwrap();
        assert_eq!(db.count("t1", TOTAL_PERIOD, "automations"), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_plan_assignment() {
        let (db, dir) = temp_db("plan");
        assert_eq!(db.plan_for("t1"), None);
        db.set_plan("t1", "pro").unwrap();
        assert_eq!(db.plan_for("t1"), Some("pro".to_string()));
        db.set_plan("t1", "enterprise").unwrap();
        assert_eq!(db.plan_for("t1"), Some("enterprise".to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_period_keys() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 13, 0, 0).unwrap();
        assert_eq!(daily_key(now), "2026-08-06");
        assert_eq!(monthly_key(now), "2026-08");
    }
}
