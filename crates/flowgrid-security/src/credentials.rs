//! Webhook credential store.
//!
//! One secret per webhook endpoint, bound to an automation (or to a tenant
//! for inbound global hooks). SQLite-backed so rotation survives restarts.
//! Secrets are returned exactly once at issue/rotate time; list and read
//! paths are redacted, and nothing here ever logs a secret in cleartext.

use chrono::Utc;
use flowgrid_core::error::{FlowGridError, Result};
use rand::RngCore;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::Path;

/// A freshly issued (or rotated) credential. The only place the secret
/// appears in cleartext.
#[derive(Debug, Clone)]
pub struct WebhookCredential {
    pub webhook_id: String,
    pub tenant_id: String,
    pub automation_id: Option<String>,
    pub secret: String,
}

/// Redacted view for list/read responses.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialInfo {
    pub webhook_id: String,
    pub tenant_id: String,
    pub automation_id: Option<String>,
    pub created_at: String,
    pub rotated_at: Option<String>,
}

/// SQLite-backed store for webhook secrets.
pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    /// Open or create the credential database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| FlowGridError::Database(format!("Credential DB open: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| FlowGridError::Database(format!("Credential DB pragma: {e}")))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS webhook_credentials (
                webhook_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                automation_id TEXT,
                secret TEXT NOT NULL,
                created_at TEXT NOT NULL,
                rotated_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_credentials_tenant
                ON webhook_credentials(tenant_id);
         ",
            )
            .map_err(|e| FlowGridError::Database(format!("Credential migration: {e}")))?;
        Ok(())
    }

    /// Issue a new credential. Returns the cleartext secret — callers show
    /// it to the owner once and must not persist it elsewhere.
    pub fn issue(&self, tenant_id: &str, automation_id: Option<&str>) -> Result<WebhookCredential> {
        let webhook_id = format!("wh_{}", uuid::Uuid::new_v4().simple());
        let secret = generate_secret();
        self.conn
            .execute(
                "INSERT INTO webhook_credentials (webhook_id, tenant_id, automation_id, secret, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![webhook_id, tenant_id, automation_id, secret, Utc::now().to_rfc3339()],
            )
            .map_err(|e| FlowGridError::Database(format!("Issue credential: {e}")))?;
        tracing::info!("🔑 Issued webhook credential {webhook_id} for tenant {tenant_id}");
        Ok(WebhookCredential {
            webhook_id,
            tenant_id: tenant_id.to_string(),
            automation_id: automation_id.map(|s| s.to_string()),
            secret,
        })
    }

    /// Fetch the current secret for signature verification. Internal use
    /// only — never surfaces through the API layer.
    pub fn secret_for(&self, webhook_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT secret FROM webhook_credentials WHERE webhook_id = ?1",
                params![webhook_id],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(FlowGridError::Database(format!("Lookup credential: {other}"))),
            })
    }

    /// The tenant and automation a webhook id belongs to.
    pub fn binding_for(&self, webhook_id: &str) -> Result<Option<(String, Option<String>)>> {
        self.conn
            .query_row(
                "SELECT tenant_id, automation_id FROM webhook_credentials WHERE webhook_id = ?1",
                params![webhook_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(FlowGridError::Database(format!("Lookup credential: {other}"))),
            })
    }

    /// The credential bound to an automation, if any — used to sign
    /// outbound notifications for that automation. Internal use only.
    pub fn credential_for_automation(&self, automation_id: &str) -> Result<Option<(String, String)>> {
        self.conn
            .query_row(
                "SELECT webhook_id, secret FROM webhook_credentials WHERE automation_id = ?1",
                params![automation_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(FlowGridError::Database(format!("Lookup credential: {other}"))),
            })
    }

    /// Rotate a credential. The previous secret is invalid the moment this
    /// returns — in-flight deliveries signed with it must be re-signed.
    pub fn rotate(&self, webhook_id: &str) -> Result<String> {
        let secret = generate_secret();
        let changed = self
            .conn
            .execute(
                "UPDATE webhook_credentials SET secret = ?1, rotated_at = ?2 WHERE webhook_id = ?3",
                params![secret, Utc::now().to_rfc3339(), webhook_id],
            )
            .map_err(|e| FlowGridError::Database(format!("Rotate credential: {e}")))?;
        if changed == 0 {
            return Err(FlowGridError::NotFound(format!("webhook {webhook_id}")));
        }
        tracing::info!("🔄 Rotated webhook credential {webhook_id}");
        Ok(secret)
    }

    /// Delete a credential (e.g. when its automation is archived away).
    pub fn revoke(&self, webhook_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM webhook_credentials WHERE webhook_id = ?1",
                params![webhook_id],
            )
            .map_err(|e| FlowGridError::Database(format!("Revoke credential: {e}")))?;
        Ok(changed > 0)
    }

    /// List a tenant's credentials, secrets redacted.
    pub fn list(&self, tenant_id: &str) -> Result<Vec<CredentialInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT webhook_id, tenant_id, automation_id, created_at, rotated_at
                 FROM webhook_credentials WHERE tenant_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| FlowGridError::Database(format!("List credentials: {e}")))?;
        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok(CredentialInfo {
                    webhook_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    automation_id: row.get(2)?,
                    created_at: row.get(3)?,
                    rotated_at: row.get(4)?,
                })
            })
            .map_err(|e| FlowGridError::Database(format!("List credentials: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// 32 random bytes, hex-encoded, with a recognizable prefix.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature;

    fn temp_store(name: &str) -> (CredentialStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("flowgrid-cred-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let store = CredentialStore::open(&dir.join("creds.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_issue_and_lookup() {
        let (store, dir) = temp_store("issue");
        let cred = store.issue("tenant-1", Some("auto-1")).unwrap();
        assert!(cred.webhook_id.starts_with("wh_"));
        assert!(cred.secret.starts_with("whsec_"));
        assert_eq!(store.secret_for(&cred.webhook_id).unwrap(), Some(cred.secret.clone()));
        assert_eq!(
            store.binding_for(&cred.webhook_id).unwrap(),
            Some(("tenant-1".to_string(), Some("auto-1".to_string())))
        );
        assert_eq!(store.secret_for("wh_missing").unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rotation_invalidates_old_secret() {
        let (store, dir) = temp_store("rotate");
        let cred = store.issue("tenant-1", None).unwrap();

        let sig = signature::sign("payload", &cred.secret, 100);
        assert!(signature::verify("payload", &sig, &cred.secret, 100, 100).is_ok());

        let new_secret = store.rotate(&cred.webhook_id).unwrap();
        assert_ne!(new_secret, cred.secret);

        // A delivery signed with the old secret no longer verifies against
        // what the store now holds.
        let current = store.secret_for(&cred.webhook_id).unwrap().unwrap();
        assert!(signature::verify("payload", &sig, &current, 100, 100).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rotate_unknown_id_errors() {
        let (store, dir) = temp_store("rotate-missing");
        assert!(store.rotate("wh_nope").is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_list_is_redacted() {
        let (store, dir) = temp_store("list");
        let cred = store.issue("tenant-1", None).unwrap();
        store.issue("tenant-2", None).unwrap();

        let listed = store.list("tenant-1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].webhook_id, cred.webhook_id);
        // The redacted view carries no secret field at all; make sure the
        // serialized form doesn't leak one either.
        let json = serde_json::to_string(&listed[0]).unwrap();
        assert!(!json.contains("whsec_"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_revoke() {
        let (store, dir) = temp_store("revoke");
        let cred = store.issue("tenant-1", None).unwrap();
        assert!(store.revoke(&cred.webhook_id).unwrap());
        assert!(!store.revoke(&cred.webhook_id).unwrap());
        assert_eq!(store.secret_for(&cred.webhook_id).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
