use rusqlite::{params, Connection, Result};
use std::path::Path;
use tracing::debug;

/// One attempted deletion. `result` stays `None` until the filesystem call
/// returns, so rows left `None` after a crash mark interrupted attempts.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub scope_root: String,
    pub relative_path: String,
    pub entry_kind: String,
    pub matched_rule: Option<String>,
    pub attempted_at: String,
    pub completed_at: Option<String>,
    pub result: Option<String>,
}

/// Append-only record of cleanup deletions, kept apart from the device's
/// metadata store (which is only ever opened read-only).
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let log = AuditLog { conn };
        log.configure_pragmas()?;
        log.migrate_schema()?;
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let log = AuditLog { conn };
        log.configure_pragmas()?;
        log.migrate_schema()?;
        Ok(log)
    }

    fn configure_pragmas(&self) -> Result<()> {
        // FULL sync: an attempt row must be durable before the delete it describes.
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("Audit log pragmas configured (WAL mode, full sync)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<()> {
        self.conn.execute_batch(include_str!("audit_schema.sql"))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn record_attempt(
        &self,
        scope_root: &str,
        relative_path: &str,
        entry_kind: &str,
        matched_rule: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO cleanup_audit (scope_root, relative_path, entry_kind, matched_rule, attempted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![scope_root, relative_path, entry_kind, matched_rule, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_outcome(&self, entry_id: i64, result: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE cleanup_audit SET completed_at = ?1, result = ?2 WHERE id = ?3",
            params![now, result, entry_id],
        )?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        self.query_entries("SELECT id, scope_root, relative_path, entry_kind, matched_rule, \
                            attempted_at, completed_at, result FROM cleanup_audit ORDER BY id")
    }

    /// Attempts that never recorded an outcome.
    pub fn incomplete(&self) -> Result<Vec<AuditEntry>> {
        self.query_entries("SELECT id, scope_root, relative_path, entry_kind, matched_rule, \
                            attempted_at, completed_at, result FROM cleanup_audit \
                            WHERE result IS NULL ORDER BY id")
    }

    fn query_entries(&self, sql: &str) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    scope_root: row.get(1)?,
                    relative_path: row.get(2)?,
                    entry_kind: row.get(3)?,
                    matched_rule: row.get(4)?,
                    attempted_at: row.get(5)?,
                    completed_at: row.get(6)?,
                    result: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }
}
