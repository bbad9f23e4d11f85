use rusqlite::{Connection, OpenFlags, Result};
use std::path::Path;
use tracing::debug;

/// Optional columns of the `Files` table. Older exports and test fixtures
/// only carry `id`, `parentID`, `contentID` and `name`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ColumnSet {
    pub mime_type: bool,
    pub size: bool,
    pub created: bool,
    pub modified: bool,
}

/// Read-only handle on the device's metadata database.
pub struct MetadataStore {
    conn: Connection,
    columns: ColumnSet,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection (used by tests with in-memory stores).
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        let columns = detect_columns(&conn)?;
        debug!("Metadata store columns detected: {:?}", columns);
        Ok(Self { conn, columns })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn columns(&self) -> ColumnSet {
        self.columns
    }
}

fn detect_columns(conn: &Connection) -> Result<ColumnSet> {
    let mut stmt = conn.prepare("PRAGMA table_info(Files)")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>>>()?;

    let has = |wanted: &str| names.iter().any(|n| n.eq_ignore_ascii_case(wanted));
    Ok(ColumnSet {
        mime_type: has("mimeType"),
        size: has("size"),
        created: has("cTime"),
        modified: has("mTime"),
    })
}
