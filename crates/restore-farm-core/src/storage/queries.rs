use super::models::{FileRecord, RecordId, StoreStats, DIRECTORY_MIME_TYPE};
use super::sqlite::MetadataStore;
use rusqlite::types::ValueRef;
use rusqlite::{OptionalExtension, Result, Row};
use tracing::debug;

impl MetadataStore {
    pub fn count_records(&self) -> Result<u64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM Files", [], |row| row.get(0))
    }

    /// Records carrying content (regular files).
    pub fn count_files(&self) -> Result<u64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM Files WHERE contentID IS NOT NULL AND contentID != ''",
            [],
            |row| row.get(0),
        )
    }

    pub fn count_directories(&self) -> Result<u64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM Files WHERE contentID IS NULL OR contentID = ''",
            [],
            |row| row.get(0),
        )
    }

    pub fn store_stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            total_records: self.count_records()?,
            total_files: self.count_files()?,
            total_directories: self.count_directories()?,
        })
    }

    /// Name of the synthetic per-account root folder (`auth0|...`), if the
    /// store has one at the top level.
    pub fn find_account_root(&self) -> Result<Option<(RecordId, String)>> {
        self.connection()
            .query_row(
                "SELECT id, name FROM Files \
                 WHERE name LIKE '%auth%|%' AND (parentID IS NULL OR parentID = '') \
                 ORDER BY id LIMIT 1",
                [],
                |row| Ok((value_to_id(row.get_ref(0)?), row.get::<_, String>(1)?)),
            )
            .optional()
            .map(|found| found.and_then(|(id, name)| id.map(|id| (id, name))))
    }

    /// Stream every record through `f` using a single cursor, so the table is
    /// never held in memory by the reader. Rows without an id are skipped.
    pub fn for_each_record<F, E>(&self, mut f: F) -> std::result::Result<u64, E>
    where
        F: FnMut(FileRecord) -> std::result::Result<(), E>,
        E: From<rusqlite::Error>,
    {
        let columns = self.columns();
        let sql = format!(
            "SELECT id, parentID, contentID, name, {}, {}, {}, {} FROM Files",
            if columns.mime_type { "mimeType" } else { "NULL" },
            if columns.size { "size" } else { "0" },
            if columns.created { "cTime" } else { "NULL" },
            if columns.modified { "mTime" } else { "NULL" },
        );

        let mut stmt = self.connection().prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut count = 0u64;
        let mut skipped = 0u64;

        while let Some(row) = rows.next()? {
            match record_from_row(row)? {
                Some(record) => {
                    f(record)?;
                    count += 1;
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!("Skipped {} rows without an id", skipped);
        }
        Ok(count)
    }
}

fn record_from_row(row: &Row<'_>) -> Result<Option<FileRecord>> {
    let Some(id) = value_to_id(row.get_ref(0)?) else {
        return Ok(None);
    };
    let parent_id = value_to_id(row.get_ref(1)?);
    let content_id = value_to_text(row.get_ref(2)?).filter(|c| !c.is_empty());
    let name = value_to_text(row.get_ref(3)?).unwrap_or_default();
    let mime_type = value_to_text(row.get_ref(4)?);
    let size = value_to_i64(row.get_ref(5)?).unwrap_or(0);

    let is_directory = match mime_type.as_deref() {
        Some(mime) => mime == DIRECTORY_MIME_TYPE,
        None => content_id.is_none(),
    };

    Ok(Some(FileRecord {
        id,
        parent_id,
        content_id,
        name,
        is_directory,
        size,
        created_at: value_to_i64(row.get_ref(6)?),
        modified_at: value_to_i64(row.get_ref(7)?),
    }))
}

/// Ids are INTEGER in some exports and TEXT in others; both are kept as text.
/// NULL and the empty string both mean "no id".
fn value_to_id(value: ValueRef<'_>) -> Option<RecordId> {
    value_to_text(value)
        .filter(|s| !s.is_empty())
        .map(RecordId::new)
}

fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(r) => Some(r.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

fn value_to_i64(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(r) => Some(r as i64),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}
