use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Mime type the device uses to mark folder records.
pub const DIRECTORY_MIME_TYPE: &str = "application/x.wd.dir";

/// Opaque record key from the metadata store.
///
/// Ordering is numeric when both keys are integers (so `9 < 10`), integers
/// sort before non-numeric keys, and everything else compares lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<i128> {
        self.0.parse().ok()
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// One row of the device's `Files` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: RecordId,
    pub parent_id: Option<RecordId>,
    pub content_id: Option<String>,
    pub name: String,
    pub is_directory: bool,
    pub size: i64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
}

impl FileRecord {
    pub fn file(
        id: impl Into<RecordId>,
        parent_id: Option<RecordId>,
        name: &str,
        content_id: &str,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id,
            content_id: Some(content_id.to_string()),
            name: name.to_string(),
            is_directory: false,
            size: 0,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn directory(id: impl Into<RecordId>, parent_id: Option<RecordId>, name: &str) -> Self {
        Self {
            id: id.into(),
            parent_id,
            content_id: None,
            name: name.to_string(),
            is_directory: true,
            size: 0,
            created_at: None,
            modified_at: None,
        }
    }

    /// Content id when it is present and non-empty.
    pub fn content(&self) -> Option<&str> {
        self.content_id.as_deref().filter(|c| !c.is_empty())
    }
}

/// Record counts used for progress and summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub total_files: u64,
    pub total_directories: u64,
}
