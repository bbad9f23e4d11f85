use serde::Serialize;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// What a real run would do (or did) for one farm path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    ToCreate,
    ToReplace,
    AlreadyCorrect,
    Created,
    Replaced,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    PermissionDenied,
    SourceMissing,
    TooManyOpenFiles,
    StorageFull,
    ReadOnly,
    /// Something that is not a symlink already sits at the farm path.
    Occupied,
    TimedOut,
    Cancelled,
    Other,
}

impl FailureKind {
    /// Conditions that will fail every remaining entry as well.
    pub fn is_fatal(self) -> bool {
        matches!(self, FailureKind::StorageFull | FailureKind::ReadOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FarmFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FarmFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_io(err: &io::Error, context: &Path) -> Self {
        Self::new(classify_io_error(err), format!("{}: {}", context.display(), err))
    }
}

// errno values shared by Linux and the BSDs.
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

pub fn classify_io_error(err: &io::Error) -> FailureKind {
    match err.kind() {
        ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
        ErrorKind::StorageFull => FailureKind::StorageFull,
        ErrorKind::ReadOnlyFilesystem => FailureKind::ReadOnly,
        ErrorKind::TimedOut => FailureKind::TimedOut,
        ErrorKind::Interrupted => FailureKind::Cancelled,
        _ if matches!(err.raw_os_error(), Some(ENFILE) | Some(EMFILE)) => {
            FailureKind::TooManyOpenFiles
        }
        _ => FailureKind::Other,
    }
}

/// Current state of a farm path relative to the link it should hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Missing,
    Correct,
    PointsElsewhere(PathBuf),
    Occupied,
}

pub fn inspect_link(link_path: &Path, target: &Path) -> io::Result<LinkState> {
    let metadata = match fs::symlink_metadata(link_path) {
        Ok(m) => m,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LinkState::Missing),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_symlink() {
        return Ok(LinkState::Occupied);
    }
    let current = fs::read_link(link_path)?;
    if current == target {
        Ok(LinkState::Correct)
    } else {
        Ok(LinkState::PointsElsewhere(current))
    }
}

/// Content-addressed location of a blob: `source/<first char>/<content id>`,
/// falling back to the flat layout `source/<content id>` some exports use.
pub fn locate_source(source_root: &Path, content_id: &str) -> Option<PathBuf> {
    let bucketed = bucketed_target(source_root, content_id);
    if bucketed.exists() {
        return Some(bucketed);
    }
    let flat = source_root.join(content_id);
    flat.exists().then_some(flat)
}

pub fn bucketed_target(source_root: &Path, content_id: &str) -> PathBuf {
    let bucket: String = content_id.chars().take(1).collect();
    source_root.join(bucket).join(content_id)
}

/// Create-if-absent. A concurrent worker winning the race counts as success.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn create_link(target: &Path, link_path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link_path)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link_path)
    }
}

/// Swap the link at `link_path` for one pointing at `target`: the new link
/// is made under a temporary sibling name and renamed over the old one, so
/// readers never observe a missing path.
pub fn replace_link(target: &Path, link_path: &Path) -> io::Result<()> {
    let file_name = link_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = link_path.with_file_name(format!(".{}.restore-farm-tmp", file_name));

    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    create_link(target, &tmp)?;
    if let Err(err) = fs::rename(&tmp, link_path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}
