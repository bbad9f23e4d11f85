pub mod inventory;
pub mod link;

pub use inventory::{scan_farm, FarmInventory};
pub use link::{EntryStatus, FailureKind, FarmFailure};

use crate::error::Error;
use crate::platform::{self, CancelToken};
use crate::progress::ProgressReporter;
use crate::resolver::Resolution;
use crate::storage::models::RecordId;
use dashmap::DashSet;
use link::LinkState;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const WRITE_CHECK_FILE: &str = ".restore-farm-write-check";

#[derive(Debug, Clone, PartialEq)]
pub struct FarmOptions {
    /// Classify only; never touch the filesystem.
    pub dry_run: bool,
    /// Worker threads. 0 lets rayon pick.
    pub workers: usize,
    /// Abort once failed/processed exceeds this ratio...
    pub error_rate_threshold: f64,
    /// ...after at least this many entries.
    pub min_sample: usize,
    pub limit: Option<usize>,
    pub op_timeout: Option<Duration>,
}

impl Default for FarmOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            workers: 0,
            error_rate_threshold: 0.5,
            min_sample: 100,
            limit: None,
            op_timeout: None,
        }
    }
}

/// A symlink to create: `farm_root/relative_path → source/<c>/<content_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FarmEntry {
    pub record_id: RecordId,
    pub relative_path: PathBuf,
    pub content_id: String,
}

impl FarmEntry {
    pub fn source_target(&self, source_root: &Path) -> PathBuf {
        link::bucketed_target(source_root, &self.content_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FarmTask {
    Link(FarmEntry),
    /// Directory record with no resolved children, kept so empty folders survive.
    Directory {
        record_id: RecordId,
        relative_path: PathBuf,
    },
}

impl FarmTask {
    pub fn relative_path(&self) -> &Path {
        match self {
            FarmTask::Link(entry) => &entry.relative_path,
            FarmTask::Directory { relative_path, .. } => relative_path,
        }
    }
}

#[derive(Debug, Default)]
pub struct FarmPlan {
    pub tasks: Vec<FarmTask>,
    pub link_count: usize,
    pub directory_count: usize,
    /// Non-directory records without a content id.
    pub skipped_without_content: usize,
    /// Directory records that also carry a content id; only the directory is made.
    pub directories_with_content: usize,
    pub truncated_by_limit: usize,
}

/// Turn resolved records into farm tasks, ordered by relative path.
pub fn plan_farm(resolution: &Resolution, limit: Option<usize>) -> FarmPlan {
    let parents: HashSet<&RecordId> = resolution
        .iter()
        .filter_map(|(record, _)| record.parent_id.as_ref())
        .collect();

    let mut plan = FarmPlan::default();
    for (record, path) in resolution.iter() {
        if path.is_empty() {
            continue;
        }
        if record.is_directory {
            if let Some(content_id) = record.content() {
                warn!(
                    "Directory record {} ({}) carries content id {}; linking skipped",
                    record.id,
                    path.relative(),
                    content_id
                );
                plan.directories_with_content += 1;
            }
            if !parents.contains(&record.id) {
                plan.tasks.push(FarmTask::Directory {
                    record_id: record.id.clone(),
                    relative_path: path.to_path_buf(),
                });
                plan.directory_count += 1;
            }
        } else if let Some(content_id) = record.content() {
            if limit.is_some_and(|limit| plan.link_count >= limit) {
                plan.truncated_by_limit += 1;
                continue;
            }
            plan.tasks.push(FarmTask::Link(FarmEntry {
                record_id: record.id.clone(),
                relative_path: path.to_path_buf(),
                content_id: content_id.to_string(),
            }));
            plan.link_count += 1;
        } else {
            plan.skipped_without_content += 1;
        }
    }

    plan.tasks
        .sort_by(|a, b| a.relative_path().cmp(b.relative_path()));
    if plan.truncated_by_limit > 0 {
        warn!(
            "Limit reached: {} file entries left out of the plan",
            plan.truncated_by_limit
        );
    }
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Link,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub target: Option<PathBuf>,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FarmFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AbortReason {
    ErrorRate { failed: usize, processed: usize },
    Fatal { kind: FailureKind, message: String },
    Cancelled,
}

#[derive(Debug, Serialize)]
pub struct FarmReport {
    pub farm_root: PathBuf,
    pub dry_run: bool,
    pub entries: Vec<ManifestEntry>,
    pub counts: BTreeMap<EntryStatus, usize>,
    pub completed: usize,
    pub remaining: usize,
    pub aborted: Option<AbortReason>,
    #[serde(skip)]
    pub duration: Duration,
}

impl FarmReport {
    pub fn count(&self, status: EntryStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.status == EntryStatus::Failed)
    }

    /// JSON manifest for the transfer step. `checksum` is passed through
    /// untouched so the transfer tool knows whether to verify content.
    pub fn write_manifest(&self, path: &Path, checksum: bool) -> Result<(), Error> {
        #[derive(Serialize)]
        struct Manifest<'a> {
            generated_at: String,
            checksum: bool,
            #[serde(flatten)]
            report: &'a FarmReport,
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = io::BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer_pretty(
            file,
            &Manifest {
                generated_at: chrono::Utc::now().to_rfc3339(),
                checksum,
                report: self,
            },
        )?;
        info!("Farm manifest written to {}", path.display());
        Ok(())
    }
}

/// Materializes farm tasks as symlinks under `farm_root`.
pub struct FarmBuilder {
    source_root: PathBuf,
    farm_root: PathBuf,
    options: FarmOptions,
    cancel: CancelToken,
}

struct RunState {
    processed: AtomicUsize,
    failed: AtomicUsize,
    stop: AtomicBool,
    abort: Mutex<Option<AbortReason>>,
    created_dirs: DashSet<PathBuf>,
}

impl FarmBuilder {
    /// `source_root` is made absolute so links stay valid wherever the farm
    /// is read from.
    pub fn new(source_root: &Path, farm_root: &Path, options: FarmOptions) -> Result<Self, Error> {
        let source_root = fs::canonicalize(source_root).map_err(|e| {
            Error::Other(format!(
                "Source root '{}' is not accessible: {}",
                source_root.display(),
                e
            ))
        })?;
        Ok(Self {
            source_root,
            farm_root: farm_root.to_path_buf(),
            options,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn farm_root(&self) -> &Path {
        &self.farm_root
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn build(
        &self,
        tasks: &[FarmTask],
        reporter: &dyn ProgressReporter,
    ) -> Result<FarmReport, Error> {
        let start = Instant::now();
        if !self.options.dry_run {
            self.check_farm_root()?;
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .thread_name(|i| format!("farm-worker-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("Failed to start worker pool: {}", e)))?;

        let state = RunState {
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            abort: Mutex::new(None),
            created_dirs: DashSet::new(),
        };

        info!(
            "{} {} farm entries under {}",
            if self.options.dry_run { "Previewing" } else { "Building" },
            tasks.len(),
            self.farm_root.display()
        );
        reporter.on_farm_start(tasks.len());

        let results: Vec<Option<ManifestEntry>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| self.run_task(task, &state, tasks.len(), reporter))
                .collect()
        });

        let entries: Vec<ManifestEntry> = results.into_iter().flatten().collect();
        let mut counts = BTreeMap::new();
        for entry in &entries {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        let aborted = state.abort.lock().map(|a| a.clone()).unwrap_or(None);
        let duration = start.elapsed();
        reporter.on_farm_complete(entries.len(), duration.as_secs_f64());

        let report = FarmReport {
            farm_root: self.farm_root.clone(),
            dry_run: self.options.dry_run,
            completed: entries.len(),
            remaining: tasks.len() - entries.len(),
            entries,
            counts,
            aborted,
            duration,
        };

        match &report.aborted {
            Some(reason) => error!(
                "Farm run aborted ({:?}): {} completed, {} remaining",
                reason, report.completed, report.remaining
            ),
            None => debug!(
                "Farm run finished in {:.2}s: {:?}",
                duration.as_secs_f64(),
                report.counts
            ),
        }
        Ok(report)
    }

    /// The farm root must exist and accept new entries before any worker starts.
    fn check_farm_root(&self) -> Result<(), Error> {
        let root = self.farm_root.clone();
        let unwritable = |e: io::Error| match e.kind() {
            io::ErrorKind::Interrupted => Error::Cancelled,
            _ => Error::FarmRootUnwritable {
                path: self.farm_root.display().to_string(),
                reason: e.to_string(),
            },
        };
        self.fs_call(move || {
            link::ensure_dir(&root)?;
            let marker = root.join(WRITE_CHECK_FILE);
            fs::write(&marker, b"")?;
            fs::remove_file(&marker)
        })
        .map_err(unwritable)
    }

    fn fs_call<T, F>(&self, op: F) -> io::Result<T>
    where
        F: FnOnce() -> io::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        platform::guarded(self.options.op_timeout, &self.cancel, op)
    }

    fn run_task(
        &self,
        task: &FarmTask,
        state: &RunState,
        total: usize,
        reporter: &dyn ProgressReporter,
    ) -> Option<ManifestEntry> {
        if state.stop.load(Ordering::SeqCst) {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.abort(state, AbortReason::Cancelled);
            return None;
        }

        let entry = match task {
            FarmTask::Link(entry) => self.process_link(entry, state),
            FarmTask::Directory { relative_path, .. } => self.process_directory(relative_path),
        };

        let processed = state.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = &entry.failure {
            let failed = state.failed.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("Farm entry failed: {}", failure.message);

            if failure.kind == FailureKind::Cancelled {
                self.abort(state, AbortReason::Cancelled);
            } else if failure.kind.is_fatal() {
                self.abort(
                    state,
                    AbortReason::Fatal {
                        kind: failure.kind,
                        message: failure.message.clone(),
                    },
                );
            } else if processed >= self.options.min_sample
                && failed as f64 / processed as f64 > self.options.error_rate_threshold
            {
                self.abort(state, AbortReason::ErrorRate { failed, processed });
            }
        }

        reporter.on_farm_progress(processed, total);
        Some(entry)
    }

    fn abort(&self, state: &RunState, reason: AbortReason) {
        state.stop.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = state.abort.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
    }

    fn process_link(&self, entry: &FarmEntry, state: &RunState) -> ManifestEntry {
        let link_path = self.farm_root.join(&entry.relative_path);
        let mut manifest = ManifestEntry {
            relative_path: entry.relative_path.clone(),
            kind: EntryKind::Link,
            target: None,
            status: EntryStatus::Failed,
            failure: None,
        };

        let source_root = self.source_root.clone();
        let content_id = entry.content_id.clone();
        let target = match self.fs_call(move || Ok(link::locate_source(&source_root, &content_id))) {
            Ok(Some(target)) => target,
            Ok(None) => {
                manifest.target = Some(entry.source_target(&self.source_root));
                manifest.failure = Some(FarmFailure::new(
                    FailureKind::SourceMissing,
                    format!("no source blob for content id {}", entry.content_id),
                ));
                return manifest;
            }
            Err(err) => {
                manifest.failure = Some(FarmFailure::from_io(&err, &self.source_root));
                return manifest;
            }
        };
        manifest.target = Some(target.clone());

        let (check_link, check_target) = (link_path.clone(), target.clone());
        let current = match self.fs_call(move || link::inspect_link(&check_link, &check_target)) {
            Ok(state) => state,
            Err(err) => {
                manifest.failure = Some(FarmFailure::from_io(&err, &link_path));
                return manifest;
            }
        };

        let planned = match current {
            LinkState::Correct => EntryStatus::AlreadyCorrect,
            LinkState::Missing => EntryStatus::ToCreate,
            LinkState::PointsElsewhere(previous) => {
                debug!(
                    "{} points at {} instead of {}",
                    link_path.display(),
                    previous.display(),
                    target.display()
                );
                EntryStatus::ToReplace
            }
            LinkState::Occupied => {
                manifest.failure = Some(FarmFailure::new(
                    FailureKind::Occupied,
                    format!("{} exists and is not a symlink", link_path.display()),
                ));
                return manifest;
            }
        };

        if self.options.dry_run || planned == EntryStatus::AlreadyCorrect {
            manifest.status = planned;
            return manifest;
        }

        if let Some(parent) = link_path.parent() {
            if let Err(err) = self.ensure_parent(parent, state) {
                manifest.failure = Some(FarmFailure::from_io(&err, parent));
                return manifest;
            }
        }

        let (new_link, new_target) = (link_path.clone(), target);
        let result = if planned == EntryStatus::ToCreate {
            self.fs_call(move || match link::create_link(&new_target, &new_link) {
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    link::replace_link(&new_target, &new_link).map(|_| EntryStatus::Replaced)
                }
                other => other.map(|_| EntryStatus::Created),
            })
        } else {
            self.fs_call(move || {
                link::replace_link(&new_target, &new_link).map(|_| EntryStatus::Replaced)
            })
        };

        match result {
            Ok(status) => manifest.status = status,
            Err(err) => manifest.failure = Some(FarmFailure::from_io(&err, &link_path)),
        }
        manifest
    }

    fn ensure_parent(&self, parent: &Path, state: &RunState) -> io::Result<()> {
        if state.created_dirs.contains(parent) {
            return Ok(());
        }
        let dir = parent.to_path_buf();
        self.fs_call(move || link::ensure_dir(&dir))?;
        state.created_dirs.insert(parent.to_path_buf());
        Ok(())
    }

    fn process_directory(&self, relative_path: &Path) -> ManifestEntry {
        let dir_path = self.farm_root.join(relative_path);
        let mut manifest = ManifestEntry {
            relative_path: relative_path.to_path_buf(),
            kind: EntryKind::Directory,
            target: None,
            status: EntryStatus::Failed,
            failure: None,
        };

        let dir = dir_path.clone();
        let existing = self.fs_call(move || match fs::symlink_metadata(&dir) {
            Ok(m) => Ok(Some(m.is_dir())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        });

        match existing {
            Ok(Some(true)) => manifest.status = EntryStatus::AlreadyCorrect,
            Ok(Some(false)) => {
                manifest.failure = Some(FarmFailure::new(
                    FailureKind::Occupied,
                    format!("{} exists and is not a directory", dir_path.display()),
                ))
            }
            Ok(None) if self.options.dry_run => manifest.status = EntryStatus::ToCreate,
            Ok(None) => {
                let dir = dir_path.clone();
                match self.fs_call(move || link::ensure_dir(&dir)) {
                    Ok(()) => manifest.status = EntryStatus::Created,
                    Err(err) => manifest.failure = Some(FarmFailure::from_io(&err, &dir_path)),
                }
            }
            Err(err) => manifest.failure = Some(FarmFailure::from_io(&err, &dir_path)),
        }
        manifest
    }
}
