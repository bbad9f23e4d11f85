use super::rules::{Classification, RuleSet};
use crate::error::Error;
use crate::platform::{self, CancelToken};
use crate::progress::ProgressReporter;
use crate::resolver::CanonicalSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One destination subtree to compare against the canonical set.
#[derive(Debug, Clone)]
pub struct Scope {
    pub dest_root: PathBuf,
    /// `/`-separated directory below `dest_root`; empty for the whole tree.
    pub prefix: String,
    /// Overrides the detector's default rules for this scope.
    pub rules: Option<RuleSet>,
}

impl Scope {
    pub fn new(dest_root: &Path, prefix: &str) -> Self {
        Self {
            dest_root: dest_root.to_path_buf(),
            prefix: prefix.trim_matches('/').to_string(),
            rules: None,
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn root(&self) -> PathBuf {
        if self.prefix.is_empty() {
            self.dest_root.clone()
        } else {
            self.dest_root.join(&self.prefix)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanKind {
    File,
    Symlink,
    Directory,
}

impl OrphanKind {
    pub fn label(self) -> &'static str {
        match self {
            OrphanKind::File => "file",
            OrphanKind::Symlink => "symlink",
            OrphanKind::Directory => "directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanCandidate {
    /// Destination-relative, `/`-separated.
    pub path: String,
    pub kind: OrphanKind,
    pub classification: Classification,
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderStats {
    pub total: usize,
    pub matched: usize,
    pub orphans: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct OrphanReport {
    pub scope_root: PathBuf,
    /// Post-order: a directory follows everything inside it.
    pub candidates: Vec<OrphanCandidate>,
    pub files_scanned: usize,
    pub files_matched: usize,
    pub dirs_scanned: usize,
    /// Directories that could not be listed and entries whose name is not
    /// UTF-8, with the reason. Their parents are never removed.
    pub unreadable: Vec<(String, String)>,
    /// Keyed by first path segment.
    pub folders: BTreeMap<String, FolderStats>,
    #[serde(skip)]
    pub duration: Duration,
}

impl OrphanReport {
    pub fn count(&self, classification: Classification) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.classification == classification)
            .count()
    }

    pub fn eligible(&self) -> impl Iterator<Item = &OrphanCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.classification == Classification::CleanupEligible)
    }
}

enum EntryType {
    Dir,
    File,
    Symlink,
    /// Name is not valid UTF-8; carried under its lossy form for reporting.
    Undecodable,
}

struct Frame {
    rel: String,
    entries: std::vec::IntoIter<(String, EntryType)>,
    /// Every child so far is gone after cleanup.
    removable: bool,
}

/// Walks destination trees and reports paths the metadata does not know.
pub struct OrphanDetector<'a> {
    canonical: &'a CanonicalSet,
    rules: &'a RuleSet,
    op_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<'a> OrphanDetector<'a> {
    pub fn new(canonical: &'a CanonicalSet, rules: &'a RuleSet) -> Self {
        Self {
            canonical,
            rules,
            op_timeout: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Depth-first walk of one scope. Directories are decided after their
    /// contents; the scope root itself is never a candidate.
    pub fn detect(&self, scope: &Scope, reporter: &dyn ProgressReporter) -> Result<OrphanReport, Error> {
        let start = Instant::now();
        let rules = scope.rules.as_ref().unwrap_or(self.rules);
        let root = scope.root();
        info!("Scanning {} for orphans", root.display());

        let mut report = OrphanReport {
            scope_root: root.clone(),
            ..OrphanReport::default()
        };
        let mut stack = vec![Frame {
            rel: scope.prefix.clone(),
            entries: self.list_dir(&root)?.into_iter(),
            removable: true,
        }];
        report.dirs_scanned += 1;

        while let Some(frame) = stack.last_mut() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let Some((name, entry_type)) = frame.entries.next() else {
                let done = match stack.pop() {
                    Some(done) => done,
                    None => break,
                };
                let Some(parent) = stack.last_mut() else {
                    break;
                };
                if self.canonical.contains_dir(&done.rel) || !done.removable {
                    parent.removable = false;
                    continue;
                }
                let (classification, rule) = rules.classify(&done.rel);
                if classification != Classification::CleanupEligible {
                    parent.removable = false;
                }
                report.candidates.push(OrphanCandidate {
                    path: done.rel,
                    kind: OrphanKind::Directory,
                    classification,
                    rule: rule.map(str::to_string),
                });
                continue;
            };

            let rel = join_relative(&frame.rel, &name);
            match entry_type {
                EntryType::Undecodable => {
                    warn!("Skipping {}: name is not valid UTF-8", rel);
                    frame.removable = false;
                    report.unreadable.push((rel, "name is not valid UTF-8".to_string()));
                }
                EntryType::Dir => {
                    let abs = scope.dest_root.join(&rel);
                    report.dirs_scanned += 1;
                    match self.list_dir(&abs) {
                        Ok(entries) => stack.push(Frame {
                            rel,
                            entries: entries.into_iter(),
                            removable: true,
                        }),
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(err) => {
                            warn!("Cannot list {}: {}", abs.display(), err);
                            frame.removable = false;
                            report.unreadable.push((rel, err.to_string()));
                        }
                    }
                }
                EntryType::File | EntryType::Symlink => {
                    report.files_scanned += 1;
                    let stats = report.folders.entry(top_folder(&rel)).or_default();
                    stats.total += 1;

                    if self.canonical.contains_file(&rel) {
                        stats.matched += 1;
                        report.files_matched += 1;
                        frame.removable = false;
                    } else {
                        stats.orphans += 1;
                        let (classification, rule) = rules.classify(&rel);
                        if classification != Classification::CleanupEligible {
                            frame.removable = false;
                        }
                        report.candidates.push(OrphanCandidate {
                            path: rel,
                            kind: match entry_type {
                                EntryType::Symlink => OrphanKind::Symlink,
                                _ => OrphanKind::File,
                            },
                            classification,
                            rule: rule.map(str::to_string),
                        });
                    }

                    if report.files_scanned % 1_000 == 0 {
                        reporter.on_walk_progress(report.files_scanned);
                    }
                }
            }
        }

        report.duration = start.elapsed();
        reporter.on_walk_complete(report.files_scanned, report.duration.as_secs_f64());
        debug!(
            "Orphan scan of {}: {} files ({} matched), {} candidates in {:.2}s",
            root.display(),
            report.files_scanned,
            report.files_matched,
            report.candidates.len(),
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// Directory listing with entry types, sorted by name.
    fn list_dir(&self, dir: &Path) -> Result<Vec<(String, EntryType)>, Error> {
        let dir = dir.to_path_buf();
        let listing = platform::guarded(self.op_timeout, &self.cancel, move || {
            let mut entries = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(raw) => {
                        entries.push((raw.to_string_lossy().into_owned(), EntryType::Undecodable));
                        continue;
                    }
                };
                let entry_type = if file_type.is_symlink() {
                    EntryType::Symlink
                } else if file_type.is_dir() {
                    EntryType::Dir
                } else {
                    EntryType::File
                };
                entries.push((name, entry_type));
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        });

        listing.map_err(|err| match err.kind() {
            io::ErrorKind::Interrupted => Error::Cancelled,
            _ => Error::Io(err),
        })
    }
}

fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn top_folder(rel: &str) -> String {
    match rel.split_once('/') {
        Some((top, _)) => top.to_string(),
        None => String::new(),
    }
}
