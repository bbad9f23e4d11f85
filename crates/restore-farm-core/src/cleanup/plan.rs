use super::orphans::{OrphanCandidate, OrphanKind};
use super::rules::Classification;
use crate::error::Error;
use crate::platform::{self, CancelToken};
use crate::storage::AuditLog;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDeletion {
    pub path: String,
    pub kind: OrphanKind,
    pub rule: Option<String>,
}

impl PlannedDeletion {
    fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

/// Ordered deletions for one destination: files and symlinks first, then
/// directories deepest first so each is empty by the time it is reached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupPlan {
    pub dest_root: PathBuf,
    pub deletions: Vec<PlannedDeletion>,
    pub protected: usize,
    pub unmanaged: usize,
}

impl CleanupPlan {
    pub fn from_candidates<'a, I>(dest_root: &Path, candidates: I) -> Self
    where
        I: IntoIterator<Item = &'a OrphanCandidate>,
    {
        let mut plan = CleanupPlan {
            dest_root: dest_root.to_path_buf(),
            ..CleanupPlan::default()
        };
        let mut dirs = Vec::new();

        for candidate in candidates {
            match candidate.classification {
                Classification::Protected => plan.protected += 1,
                Classification::Unmanaged => plan.unmanaged += 1,
                Classification::CleanupEligible => {
                    let deletion = PlannedDeletion {
                        path: candidate.path.clone(),
                        kind: candidate.kind,
                        rule: candidate.rule.clone(),
                    };
                    if candidate.kind == OrphanKind::Directory {
                        dirs.push(deletion);
                    } else {
                        plan.deletions.push(deletion);
                    }
                }
            }
        }

        plan.deletions.sort_by(|a, b| a.path.cmp(&b.path));
        dirs.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.path.cmp(&b.path)));
        plan.deletions.extend(dirs);
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deletions.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupState {
    Planning,
    Previewed,
    AwaitingConfirmation,
    DryRunDone,
    Executing,
    Done,
}

impl CleanupState {
    pub fn label(self) -> &'static str {
        match self {
            CleanupState::Planning => "planning",
            CleanupState::Previewed => "previewed",
            CleanupState::AwaitingConfirmation => "awaiting-confirmation",
            CleanupState::DryRunDone => "dry-run-done",
            CleanupState::Executing => "executing",
            CleanupState::Done => "done",
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupOutcome {
    pub deleted: usize,
    /// Already gone when its turn came.
    pub missing: usize,
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

/// One cleanup invocation. Nothing is deleted unless the session was
/// created without `dry_run`, previewed, and then executed with
/// `confirmed = true`.
pub struct CleanupSession {
    plan: CleanupPlan,
    dry_run: bool,
    state: CleanupState,
    op_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl CleanupSession {
    pub fn new(plan: CleanupPlan, dry_run: bool) -> Self {
        Self {
            plan,
            dry_run,
            state: CleanupState::Planning,
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

    pub fn state(&self) -> CleanupState {
        self.state
    }

    pub fn plan(&self) -> &CleanupPlan {
        &self.plan
    }

    fn transition(&mut self, from: CleanupState, to: CleanupState) -> Result<(), Error> {
        if self.state != from {
            return Err(Error::InvalidTransition {
                from: self.state.label(),
                to: to.label(),
            });
        }
        debug!("Cleanup state {} -> {}", from.label(), to.label());
        self.state = to;
        Ok(())
    }

    /// Hand out the plan for display. Must happen before anything else.
    pub fn preview(&mut self) -> Result<&CleanupPlan, Error> {
        self.transition(CleanupState::Planning, CleanupState::Previewed)?;
        info!(
            "Cleanup plan: {} deletions ({} protected, {} unmanaged left alone)",
            self.plan.len(),
            self.plan.protected,
            self.plan.unmanaged
        );
        Ok(&self.plan)
    }

    /// After the preview: a dry run ends here, a real run waits for confirmation.
    pub fn finish_preview(&mut self) -> Result<CleanupState, Error> {
        let next = if self.dry_run {
            CleanupState::DryRunDone
        } else {
            CleanupState::AwaitingConfirmation
        };
        self.transition(CleanupState::Previewed, next)?;
        Ok(next)
    }

    /// Delete every planned path. Each deletion is written to the audit log
    /// before the filesystem call and its result after it.
    pub fn execute(&mut self, confirmed: bool, audit: &AuditLog) -> Result<CleanupOutcome, Error> {
        if self.state != CleanupState::AwaitingConfirmation {
            return Err(Error::InvalidTransition {
                from: self.state.label(),
                to: CleanupState::Executing.label(),
            });
        }
        if !confirmed {
            return Err(Error::ConfirmationRequired);
        }
        self.transition(CleanupState::AwaitingConfirmation, CleanupState::Executing)?;

        let scope_root = self.plan.dest_root.to_string_lossy().into_owned();
        let mut outcome = CleanupOutcome::default();

        for deletion in &self.plan.deletions {
            if self.cancel.is_cancelled() {
                warn!("Cleanup cancelled with deletions remaining");
                outcome.cancelled = true;
                break;
            }

            let attempt = audit.record_attempt(
                &scope_root,
                &deletion.path,
                deletion.kind.label(),
                deletion.rule.as_deref(),
            )?;

            let target = self.plan.dest_root.join(&deletion.path);
            let kind = deletion.kind;
            let result = platform::guarded(self.op_timeout, &self.cancel, move || match kind {
                OrphanKind::Directory => fs::remove_dir(&target),
                OrphanKind::File | OrphanKind::Symlink => fs::remove_file(&target),
            });

            match result {
                Ok(()) => {
                    audit.record_outcome(attempt, "deleted")?;
                    outcome.deleted += 1;
                    debug!("Deleted {}", deletion.path);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    audit.record_outcome(attempt, "missing")?;
                    outcome.missing += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    audit.record_outcome(attempt, "cancelled")?;
                    outcome.cancelled = true;
                    break;
                }
                Err(err) => {
                    error!("Failed to delete {}: {}", deletion.path, err);
                    audit.record_outcome(attempt, &format!("error: {}", err))?;
                    outcome.failed.push((deletion.path.clone(), err.to_string()));
                }
            }
        }

        self.transition(CleanupState::Executing, CleanupState::Done)?;
        info!(
            "Cleanup finished: {} deleted, {} already gone, {} failed",
            outcome.deleted,
            outcome.missing,
            outcome.failed.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn candidate(path: &str, kind: OrphanKind, classification: Classification) -> OrphanCandidate {
        OrphanCandidate {
            path: path.to_string(),
            kind,
            classification,
            rule: Some("Photos/*".to_string()),
        }
    }

    #[test]
    fn test_plan_orders_files_then_deepest_dirs() {
        let candidates = vec![
            candidate("Photos/a", OrphanKind::Directory, Classification::CleanupEligible),
            candidate("Photos/a/b", OrphanKind::Directory, Classification::CleanupEligible),
            candidate("Photos/a/b/x.tmp", OrphanKind::File, Classification::CleanupEligible),
            candidate("Photos/a/y.tmp", OrphanKind::Symlink, Classification::CleanupEligible),
            candidate("Downloads/z", OrphanKind::File, Classification::Protected),
            candidate("Music/m", OrphanKind::File, Classification::Unmanaged),
        ];
        let plan = CleanupPlan::from_candidates(Path::new("/dest"), &candidates);
        let order: Vec<&str> = plan.deletions.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            order,
            vec!["Photos/a/b/x.tmp", "Photos/a/y.tmp", "Photos/a/b", "Photos/a"]
        );
        assert_eq!(plan.protected, 1);
        assert_eq!(plan.unmanaged, 1);
    }

    #[test]
    fn test_execute_requires_preview_and_confirmation() {
        let audit = AuditLog::open_in_memory().unwrap();
        let mut session = CleanupSession::new(CleanupPlan::default(), false);

        let err = session.execute(true, &audit).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { from: "planning", .. }));

        session.preview().unwrap();
        assert_eq!(session.finish_preview().unwrap(), CleanupState::AwaitingConfirmation);

        let err = session.execute(false, &audit).unwrap_err();
        assert!(matches!(err, Error::ConfirmationRequired));
        assert_eq!(session.state(), CleanupState::AwaitingConfirmation);

        session.execute(true, &audit).unwrap();
        assert_eq!(session.state(), CleanupState::Done);
    }

    #[test]
    fn test_dry_run_is_terminal() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("old.bak"), "x").unwrap();
        let candidates = vec![candidate("old.bak", OrphanKind::File, Classification::CleanupEligible)];
        let plan = CleanupPlan::from_candidates(tmp.path(), &candidates);
        let audit = AuditLog::open_in_memory().unwrap();

        let mut session = CleanupSession::new(plan, true);
        assert_eq!(session.preview().unwrap().len(), 1);
        assert_eq!(session.finish_preview().unwrap(), CleanupState::DryRunDone);

        let err = session.execute(true, &audit).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { from: "dry-run-done", .. }));
        assert!(tmp.path().join("old.bak").exists());
        assert!(audit.entries().unwrap().is_empty());
    }

    #[test]
    fn test_confirmed_run_deletes_and_audits() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path();
        fs::create_dir_all(dest.join("Photos/junk")).unwrap();
        fs::write(dest.join("Photos/junk/x.tmp"), "x").unwrap();
        fs::write(dest.join("Photos/keep.jpg"), "k").unwrap();

        let candidates = vec![
            candidate("Photos/junk/x.tmp", OrphanKind::File, Classification::CleanupEligible),
            candidate("Photos/junk", OrphanKind::Directory, Classification::CleanupEligible),
            candidate("Photos/gone.tmp", OrphanKind::File, Classification::CleanupEligible),
        ];
        let plan = CleanupPlan::from_candidates(dest, &candidates);
        let audit = AuditLog::open_in_memory().unwrap();

        let mut session = CleanupSession::new(plan, false);
        session.preview().unwrap();
        session.finish_preview().unwrap();
        let outcome = session.execute(true, &audit).unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.missing, 1);
        assert!(outcome.failed.is_empty());
        assert!(!dest.join("Photos/junk").exists());
        assert!(dest.join("Photos/keep.jpg").exists());

        let entries = audit.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].relative_path, "Photos/gone.tmp");
        assert_eq!(entries[0].result.as_deref(), Some("missing"));
        assert_eq!(entries[2].entry_kind, "directory");
        assert_eq!(entries[2].matched_rule.as_deref(), Some("Photos/*"));
        assert!(audit.incomplete().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_before_first_deletion() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.tmp"), "x").unwrap();
        let candidates = vec![candidate("a.tmp", OrphanKind::File, Classification::CleanupEligible)];
        let token = CancelToken::new();
        let mut session = CleanupSession::new(CleanupPlan::from_candidates(tmp.path(), &candidates), false)
            .with_cancel_token(token.clone());
        session.preview().unwrap();
        session.finish_preview().unwrap();
        token.cancel();

        let audit = AuditLog::open_in_memory().unwrap();
        let outcome = session.execute(true, &audit).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.deleted, 0);
        assert!(tmp.path().join("a.tmp").exists());
    }
}
