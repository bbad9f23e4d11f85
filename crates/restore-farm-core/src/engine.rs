use crate::cleanup::{CleanupPlan, OrphanDetector, OrphanReport, RulesFile, Scope};
use crate::config::{self, AppConfig};
use crate::error::Error;
use crate::farm::{self, FarmBuilder, FarmPlan, FarmReport};
use crate::platform::CancelToken;
use crate::progress::ProgressReporter;
use crate::resolver::{PathResolver, Resolution, ResolverOptions};
use crate::storage::models::StoreStats;
use crate::storage::MetadataStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Store contents turned into paths, plus how long each phase took.
pub struct ResolveResult {
    pub stats: StoreStats,
    pub account_root: Option<String>,
    pub resolution: Resolution,
    pub read_duration: Duration,
    pub resolve_duration: Duration,
}

impl ResolveResult {
    pub fn unresolved_counts(&self) -> BTreeMap<&'static str, usize> {
        self.resolution.unresolved_counts()
    }
}

/// Stream every record of `store` into a resolver and resolve the lot.
pub fn resolve_store(
    store: &MetadataStore,
    mut options: ResolverOptions,
    strip_account_root: bool,
    reporter: &dyn ProgressReporter,
) -> Result<ResolveResult, Error> {
    let stats = store.store_stats()?;
    info!(
        "Reading {} records ({} files, {} directories)",
        stats.total_records, stats.total_files, stats.total_directories
    );

    let mut account_root = None;
    if strip_account_root {
        if let Some((id, name)) = store.find_account_root()? {
            debug!("Account root '{}' (id {}) is made transparent", name, id);
            options.transparent_root = Some(id);
            account_root = Some(name);
        }
    }

    let read_start = Instant::now();
    reporter.on_read_start(stats.total_records);
    let mut resolver = PathResolver::new(options);
    let mut read = 0u64;
    store.for_each_record(|record| -> Result<(), Error> {
        resolver.ingest(record);
        read += 1;
        if read % 10_000 == 0 {
            reporter.on_read_progress(read);
        }
        Ok(())
    })?;
    let read_duration = read_start.elapsed();
    reporter.on_read_complete(read, read_duration.as_secs_f64());

    let resolve_start = Instant::now();
    let resolution = resolver.finish();
    let resolve_duration = resolve_start.elapsed();
    reporter.on_resolve_complete(
        resolution.resolved_count(),
        resolution.unresolved.len(),
        resolve_duration.as_secs_f64(),
    );
    if !resolution.unresolved.is_empty() {
        warn!(
            "{} records could not be resolved: {:?}",
            resolution.unresolved.len(),
            resolution.unresolved_counts()
        );
    }

    Ok(ResolveResult {
        stats,
        account_root,
        resolution,
        read_duration,
        resolve_duration,
    })
}

/// Outcome of one farm run. `report.aborted` separates fatal runs from
/// runs that merely skipped or failed some entries.
pub struct FarmRunSummary {
    pub resolve: ResolveResult,
    pub plan_links: usize,
    pub plan_directories: usize,
    pub skipped_without_content: usize,
    pub directories_with_content: usize,
    pub truncated_by_limit: usize,
    pub report: FarmReport,
}

impl FarmRunSummary {
    pub fn is_aborted(&self) -> bool {
        self.report.aborted.is_some()
    }

    pub fn skipped(&self) -> usize {
        self.resolve.resolution.unresolved.len() + self.skipped_without_content
    }
}

pub struct FarmEngine {
    config: AppConfig,
    dry_run: bool,
    cancel: CancelToken,
}

impl FarmEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            dry_run: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resolve(&self, reporter: &dyn ProgressReporter) -> Result<ResolveResult, Error> {
        let store = MetadataStore::open(Path::new(&self.config.db_path))?;
        resolve_store(
            &store,
            self.config.resolver_options(),
            self.config.strip_account_root,
            reporter,
        )
    }

    /// Full pipeline:
    /// 1. Stream records from the metadata store
    /// 2. Resolve them into unique relative paths
    /// 3. Plan and build the symlink farm
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<FarmRunSummary, Error> {
        let resolve = self.resolve(reporter)?;
        let plan = farm::plan_farm(&resolve.resolution, self.config.farm_options().limit);
        let report = self.build_plan(&plan, reporter)?;

        Ok(FarmRunSummary {
            resolve,
            plan_links: plan.link_count,
            plan_directories: plan.directory_count,
            skipped_without_content: plan.skipped_without_content,
            directories_with_content: plan.directories_with_content,
            truncated_by_limit: plan.truncated_by_limit,
            report,
        })
    }

    pub fn build_plan(
        &self,
        plan: &FarmPlan,
        reporter: &dyn ProgressReporter,
    ) -> Result<FarmReport, Error> {
        let mut options = self.config.farm_options();
        options.dry_run = self.dry_run;
        let builder = FarmBuilder::new(
            Path::new(&self.config.source_root),
            Path::new(&self.config.farm_root),
            options,
        )?
        .with_cancel_token(self.cancel.clone());
        builder.build(&plan.tasks, reporter)
    }
}

/// Orphan reports for every scope plus the combined deletion plan.
pub struct CleanupScan {
    pub dest_root: PathBuf,
    pub canonical_files: usize,
    pub reports: Vec<OrphanReport>,
    pub plan: CleanupPlan,
}

impl CleanupScan {
    pub fn orphans_found(&self) -> usize {
        self.reports.iter().map(|r| r.candidates.len()).sum()
    }
}

pub struct CleanupEngine {
    config: AppConfig,
    cancel: CancelToken,
}

impl CleanupEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Resolve the store, walk the destination and classify what it holds
    /// beyond the canonical set. Nothing is deleted here.
    pub fn scan(
        &self,
        dest_root: &Path,
        rules: &RulesFile,
        reporter: &dyn ProgressReporter,
    ) -> Result<CleanupScan, Error> {
        let store = MetadataStore::open(Path::new(&self.config.db_path))?;
        let resolve = resolve_store(
            &store,
            self.config.resolver_options(),
            self.config.strip_account_root,
            reporter,
        )?;
        self.scan_with(dest_root, &resolve.resolution, rules, reporter)
    }

    pub fn scan_with(
        &self,
        dest_root: &Path,
        resolution: &Resolution,
        rules: &RulesFile,
        reporter: &dyn ProgressReporter,
    ) -> Result<CleanupScan, Error> {
        let canonical = resolution.canonical_set();
        let defaults = rules.rule_set()?;
        let detector = OrphanDetector::new(&canonical, &defaults)
            .with_op_timeout(self.config.op_timeout())
            .with_cancel_token(self.cancel.clone());

        let mut reports = Vec::new();
        for scope in self.scopes(dest_root, rules)? {
            reports.push(detector.detect(&scope, reporter)?);
        }

        let plan = CleanupPlan::from_candidates(
            dest_root,
            reports.iter().flat_map(|r| r.candidates.iter()),
        );
        info!(
            "{} orphans found, {} planned for deletion",
            reports.iter().map(|r| r.candidates.len()).sum::<usize>(),
            plan.len()
        );

        Ok(CleanupScan {
            dest_root: dest_root.to_path_buf(),
            canonical_files: canonical.file_count(),
            reports,
            plan,
        })
    }

    /// One scope per `[[scopes]]` entry (nested ones folded into their
    /// ancestor), or the whole destination when none are declared.
    fn scopes(&self, dest_root: &Path, rules: &RulesFile) -> Result<Vec<Scope>, Error> {
        if rules.scopes.is_empty() {
            return Ok(vec![Scope::new(dest_root, "")]);
        }
        let prefixes = config::non_overlapping_prefixes(
            rules.scopes.iter().map(|s| s.path.clone()).collect(),
        );
        prefixes
            .iter()
            .map(|prefix| -> Result<Scope, Error> {
                Ok(Scope::new(dest_root, prefix).with_rules(rules.rule_set_for(prefix)?))
            })
            .collect()
    }
}
