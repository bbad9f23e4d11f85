mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{BuildFarmArgs, CleanupArgs, Cli, Commands, DiagnoseArgs, InspectFarmArgs, StoreArgs};
use dotenv::dotenv;
use progress::CliReporter;
use restore_farm_core::cleanup::{Classification, CleanupSession, CleanupState, RulesFile};
use restore_farm_core::farm::{self, EntryStatus};
use restore_farm_core::storage::{AuditLog, MetadataStore};
use restore_farm_core::{AppConfig, CleanupEngine, Error, FarmEngine};
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let loaded = match &args.config {
        Some(path) => restore_farm_core::config::load_configuration_from(path),
        None => restore_farm_core::config::load_configuration(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::BuildFarm(cmd)) => run_build_farm(config, &cmd),
        Some(Commands::Diagnose(cmd)) => run_diagnose(config, &cmd),
        Some(Commands::Cleanup(cmd)) => run_cleanup(config, &cmd),
        Some(Commands::InspectFarm(cmd)) => run_inspect_farm(&config, &cmd),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(0)
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(0)
        }
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => process::exit(code),
        Err(err) => {
            error!("Error: {:#}", err);
            process::exit(1);
        }
    }
}

fn apply_store_args(config: &mut AppConfig, store: &StoreArgs) {
    if let Some(db) = &store.db {
        config.db_path = db.to_string_lossy().into_owned();
    }
    if store.sanitize_pipes {
        config.sanitize_pipes = true;
    }
    if store.keep_account_root {
        config.strip_account_root = false;
    }
}

fn run_build_farm(mut config: AppConfig, cmd: &BuildFarmArgs) -> anyhow::Result<i32> {
    apply_store_args(&mut config, &cmd.store);
    if let Some(source) = &cmd.source {
        config.source_root = source.to_string_lossy().into_owned();
    }
    if let Some(farm) = &cmd.farm {
        config.farm_root = farm.to_string_lossy().into_owned();
    }
    if let Some(limit) = cmd.limit {
        config.limit = limit;
    }
    if let Some(workers) = cmd.workers {
        config.workers = workers;
    }
    if config.source_root.is_empty() || config.farm_root.is_empty() {
        bail!("Both a source directory (--source) and a farm directory (--farm) are required");
    }

    let reporter = CliReporter::new();
    if !cmd.force && !cmd.dry_run && config.limit == 0 {
        let store = MetadataStore::open(Path::new(&config.db_path))
            .with_context(|| format!("Cannot open metadata store {}", config.db_path))?;
        let expected = store.count_files()?;
        let inventory = farm::scan_farm(Path::new(&config.farm_root), &reporter);
        if inventory.is_complete(expected) {
            info!(
                "Farm at {} already holds {} of {} file links; use --force to rebuild",
                config.farm_root,
                inventory.links.to_string().green(),
                expected
            );
            return Ok(0);
        }
    }

    let checksum = config.checksum;
    let engine = FarmEngine::new(config).with_dry_run(cmd.dry_run);
    let summary = engine.run(&reporter)?;

    println!();
    info!(
        "Read: {}, Resolve: {}, Farm: {}",
        format!("{:.2}s", summary.resolve.read_duration.as_secs_f64()).green(),
        format!("{:.2}s", summary.resolve.resolve_duration.as_secs_f64()).green(),
        format!("{:.2}s", summary.report.duration.as_secs_f64()).green(),
    );
    if let Some(root) = &summary.resolve.account_root {
        info!("Account root '{}' stripped from paths", root);
    }
    info!(
        "{} links and {} empty directories planned, {} records skipped",
        summary.plan_links.to_string().cyan(),
        summary.plan_directories.to_string().cyan(),
        summary.skipped().to_string().yellow(),
    );
    for (reason, count) in summary.resolve.unresolved_counts() {
        warn!("  {}: {}", reason, count.to_string().yellow());
    }
    if summary.directories_with_content > 0 {
        warn!(
            "  {} directory records carry a content id and were created as plain directories",
            summary.directories_with_content.to_string().yellow()
        );
    }
    for (status, count) in &summary.report.counts {
        let line = format!("{:?}: {}", status, count);
        if *status == EntryStatus::Failed {
            info!("  {}", line.red());
        } else {
            info!("  {}", line.green());
        }
    }
    for failure in summary.report.failures().take(20) {
        if let Some(f) = &failure.failure {
            warn!("  {} ({:?}): {}", failure.relative_path.display(), f.kind, f.message);
        }
    }

    if let Some(path) = &cmd.manifest {
        summary.report.write_manifest(path, checksum)?;
    }

    match &summary.report.aborted {
        Some(reason) => {
            error!(
                "{} {:?}: {} entries completed, {} not attempted",
                "Farm run aborted:".red(),
                reason,
                summary.report.completed,
                summary.report.remaining
            );
            Ok(2)
        }
        None => Ok(0),
    }
}

fn run_diagnose(mut config: AppConfig, cmd: &DiagnoseArgs) -> anyhow::Result<i32> {
    apply_store_args(&mut config, &cmd.store);
    let reporter = CliReporter::new();
    let result = FarmEngine::new(config).resolve(&reporter)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result.resolution.unresolved)?);
        return Ok(0);
    }

    info!(
        "{} records: {} files, {} directories",
        result.stats.total_records, result.stats.total_files, result.stats.total_directories
    );
    info!(
        "{} resolved, {} unresolved",
        result.resolution.resolved_count().to_string().green(),
        result.resolution.unresolved.len().to_string().red(),
    );
    for (reason, count) in result.unresolved_counts() {
        info!("  {}: {}", reason, count);
    }
    for entry in result.resolution.unresolved.iter().take(cmd.show) {
        println!("  [{}] {:?}: {}", entry.record_id, entry.name, entry.reason);
    }
    Ok(0)
}

fn run_cleanup(mut config: AppConfig, cmd: &CleanupArgs) -> anyhow::Result<i32> {
    apply_store_args(&mut config, &cmd.store);
    let rules_path = cmd
        .rules
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.rules_path));
    let mut rules = RulesFile::load(&rules_path)?;
    rules.merge_patterns(&cmd.protect, &cmd.cleanup_folder);

    let dest = match &cmd.dest {
        Some(dest) => dest.clone(),
        None if !config.dest_root.is_empty() => PathBuf::from(&config.dest_root),
        None if !rules.destination.is_empty() => PathBuf::from(&rules.destination),
        None => bail!("No destination given (--dest, dest_root or the rules file)"),
    };
    if rules.destination.is_empty() {
        rules.destination = dest.to_string_lossy().into_owned();
    }
    if rules.cleanup.is_empty() && rules.scopes.is_empty() {
        bail!("No cleanup patterns configured; add --cleanup-folder or edit {}", rules_path.display());
    }

    let audit_path = PathBuf::from(&config.audit_db_path);
    let op_timeout = config.op_timeout();
    let engine = CleanupEngine::new(config);
    let reporter = CliReporter::new();
    let scan = engine.scan(&dest, &rules, &reporter)?;

    println!();
    for report in &scan.reports {
        info!("Scope {}", report.scope_root.display());
        for (folder, stats) in &report.folders {
            let name = if folder.is_empty() { "." } else { folder.as_str() };
            info!(
                "  {:<30} {:>8} files, {:>8} matched, {:>8} orphans",
                name,
                stats.total,
                stats.matched,
                stats.orphans.to_string().yellow()
            );
        }
        info!(
            "  {} protected, {} cleanup-eligible, {} unmanaged",
            report.count(Classification::Protected).to_string().green(),
            report.count(Classification::CleanupEligible).to_string().red(),
            report.count(Classification::Unmanaged),
        );
        for (path, err) in &report.unreadable {
            warn!("  unreadable {}: {}", path, err);
        }
    }
    rules.orphans_found = scan.orphans_found() as u64;

    let mut session = CleanupSession::new(scan.plan, cmd.dry_run)
        .with_op_timeout(op_timeout)
        .with_cancel_token(engine.cancel_token());
    let plan = session.preview()?;
    for deletion in plan.deletions.iter().take(50) {
        println!(
            "  {} {} ({})",
            "delete".red(),
            deletion.path,
            deletion.rule.as_deref().unwrap_or("-")
        );
    }
    if plan.len() > 50 {
        println!("  ... and {} more", plan.len() - 50);
    }
    let planned = plan.len();

    if session.finish_preview()? == CleanupState::DryRunDone {
        info!("Dry run: {} paths would be deleted", planned);
        save_rules(&mut rules, &rules_path)?;
        return Ok(0);
    }
    if planned == 0 {
        info!("Nothing to delete");
        save_rules(&mut rules, &rules_path)?;
        return Ok(0);
    }

    let confirmed = cmd.yes
        || prompt_confirm(
            &format!("Delete {} orphaned paths under {}?", planned, dest.display()),
            Some(false),
        )?;

    let audit = AuditLog::open(&audit_path)
        .with_context(|| format!("Cannot open audit log {}", audit_path.display()))?;
    match session.execute(confirmed, &audit) {
        Ok(outcome) => {
            info!(
                "{} deleted, {} already gone, {} failed",
                outcome.deleted.to_string().green(),
                outcome.missing,
                outcome.failed.len().to_string().red()
            );
            rules.orphans_deleted += outcome.deleted as u64;
            save_rules(&mut rules, &rules_path)?;
            Ok(if outcome.failed.is_empty() && !outcome.cancelled { 0 } else { 1 })
        }
        Err(Error::ConfirmationRequired) => {
            warn!("Not confirmed; nothing was deleted");
            save_rules(&mut rules, &rules_path)?;
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}

/// Write scan counters back to the rules file. A format that cannot be
/// written (YAML) is left untouched with a warning.
fn save_rules(rules: &mut RulesFile, path: &Path) -> anyhow::Result<()> {
    match rules.save(path) {
        Ok(()) => Ok(()),
        Err(err @ Error::RulesFormat { .. }) => {
            warn!("{}; run counters not recorded", err);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn run_inspect_farm(config: &AppConfig, cmd: &InspectFarmArgs) -> anyhow::Result<i32> {
    let farm_root = cmd
        .farm
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.farm_root));
    if farm_root.as_os_str().is_empty() {
        bail!("No farm directory given (--farm or farm_root)");
    }

    let inventory = farm::scan_farm(&farm_root, &CliReporter::new());
    info!(
        "{}: {} links, {} broken, {} directories, {} other files",
        farm_root.display(),
        inventory.links.to_string().green(),
        inventory.broken_links.to_string().red(),
        inventory.directories,
        inventory.other_files
    );

    let db_path = cmd
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.db_path));
    if db_path.exists() {
        let expected = MetadataStore::open(&db_path)?.count_files()?;
        let state = if inventory.is_complete(expected) {
            "complete".green()
        } else {
            "incomplete".yellow()
        };
        info!("{} of {} file records linked: {}", inventory.links, expected, state);
    }
    Ok(0)
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" | "YES" => return Ok(true),
            "N" | "NO" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
