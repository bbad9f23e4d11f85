use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "restore-farm")]
#[command(about = "Rebuild a device's file tree as a symlink farm and clean up orphans", long_about = None)]
pub struct Cli {
    /// Read settings from this file instead of ./Config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve the metadata store and build the symlink farm
    BuildFarm(BuildFarmArgs),
    /// Resolve paths only and report records that cannot be placed
    Diagnose(DiagnoseArgs),
    /// Find files in the destination the metadata does not know and delete them
    Cleanup(CleanupArgs),
    /// Count links, broken links and directories in an existing farm
    InspectFarm(InspectFarmArgs),
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Metadata database (index.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Replace '|' with '-' in names
    #[arg(long)]
    pub sanitize_pipes: bool,

    /// Keep the account root folder as a path segment
    #[arg(long)]
    pub keep_account_root: bool,
}

#[derive(Debug, Args)]
pub struct BuildFarmArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Content-addressed source directory
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Directory the symlink farm is built in
    #[arg(long)]
    pub farm: Option<PathBuf>,

    /// Classify entries without touching the filesystem
    #[arg(long)]
    pub dry_run: bool,

    /// Stop after this many file entries
    #[arg(long)]
    pub limit: Option<usize>,

    /// Worker threads
    #[arg(long)]
    pub workers: Option<usize>,

    /// Write the entry manifest as JSON to this path
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Rebuild even when the farm already looks complete
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Print at most this many unresolved records
    #[arg(long, default_value_t = 20)]
    pub show: usize,

    /// Print every unresolved record as JSON instead
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Destination tree to clean
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Pattern to protect from cleanup (repeatable)
    #[arg(long)]
    pub protect: Vec<String>,

    /// Pattern whose orphans may be deleted (repeatable)
    #[arg(long = "cleanup-folder")]
    pub cleanup_folder: Vec<String>,

    /// Rules file (TOML, YAML or JSON)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// List what would be deleted and stop
    #[arg(long)]
    pub dry_run: bool,

    /// Confirm deletion without prompting
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct InspectFarmArgs {
    /// Farm directory (defaults to the configured farm_root)
    #[arg(long)]
    pub farm: Option<PathBuf>,

    /// Also compare against the store's file count
    #[arg(long)]
    pub db: Option<PathBuf>,
}
