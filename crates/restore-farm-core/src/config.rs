use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::farm::FarmOptions;
use crate::resolver::{ResolverOptions, SanitizeOptions};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite metadata store (`index.db` on the device).
    pub db_path: String,
    /// Content-addressed file store, bucketed by first character of the content id.
    pub source_root: String,
    pub farm_root: String,
    pub dest_root: String,
    /// Replace `|` with `-` in names (NTFS/SMB destinations reject it).
    pub sanitize_pipes: bool,
    /// Forwarded to the transfer tool through the farm manifest.
    pub checksum: bool,
    pub strip_account_root: bool,
    /// Worker threads for farm construction. 0 lets rayon decide.
    pub workers: usize,
    pub error_rate_threshold: f64,
    pub min_sample: usize,
    pub op_timeout_secs: Option<u64>,
    /// Stop after this many file entries. 0 means no limit.
    pub limit: usize,
    pub rules_path: String,
    pub audit_db_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "index.db".to_string(),
            source_root: String::new(),
            farm_root: String::new(),
            dest_root: String::new(),
            sanitize_pipes: false,
            checksum: true,
            strip_account_root: true,
            workers: 0,
            error_rate_threshold: 0.5,
            min_sample: 100,
            op_timeout_secs: None,
            limit: 0,
            rules_path: "cleanup_rules.toml".to_string(),
            audit_db_path: "cleanup_audit.db".to_string(),
        }
    }
}

impl AppConfig {
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_secs.map(Duration::from_secs)
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            sanitize: SanitizeOptions {
                substitute: self.sanitize_pipes.then_some(('|', '-')),
            },
            ..ResolverOptions::default()
        }
    }

    pub fn farm_options(&self) -> FarmOptions {
        FarmOptions {
            dry_run: false,
            workers: self.workers,
            error_rate_threshold: self.error_rate_threshold,
            min_sample: self.min_sample,
            limit: (self.limit > 0).then_some(self.limit),
            op_timeout: self.op_timeout(),
        }
    }
}

/// Reads `Config.toml` (optional) and `RESTORE_FARM_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("RESTORE_FARM"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

pub fn load_configuration_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::from(path))
        .add_source(Environment::with_prefix("RESTORE_FARM"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Drop scope prefixes nested inside another prefix in the list, so that a
/// destination subtree is never walked twice. Prefixes are `/`-separated and
/// relative; the empty prefix covers everything.
pub fn non_overlapping_prefixes(prefixes: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for prefix in prefixes {
        let prefix = prefix.trim_matches('/').to_string();
        if result.iter().any(|kept| is_within(&prefix, kept)) {
            continue;
        }
        result.retain(|kept| !is_within(kept, &prefix));
        result.push(prefix);
    }

    result
}

fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}
