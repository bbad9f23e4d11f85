use crate::error::Error;
use config::{Config, File as ConfigFile};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// How an orphan path relates to the protect/cleanup rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Protected,
    CleanupEligible,
    Unmanaged,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Classification::Protected => "protected",
            Classification::CleanupEligible => "cleanup-eligible",
            Classification::Unmanaged => "unmanaged",
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    source: String,
    pattern: Pattern,
    /// The pattern with trailing `/` and `*` removed, matched against
    /// every ancestor prefix of a path.
    prefix: Option<Pattern>,
}

impl Rule {
    fn new(source: &str) -> Result<Self, Error> {
        let invalid = |err: glob::PatternError| Error::RuleValidation {
            pattern: source.to_string(),
            source: err,
        };
        let pattern = Pattern::new(source).map_err(invalid)?;
        let trimmed = source.trim_end_matches(['/', '*']);
        let prefix = if trimmed.is_empty() {
            None
        } else {
            Some(Pattern::new(trimmed).map_err(invalid)?)
        };
        Ok(Self {
            source: source.to_string(),
            pattern,
            prefix,
        })
    }

    fn matches(&self, path: &str) -> bool {
        if self.pattern.matches(path) {
            return true;
        }
        let Some(prefix) = &self.prefix else {
            return false;
        };
        path.match_indices('/')
            .map(|(idx, _)| &path[..idx])
            .chain(std::iter::once(path))
            .any(|ancestor| prefix.matches(ancestor))
    }
}

/// Ordered protect and cleanup patterns. Protect always wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    protect: Vec<Rule>,
    cleanup: Vec<Rule>,
}

impl RuleSet {
    pub fn new<S: AsRef<str>>(protect: &[S], cleanup: &[S]) -> Result<Self, Error> {
        Ok(Self {
            protect: compile(protect)?,
            cleanup: compile(cleanup)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.protect.is_empty() && self.cleanup.is_empty()
    }

    pub fn protect_patterns(&self) -> impl Iterator<Item = &str> {
        self.protect.iter().map(|r| r.source.as_str())
    }

    pub fn cleanup_patterns(&self) -> impl Iterator<Item = &str> {
        self.cleanup.iter().map(|r| r.source.as_str())
    }

    /// Classify a `/`-separated destination-relative path, returning the
    /// first pattern that decided it.
    pub fn classify(&self, path: &str) -> (Classification, Option<&str>) {
        if let Some(rule) = self.protect.iter().find(|r| r.matches(path)) {
            return (Classification::Protected, Some(&rule.source));
        }
        if let Some(rule) = self.cleanup.iter().find(|r| r.matches(path)) {
            return (Classification::CleanupEligible, Some(&rule.source));
        }
        (Classification::Unmanaged, None)
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Rule>, Error> {
    patterns.iter().map(|p| Rule::new(p.as_ref())).collect()
}

/// Per-scope rule override inside a rules file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScopeRules {
    /// Destination-relative directory the override applies to.
    pub path: String,
    pub protect: Vec<String>,
    pub cleanup: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFormat {
    Toml,
    Json,
}

impl WriteFormat {
    /// No extension means TOML; anything the loader reads but cannot be
    /// written back is refused.
    fn for_path(path: &Path) -> Result<Self, Error> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            None | Some("toml") => Ok(WriteFormat::Toml),
            Some("json") => Ok(WriteFormat::Json),
            Some(_) => Err(Error::RulesFormat {
                path: path.display().to_string(),
            }),
        }
    }
}

/// Declarative cleanup rules plus the bookkeeping of the last run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesFile {
    pub version: u32,
    pub destination: String,
    pub protect: Vec<String>,
    pub cleanup: Vec<String>,
    pub scopes: Vec<ScopeRules>,
    pub last_scan: Option<String>,
    pub orphans_found: u64,
    pub orphans_deleted: u64,
}

impl Default for RulesFile {
    fn default() -> Self {
        Self {
            version: 1,
            destination: String::new(),
            protect: Vec::new(),
            cleanup: Vec::new(),
            scopes: Vec::new(),
            last_scan: None,
            orphans_found: 0,
            orphans_deleted: 0,
        }
    }
}

impl RulesFile {
    /// Load a TOML, YAML or JSON rules file (format from the extension).
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            debug!("No rules file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let rules = Config::builder()
            .add_source(ConfigFile::from(path))
            .build()?
            .try_deserialize::<RulesFile>()?;
        debug!(
            "Loaded {} protect and {} cleanup patterns from {}",
            rules.protect.len(),
            rules.cleanup.len(),
            path.display()
        );
        Ok(rules)
    }

    /// Stamp `last_scan` and write the file back in the format its
    /// extension names. YAML and other read-only formats are refused
    /// before anything changes.
    pub fn save(&mut self, path: &Path) -> Result<(), Error> {
        let format = WriteFormat::for_path(path)?;
        self.last_scan = Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        let body = match format {
            WriteFormat::Toml => toml::to_string_pretty(self)?,
            WriteFormat::Json => serde_json::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, body)?;
        info!("Rules saved to {}", path.display());
        Ok(())
    }

    /// Add command-line patterns, skipping ones already present.
    pub fn merge_patterns(&mut self, protect: &[String], cleanup: &[String]) {
        merge_unique(&mut self.protect, protect);
        merge_unique(&mut self.cleanup, cleanup);
    }

    pub fn rule_set(&self) -> Result<RuleSet, Error> {
        RuleSet::new(self.protect.as_slice(), self.cleanup.as_slice())
    }

    /// Rules for one scope: its override when present, else the top-level lists.
    pub fn rule_set_for(&self, scope_path: &str) -> Result<RuleSet, Error> {
        let scope_path = scope_path.trim_matches('/');
        match self
            .scopes
            .iter()
            .find(|s| s.path.trim_matches('/') == scope_path)
        {
            Some(scope) => RuleSet::new(scope.protect.as_slice(), scope.cleanup.as_slice()),
            None => self.rule_set(),
        }
    }
}

fn merge_unique(target: &mut Vec<String>, extra: &[String]) {
    for pattern in extra {
        if !target.contains(pattern) {
            target.push(pattern.clone());
        }
    }
}
