use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid glob pattern '{pattern}': {source}")]
    RuleValidation {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Deletion requires explicit confirmation")]
    ConfirmationRequired,

    #[error("Cleanup cannot move from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Farm root '{path}' is not writable: {reason}")]
    FarmRootUnwritable { path: String, reason: String },

    #[error("Cannot write rules back to '{path}': only .toml and .json files are writable")]
    RulesFormat { path: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}
