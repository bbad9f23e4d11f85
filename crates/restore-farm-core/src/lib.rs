pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod farm;
pub mod platform;
pub mod progress;
pub mod resolver;
pub mod storage;

pub use config::AppConfig;
pub use engine::{CleanupEngine, CleanupScan, FarmEngine, FarmRunSummary, ResolveResult};
pub use error::Error;
pub use platform::CancelToken;
pub use progress::{ProgressReporter, SilentReporter};
