/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations, and every method may be called from rayon workers.
pub trait ProgressReporter: Send + Sync {
    fn on_read_start(&self, _total_records: u64) {}
    fn on_read_progress(&self, _records_read: u64) {}
    fn on_read_complete(&self, _records_read: u64, _duration_secs: f64) {}
    fn on_resolve_complete(&self, _resolved: usize, _unresolved: usize, _duration_secs: f64) {}
    fn on_farm_start(&self, _total_entries: usize) {}
    fn on_farm_progress(&self, _entries_done: usize, _total_entries: usize) {}
    fn on_farm_complete(&self, _entries_done: usize, _duration_secs: f64) {}
    fn on_walk_progress(&self, _paths_scanned: usize) {}
    fn on_walk_complete(&self, _paths_scanned: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
