use indicatif::{ProgressBar, ProgressStyle};
use restore_farm_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Read phase: bar (record count known from the store)
/// - Farm phase: bar over planned entries
/// - Destination walk: spinner (size unknown upfront)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn counting_bar(template: &str, total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(template) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICKS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICKS));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl ProgressReporter for CliReporter {
    fn on_read_start(&self, total_records: u64) {
        self.set_bar(Self::counting_bar(
            "  {spinner:.cyan} Reading [{bar:30.cyan/dim}] {pos}/{len} records",
            total_records,
        ));
    }

    fn on_read_progress(&self, records_read: u64) {
        self.with_bar(|pb| pb.set_position(records_read));
    }

    fn on_read_complete(&self, records_read: u64, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Read complete: {} records in {:.2}s",
            records_read, duration_secs
        );
    }

    fn on_resolve_complete(&self, resolved: usize, unresolved: usize, duration_secs: f64) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m Resolve complete: {} paths, {} unresolved in {:.2}s",
            resolved, unresolved, duration_secs
        );
    }

    fn on_farm_start(&self, total_entries: usize) {
        self.set_bar(Self::counting_bar(
            "  {spinner:.cyan} Linking [{bar:30.cyan/dim}] {pos}/{len} entries ({eta} remaining)",
            total_entries as u64,
        ));
    }

    fn on_farm_progress(&self, entries_done: usize, total_entries: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total_entries as u64) {
                pb.set_length(total_entries as u64);
            }
            pb.set_position(entries_done as u64);
        });
    }

    fn on_farm_complete(&self, entries_done: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Farm complete: {} entries in {:.2}s",
            entries_done, duration_secs
        );
    }

    fn on_walk_progress(&self, paths_scanned: usize) {
        let needs_spinner = self.bar.lock().map(|g| g.is_none()).unwrap_or(false);
        if needs_spinner {
            self.set_bar(Self::spinner("Walking destination..."));
        }
        self.with_bar(|pb| pb.set_message(format!("Walking... {} files seen", paths_scanned)));
    }

    fn on_walk_complete(&self, paths_scanned: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Walk complete: {} files in {:.2}s",
            paths_scanned, duration_secs
        );
    }
}
