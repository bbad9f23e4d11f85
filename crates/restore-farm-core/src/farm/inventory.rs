use crate::progress::ProgressReporter;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Share of the store's file records a farm must hold to count as complete.
pub const COMPLETENESS_RATIO: f64 = 0.9;

/// What an existing farm directory holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FarmInventory {
    pub links: u64,
    /// Symlinks whose target no longer exists.
    pub broken_links: u64,
    pub directories: u64,
    pub other_files: u64,
    pub unreadable: u64,
}

impl FarmInventory {
    /// True when the farm already carries most of the expected file links.
    pub fn is_complete(&self, expected_files: u64) -> bool {
        expected_files > 0 && self.links as f64 >= expected_files as f64 * COMPLETENESS_RATIO
    }
}

/// Count the entries of a farm without following its links.
pub fn scan_farm(farm_root: &Path, reporter: &dyn ProgressReporter) -> FarmInventory {
    let start = Instant::now();
    let mut inventory = FarmInventory::default();
    if !farm_root.is_dir() {
        return inventory;
    }

    let mut scanned = 0usize;
    for entry in WalkDir::new(farm_root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Unreadable farm entry: {}", err);
                inventory.unreadable += 1;
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            // metadata() follows the link; failure means a dangling target.
            if entry.path().metadata().is_ok() {
                inventory.links += 1;
            } else {
                inventory.broken_links += 1;
            }
        } else if file_type.is_dir() {
            inventory.directories += 1;
        } else {
            inventory.other_files += 1;
        }

        scanned += 1;
        if scanned % 10_000 == 0 {
            reporter.on_walk_progress(scanned);
        }
    }

    reporter.on_walk_complete(scanned, start.elapsed().as_secs_f64());
    debug!("Farm inventory of {}: {:?}", farm_root.display(), inventory);
    inventory
}
