use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use restore_farm_core::cleanup::{
    Classification, CleanupSession, CleanupState, OrphanDetector, RuleSet, RulesFile, Scope,
};
use restore_farm_core::resolver::CanonicalSet;
use restore_farm_core::storage::AuditLog;
use restore_farm_core::{AppConfig, CleanupEngine, Error, SilentReporter};

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, rel).unwrap();
}

/// Store knows Photos/a.jpg and Downloads/keep.zip; the destination also
/// holds Photos/old.bak and Downloads/notes.txt.
fn setup(root: &Path) -> (AppConfig, std::path::PathBuf) {
    let db_path = root.join("index.db");
    let conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE Files (id INTEGER PRIMARY KEY, parentID INTEGER, contentID TEXT, name TEXT);
         INSERT INTO Files VALUES (1, NULL, NULL, 'Photos');
         INSERT INTO Files VALUES (2, 1, 'c1', 'a.jpg');
         INSERT INTO Files VALUES (3, NULL, NULL, 'Downloads');
         INSERT INTO Files VALUES (4, 3, 'c2', 'keep.zip');",
    )
    .unwrap();
    drop(conn);

    let dest = root.join("dest");
    touch(&dest, "Photos/a.jpg");
    touch(&dest, "Photos/old.bak");
    touch(&dest, "Downloads/keep.zip");
    touch(&dest, "Downloads/notes.txt");

    let config = AppConfig {
        db_path: db_path.to_string_lossy().into_owned(),
        dest_root: dest.to_string_lossy().into_owned(),
        audit_db_path: root.join("audit.db").to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    (config, dest)
}

fn scenario_rules() -> RulesFile {
    RulesFile {
        protect: vec!["Downloads/*".to_string()],
        cleanup: vec!["Photos/*".to_string()],
        ..RulesFile::default()
    }
}

#[test]
fn test_scenario_dry_run_lists_without_deleting() {
    let tmp = tempdir().unwrap();
    let (config, dest) = setup(tmp.path());

    let scan = CleanupEngine::new(config)
        .scan(&dest, &scenario_rules(), &SilentReporter)
        .unwrap();
    assert_eq!(scan.orphans_found(), 2);
    assert_eq!(scan.canonical_files, 2);

    let report = &scan.reports[0];
    let old = report
        .candidates
        .iter()
        .find(|c| c.path == "Photos/old.bak")
        .unwrap();
    assert_eq!(old.classification, Classification::CleanupEligible);
    assert_eq!(old.rule.as_deref(), Some("Photos/*"));
    assert_eq!(report.count(Classification::Protected), 1);

    let mut session = CleanupSession::new(scan.plan, true);
    let plan = session.preview().unwrap();
    assert_eq!(plan.deletions.len(), 1);
    assert_eq!(plan.deletions[0].path, "Photos/old.bak");
    assert_eq!(session.finish_preview().unwrap(), CleanupState::DryRunDone);
    assert!(dest.join("Photos/old.bak").exists());
}

#[test]
fn test_scenario_confirmed_run_deletes_and_audits() {
    let tmp = tempdir().unwrap();
    let (config, dest) = setup(tmp.path());
    let audit = AuditLog::open(Path::new(&config.audit_db_path)).unwrap();

    let scan = CleanupEngine::new(config)
        .scan(&dest, &scenario_rules(), &SilentReporter)
        .unwrap();
    let mut session = CleanupSession::new(scan.plan, false);
    session.preview().unwrap();
    session.finish_preview().unwrap();

    assert!(matches!(
        session.execute(false, &audit),
        Err(Error::ConfirmationRequired)
    ));
    assert!(dest.join("Photos/old.bak").exists());

    let outcome = session.execute(true, &audit).unwrap();
    assert_eq!(outcome.deleted, 1);
    assert!(!dest.join("Photos/old.bak").exists());
    assert!(dest.join("Photos/a.jpg").exists());
    assert!(dest.join("Downloads/notes.txt").exists());

    let entries = audit.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].relative_path, "Photos/old.bak");
    assert_eq!(entries[0].matched_rule.as_deref(), Some("Photos/*"));
    assert_eq!(entries[0].result.as_deref(), Some("deleted"));
    assert!(entries[0].completed_at.is_some());
}

#[test]
fn test_protect_always_wins() {
    let protect = ["*", "Photos/*", "*.jpg", "Photos"];
    let cleanup = ["*", "Photos/*", "*.jpg", "Photos/2023/*"];
    let paths = [
        "Photos/a.jpg",
        "Photos/2023/b.jpg",
        "Photos/2023/deep/c.png",
        "other.jpg",
        "Photos",
    ];

    for p in protect {
        for c in cleanup {
            let rules = RuleSet::new(&[p], &[c]).unwrap();
            for path in paths {
                let protected = RuleSet::new(&[p], &[]).unwrap().classify(path).0
                    == Classification::Protected;
                let (class, _) = rules.classify(path);
                if protected {
                    assert_eq!(class, Classification::Protected, "{} vs {} on {}", p, c, path);
                } else {
                    assert_ne!(class, Classification::Protected);
                }
            }
        }
    }
}

#[test]
fn test_orphans_are_exactly_the_set_difference() {
    let tmp = tempdir().unwrap();
    let dest = tmp.path();
    let on_disk = [
        "a/1.txt", "a/2.txt", "a/b/3.txt", "c/4.txt", "c/d/e/5.txt", "6.txt",
    ];
    let canonical_files = ["a/1.txt", "a/b/3.txt", "c/d/e/5.txt", "z/missing.txt"];
    for path in on_disk {
        touch(dest, path);
    }

    let canonical = CanonicalSet::from_files(canonical_files);
    let rules = RuleSet::new(&["c/*"], &["a/*"]).unwrap();
    let report = OrphanDetector::new(&canonical, &rules)
        .detect(&Scope::new(dest, ""), &SilentReporter)
        .unwrap();

    let expected: BTreeSet<&str> = on_disk
        .iter()
        .copied()
        .filter(|p| !canonical_files.contains(p))
        .collect();
    let found: BTreeSet<&str> = report
        .candidates
        .iter()
        .map(|c| c.path.as_str())
        .collect();
    assert_eq!(found, expected);

    let total = report.count(Classification::Protected)
        + report.count(Classification::CleanupEligible)
        + report.count(Classification::Unmanaged);
    assert_eq!(total, report.candidates.len());
    assert_eq!(report.files_scanned, on_disk.len());
}

#[test]
fn test_rules_file_stats_written_back() {
    let tmp = tempdir().unwrap();
    let (config, dest) = setup(tmp.path());
    let rules_path = tmp.path().join("cleanup_rules.toml");

    let mut rules = RulesFile::load(&rules_path).unwrap();
    rules.merge_patterns(&["Downloads/*".to_string()], &["Photos/*".to_string()]);
    rules.destination = dest.to_string_lossy().into_owned();

    let scan = CleanupEngine::new(config)
        .scan(&dest, &rules, &SilentReporter)
        .unwrap();
    rules.orphans_found = scan.orphans_found() as u64;
    rules.save(&rules_path).unwrap();

    let reloaded = RulesFile::load(&rules_path).unwrap();
    assert_eq!(reloaded.orphans_found, 2);
    assert_eq!(reloaded.cleanup, vec!["Photos/*"]);
    assert!(reloaded.last_scan.is_some());
}
