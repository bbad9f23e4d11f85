#![cfg(unix)]

use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use restore_farm_core::farm::{self, AbortReason, EntryStatus, FarmBuilder, FarmOptions};
use restore_farm_core::resolver::{PathResolver, ResolverOptions, UnresolvedReason};
use restore_farm_core::storage::models::{FileRecord, RecordId};
use restore_farm_core::{AppConfig, FarmEngine, SilentReporter};

type Row<'a> = (i64, Option<i64>, &'a str, Option<&'a str>);

fn write_store(path: &Path, rows: &[Row<'_>]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE Files (id INTEGER PRIMARY KEY, parentID INTEGER, contentID TEXT, name TEXT)",
    )
    .unwrap();
    for (id, parent, name, content) in rows {
        conn.execute(
            "INSERT INTO Files (id, parentID, contentID, name) VALUES (?1, ?2, ?3, ?4)",
            params![id, parent, content, name],
        )
        .unwrap();
    }
}

fn write_blob(source: &Path, content_id: &str) {
    let bucket = source.join(&content_id[..1]);
    fs::create_dir_all(&bucket).unwrap();
    fs::write(bucket.join(content_id), content_id).unwrap();
}

struct Fixture {
    _tmp: tempfile::TempDir,
    config: AppConfig,
}

/// Layout:
///   root/
///     2024/
///       vacation.jpg  -> source/a/a22236cwsmelmd4on2qs2jdf
///     IMG_0001.jpg (id 10), IMG_0001.jpg (id 11)
///     empty/
fn scenario_fixture() -> Fixture {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("index.db");
    let source = tmp.path().join("source");
    let farm = tmp.path().join("farm");

    write_store(
        &db_path,
        &[
            (1, None, "root", None),
            (2, Some(1), "2024", None),
            (3, Some(2), "vacation.jpg", Some("a22236cwsmelmd4on2qs2jdf")),
            (10, Some(1), "IMG_0001.jpg", Some("b111")),
            (11, Some(1), "IMG_0001.jpg", Some("c222")),
            (12, Some(1), "empty", None),
        ],
    );
    for cid in ["a22236cwsmelmd4on2qs2jdf", "b111", "c222"] {
        write_blob(&source, cid);
    }

    let config = AppConfig {
        db_path: db_path.to_string_lossy().into_owned(),
        source_root: source.to_string_lossy().into_owned(),
        farm_root: farm.to_string_lossy().into_owned(),
        workers: 4,
        ..AppConfig::default()
    };
    Fixture { _tmp: tmp, config }
}

#[test]
fn test_scenario_farm_layout() {
    let fixture = scenario_fixture();
    let summary = FarmEngine::new(fixture.config.clone())
        .run(&SilentReporter)
        .unwrap();

    assert!(!summary.is_aborted());
    assert_eq!(summary.report.count(EntryStatus::Created), 4);
    assert_eq!(summary.plan_links, 3);
    assert_eq!(summary.plan_directories, 1);

    let farm = Path::new(&fixture.config.farm_root);
    let source = fs::canonicalize(&fixture.config.source_root).unwrap();
    assert_eq!(
        fs::read_link(farm.join("root/2024/vacation.jpg")).unwrap(),
        source.join("a").join("a22236cwsmelmd4on2qs2jdf")
    );
    assert_eq!(
        fs::read_link(farm.join("root/IMG_0001.jpg")).unwrap(),
        source.join("b").join("b111")
    );
    assert_eq!(
        fs::read_link(farm.join("root/IMG_0001.jpg (2)")).unwrap(),
        source.join("c").join("c222")
    );
    assert!(farm.join("root/empty").is_dir());
    assert_eq!(
        fs::read_to_string(farm.join("root/2024/vacation.jpg")).unwrap(),
        "a22236cwsmelmd4on2qs2jdf"
    );
}

#[test]
fn test_second_run_is_all_already_correct() {
    let fixture = scenario_fixture();
    let engine = FarmEngine::new(fixture.config.clone());
    engine.run(&SilentReporter).unwrap();
    let second = engine.run(&SilentReporter).unwrap();

    assert_eq!(second.report.count(EntryStatus::AlreadyCorrect), 4);
    assert_eq!(second.report.completed, 4);
    assert!(second
        .report
        .entries
        .iter()
        .all(|e| e.status == EntryStatus::AlreadyCorrect));
}

#[test]
fn test_dry_run_leaves_filesystem_untouched() {
    let fixture = scenario_fixture();
    let summary = FarmEngine::new(fixture.config.clone())
        .with_dry_run(true)
        .run(&SilentReporter)
        .unwrap();

    assert!(summary.report.dry_run);
    assert_eq!(summary.report.count(EntryStatus::ToCreate), 4);
    assert!(!Path::new(&fixture.config.farm_root).exists());
}

#[test]
fn test_stale_link_is_replaced() {
    let fixture = scenario_fixture();
    let farm = Path::new(&fixture.config.farm_root);
    fs::create_dir_all(farm.join("root/2024")).unwrap();
    std::os::unix::fs::symlink("/nowhere/old", farm.join("root/2024/vacation.jpg")).unwrap();

    let summary = FarmEngine::new(fixture.config.clone())
        .run(&SilentReporter)
        .unwrap();
    assert_eq!(summary.report.count(EntryStatus::Replaced), 1);
    assert_eq!(summary.report.count(EntryStatus::Created), 3);
    assert!(farm.join("root/2024/vacation.jpg").exists());
}

#[test]
fn test_missing_blobs_fail_per_entry_without_aborting() {
    let fixture = scenario_fixture();
    fs::remove_file(Path::new(&fixture.config.source_root).join("c/c222")).unwrap();

    let summary = FarmEngine::new(fixture.config.clone())
        .run(&SilentReporter)
        .unwrap();
    assert!(!summary.is_aborted());
    assert_eq!(summary.report.count(EntryStatus::Failed), 1);
    assert_eq!(summary.report.count(EntryStatus::Created), 3);
}

#[test]
fn test_limit_caps_file_entries() {
    let mut fixture = scenario_fixture();
    fixture.config.limit = 1;
    let summary = FarmEngine::new(fixture.config.clone())
        .run(&SilentReporter)
        .unwrap();
    assert_eq!(summary.plan_links, 1);
    assert_eq!(summary.truncated_by_limit, 2);
}

#[test]
fn test_cycle_does_not_block_the_rest_of_the_tree() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("index.db");
    write_store(
        &db_path,
        &[
            (1, Some(2), "A", None),
            (2, Some(1), "B", None),
            (3, Some(1), "inside.txt", Some("d1")),
            (4, None, "ok", None),
            (5, Some(4), "fine.txt", Some("d2")),
            (6, Some(99), "dangling.txt", Some("d3")),
        ],
    );
    let source = tmp.path().join("source");
    write_blob(&source, "d2");

    let config = AppConfig {
        db_path: db_path.to_string_lossy().into_owned(),
        source_root: source.to_string_lossy().into_owned(),
        farm_root: tmp.path().join("farm").to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    let summary = FarmEngine::new(config).run(&SilentReporter).unwrap();

    let counts = summary.resolve.unresolved_counts();
    assert_eq!(counts["cycle"], 2);
    assert_eq!(counts["ancestor-unresolved"], 1);
    assert_eq!(counts["dangling-parent"], 1);
    assert_eq!(summary.report.count(EntryStatus::Created), 1);
    assert!(tmp.path().join("farm/ok/fine.txt").exists());
}

#[test]
fn test_resolution_is_independent_of_arrival_order() {
    let mut records = vec![
        FileRecord::directory(1i64, None, "root"),
        FileRecord::file(11i64, Some(RecordId::from(1i64)), "IMG_0001.jpg", "c11"),
        FileRecord::file(10i64, Some(RecordId::from(1i64)), "IMG_0001.jpg", "c10"),
        FileRecord::file(12i64, Some(RecordId::from(1i64)), "IMG_0001.jpg (2)", "c12"),
        FileRecord::file(13i64, Some(RecordId::from(1i64)), "img|0001.jpg", "c13"),
        FileRecord::file(14i64, Some(RecordId::from(1i64)), "img-0001.jpg", "c14"),
        FileRecord::directory(20i64, Some(RecordId::from(21i64)), "loop-a"),
        FileRecord::directory(21i64, Some(RecordId::from(20i64)), "loop-b"),
    ];
    let options = ResolverOptions {
        sanitize: restore_farm_core::resolver::SanitizeOptions {
            substitute: Some(('|', '-')),
        },
        ..ResolverOptions::default()
    };

    let mut baseline = None;
    for rotation in 0..records.len() {
        records.rotate_left(1);
        let mut order = records.clone();
        if rotation % 2 == 1 {
            order.reverse();
        }
        let mut resolver = PathResolver::new(options.clone());
        resolver.ingest_all(order);
        let resolution = resolver.finish();
        let paths: Vec<(RecordId, String)> = resolution
            .iter()
            .map(|(record, path)| (record.id.clone(), path.relative()))
            .collect();
        let unresolved: Vec<(RecordId, UnresolvedReason)> = resolution
            .unresolved
            .iter()
            .map(|u| (u.record_id.clone(), u.reason.clone()))
            .collect();

        match &baseline {
            None => baseline = Some((paths, unresolved)),
            Some(expected) => assert_eq!(&(paths, unresolved), expected),
        }
    }

    let (paths, _) = baseline.unwrap();
    let lookup = |id: i64| {
        paths
            .iter()
            .find(|(rid, _)| *rid == RecordId::from(id))
            .map(|(_, p)| p.as_str())
            .unwrap()
    };
    assert_eq!(lookup(10), "root/IMG_0001.jpg");
    assert_eq!(lookup(11), "root/IMG_0001.jpg (3)");
    assert_eq!(lookup(12), "root/IMG_0001.jpg (2)");
    assert_eq!(lookup(13), "root/img-0001.jpg");
    assert_eq!(lookup(14), "root/img-0001.jpg (2)");
}

#[test]
fn test_error_rate_abort_reports_remaining_entries() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir_all(&source).unwrap();

    let records: Vec<FileRecord> = (1..=50i64)
        .map(|i| FileRecord::file(i, None, &format!("f{:03}", i), &format!("x{}", i)))
        .collect();
    let mut resolver = PathResolver::new(ResolverOptions::default());
    resolver.ingest_all(records);
    let resolution = resolver.finish();
    let plan = farm::plan_farm(&resolution, None);

    let options = FarmOptions {
        workers: 1,
        min_sample: 5,
        error_rate_threshold: 0.2,
        ..FarmOptions::default()
    };
    let report = FarmBuilder::new(&source, &tmp.path().join("farm"), options)
        .unwrap()
        .build(&plan.tasks, &SilentReporter)
        .unwrap();

    match report.aborted {
        Some(AbortReason::ErrorRate { failed, processed }) => {
            assert!(processed >= 5);
            assert_eq!(failed, processed);
        }
        other => panic!("expected error-rate abort, got {:?}", other),
    }
    assert_eq!(report.completed + report.remaining, 50);
    assert!(report.remaining > 0);
}
