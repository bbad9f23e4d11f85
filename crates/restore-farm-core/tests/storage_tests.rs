use rusqlite::{params, Connection};
use std::path::Path;
use tempfile::tempdir;

use restore_farm_core::storage::models::{FileRecord, RecordId, DIRECTORY_MIME_TYPE};
use restore_farm_core::storage::MetadataStore;

fn create_store(path: &Path, with_mime: bool) -> Connection {
    let conn = Connection::open(path).unwrap();
    if with_mime {
        conn.execute_batch(
            "CREATE TABLE Files (id TEXT PRIMARY KEY, parentID TEXT, contentID TEXT, \
             name TEXT, mimeType TEXT, size INTEGER, cTime INTEGER, mTime INTEGER)",
        )
        .unwrap();
    } else {
        conn.execute_batch(
            "CREATE TABLE Files (id INTEGER PRIMARY KEY, parentID INTEGER, contentID TEXT, name TEXT)",
        )
        .unwrap();
    }
    conn
}

fn read_all(store: &MetadataStore) -> Vec<FileRecord> {
    let mut records = Vec::new();
    store
        .for_each_record(|record| -> Result<(), rusqlite::Error> {
            records.push(record);
            Ok(())
        })
        .unwrap();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
}

#[test]
fn test_minimal_schema_derives_directories_from_content() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("index.db");
    let conn = create_store(&db_path, false);
    conn.execute_batch(
        "INSERT INTO Files VALUES (1, NULL, NULL, 'root');
         INSERT INTO Files VALUES (2, 1, '', 'empty-content');
         INSERT INTO Files VALUES (3, 1, 'a22236cwsmelmd4on2qs2jdf', 'vacation.jpg');",
    )
    .unwrap();
    drop(conn);

    let store = MetadataStore::open(&db_path).unwrap();
    let stats = store.store_stats().unwrap();
    assert_eq!(stats.total_records, 3);
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.total_directories, 2);

    let records = read_all(&store);
    assert!(records[0].is_directory);
    assert!(records[1].is_directory);
    assert_eq!(records[1].content(), None);
    assert!(!records[2].is_directory);
    assert_eq!(records[2].parent_id, Some(RecordId::from(1i64)));
    assert_eq!(records[2].content(), Some("a22236cwsmelmd4on2qs2jdf"));
}

#[test]
fn test_mime_type_and_optional_columns() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("index.db");
    let conn = create_store(&db_path, true);
    conn.execute(
        "INSERT INTO Files VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params!["a", "", None::<String>, "Photos", DIRECTORY_MIME_TYPE, 0, 1_600_000_000, 1_600_000_100],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO Files VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params!["b", "a", None::<String>, "placeholder", "image/jpeg", 42, None::<i64>, None::<i64>],
    )
    .unwrap();
    drop(conn);

    let store = MetadataStore::open(&db_path).unwrap();
    let records = read_all(&store);
    let photos = &records[0];
    assert!(photos.is_directory);
    assert_eq!(photos.parent_id, None);
    assert_eq!(photos.created_at, Some(1_600_000_000));
    assert_eq!(photos.modified_at, Some(1_600_000_100));

    // Not a directory by mime type, even without content.
    let placeholder = &records[1];
    assert!(!placeholder.is_directory);
    assert_eq!(placeholder.size, 42);
    assert_eq!(placeholder.parent_id, Some(RecordId::new("a")));
}

#[test]
fn test_account_root_lookup() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("index.db");
    let conn = create_store(&db_path, false);
    conn.execute_batch(
        "INSERT INTO Files VALUES (5, NULL, NULL, 'Shared');
         INSERT INTO Files VALUES (7, NULL, NULL, 'auth0|5f1e2d');
         INSERT INTO Files VALUES (8, 7, NULL, 'auth0|nested');",
    )
    .unwrap();
    drop(conn);

    let store = MetadataStore::open(&db_path).unwrap();
    let (id, name) = store.find_account_root().unwrap().unwrap();
    assert_eq!(id, RecordId::from(7i64));
    assert_eq!(name, "auth0|5f1e2d");
}

#[test]
fn test_store_is_opened_read_only() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("index.db");
    drop(create_store(&db_path, false));

    let store = MetadataStore::open(&db_path).unwrap();
    let result = store
        .connection()
        .execute("INSERT INTO Files VALUES (1, NULL, NULL, 'x')", []);
    assert!(result.is_err());
}

#[test]
fn test_rows_without_id_are_skipped() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE Files (id TEXT, parentID TEXT, contentID TEXT, name TEXT);
         INSERT INTO Files VALUES (NULL, NULL, 'c1', 'ghost');
         INSERT INTO Files VALUES ('', NULL, 'c2', 'ghost2');
         INSERT INTO Files VALUES ('10', NULL, 'c3', 'real');",
    )
    .unwrap();
    let store = MetadataStore::from_connection(conn).unwrap();
    let records = read_all(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "real");
}
