use repokit_core::db::migrations::latest_version;
use repokit_core::db::{open_db, open_db_in_memory};
use repokit_core::{next_sequence_value, Database, DatabaseConfig, DbError, RepoError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "repokit_sequences");
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repokit.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "repokit_sequences");
    let journal_mode: String = conn_second
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode, "wal");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(matches!(
        Database::open(DatabaseConfig::file(&path)),
        Err(RepoError::Store(DbError::UnsupportedSchemaVersion { .. }))
    ));
}

#[test]
fn sequences_survive_reopening_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sequences.db");

    {
        let db = Database::open_path(&path).unwrap();
        let values: Vec<i64> = db
            .transaction(|scope| {
                Ok(vec![
                    next_sequence_value(scope, "orders")?,
                    next_sequence_value(scope, "orders")?,
                    next_sequence_value(scope, "invoices")?,
                ])
            })
            .unwrap();
        assert_eq!(values, vec![1, 2, 1]);
    }

    let db = Database::open_path(&path).unwrap();
    let next = db
        .transaction(|scope| next_sequence_value(scope, "orders"))
        .unwrap();
    assert_eq!(next, 3);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
