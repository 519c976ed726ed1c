use appbase_core::config::DatabaseConfig;
use appbase_core::db::sqlite::{SqliteDriver, MEMORY_ADDRESS};
use appbase_core::db::{
    init, init_with_registry, BackendError, DatabaseAccessor, DatabaseDriver, DbError,
    DriverRegistry, MigrationSet, StartupBudget,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn init_fresh_database_applies_app_schema() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    let accessor = init(&config).unwrap();

    assert_eq!(accessor.driver_name(), "sqlite");
    assert_eq!(accessor.backend(), "sqlite");
    assert!(dir.path().join("data").is_dir());
    assert_eq!(recorded_version(&accessor), "3");
    assert_table_exists(&accessor, "settings");
    assert_table_exists(&accessor, "sessions");
    assert_table_exists(&accessor, "users");
    assert!(column_exists(&accessor, "sessions", "user_id"));
    assert_eq!(pragma(&accessor, "foreign_keys"), 1);
}

#[test]
fn init_twice_on_same_database_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    drop(init(&config).unwrap());
    let accessor = init(&config).unwrap();

    let driver = SqliteDriver::new();
    assert_eq!(driver.schema_version(&accessor).unwrap(), 3);
    let report = driver
        .migrate_tables(&accessor, &StartupBudget::new(Duration::from_secs(5)))
        .unwrap();
    assert!(report.is_noop());
    assert!(report.applied.is_empty());
}

#[test]
fn app_schema_cascades_session_deletes() {
    let accessor = init(&DatabaseConfig::new("sqlite", MEMORY_ADDRESS)).unwrap();
    accessor
        .execute_batch(
            "INSERT INTO users (id, username, created_at) VALUES (1, 'ada', 0);
             INSERT INTO sessions (id, created_at, expires_at, user_id) VALUES ('s1', 0, 10, 1);
             DELETE FROM users WHERE id = 1;",
        )
        .unwrap();

    let remaining: i64 = accessor
        .with_sqlite(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sessions;", [], |row| row.get(0))?))
        .unwrap();
    assert_eq!(remaining, 0);

    let orphan = accessor.execute_batch(
        "INSERT INTO sessions (id, created_at, expires_at, user_id) VALUES ('s2', 0, 10, 42);",
    );
    assert!(orphan.is_err(), "foreign keys must be enforced");
}

#[test]
fn create_tables_is_idempotent() {
    let driver = SqliteDriver::new();
    let accessor = init(&DatabaseConfig::new("sqlite", MEMORY_ADDRESS)).unwrap();

    assert!(driver.create_tables(&accessor).unwrap().is_empty());
    assert!(driver.create_tables(&accessor).unwrap().is_empty());

    let rows: i64 = accessor
        .with_sqlite(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM settings;", [], |row| row.get(0))?))
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(recorded_version(&accessor), "3");
}

#[test]
fn fresh_database_runs_both_custom_steps() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with(SqliteDriver::with_migrations(two_steps(&calls)));

    let accessor = init_with_registry(&registry, &config).unwrap();

    assert_eq!(recorded_version(&accessor), "2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_table_exists(&accessor, "alpha");
    assert!(column_exists(&accessor, "alpha", "beta"));
}

#[test]
fn database_at_target_invokes_no_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with(SqliteDriver::with_migrations(two_steps(&calls)));

    drop(init_with_registry(&registry, &config).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let accessor = init_with_registry(&registry, &config).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(recorded_version(&accessor), "2");
}

#[test]
fn failing_step_keeps_recorded_version() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let migrations = MigrationSet::new()
        .step("create_alpha", |conn: &mut Connection| {
            conn.execute_batch("CREATE TABLE IF NOT EXISTS alpha (id INTEGER PRIMARY KEY);")?;
            Ok(())
        })
        .step("alter_missing", |conn: &mut Connection| {
            conn.execute_batch("ALTER TABLE missing ADD COLUMN beta TEXT;")?;
            Ok(())
        });
    let registry = registry_with(SqliteDriver::with_migrations(migrations));

    let err = init_with_registry(&registry, &config).unwrap_err();
    match err {
        DbError::MigrationStep { from, to, .. } => assert_eq!((from, to), (1, 2)),
        other => panic!("unexpected error: {other}"),
    }

    let conn = Connection::open(&config.address).unwrap();
    let version: String = conn
        .query_row("SELECT value FROM settings WHERE id = 'db_version';", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, "0");
    let alpha: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'alpha';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(alpha, 1, "completed steps are not rolled back");
}

#[test]
fn newer_recorded_version_returns_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    drop(init(&config).unwrap());

    set_recorded_version(&config, Some("99"));

    match init(&config).unwrap_err() {
        DbError::VersionMismatch { recorded, target } => {
            assert_eq!(recorded, 99);
            assert_eq!(target, SqliteDriver::new().target_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn corrupt_or_missing_version_record_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    drop(init(&config).unwrap());

    set_recorded_version(&config, Some("three"));
    assert!(matches!(init(&config).unwrap_err(), DbError::VersionRead { .. }));

    set_recorded_version(&config, None);
    let err = init(&config).unwrap_err();
    assert!(matches!(err, DbError::VersionRead { .. }));
    assert!(err.to_string().contains("db_version"));
}

#[test]
fn baseline_version_seeds_fresh_record() {
    let calls = Arc::new(AtomicUsize::new(0));
    let driver = SqliteDriver::with_migrations(two_steps(&calls).with_baseline(2));
    let registry = registry_with(driver);

    let accessor =
        init_with_registry(&registry, &DatabaseConfig::new("sqlite", MEMORY_ADDRESS)).unwrap();

    assert_eq!(recorded_version(&accessor), "2");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn baseline_beyond_target_never_reaches_storage() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let mut registry = DriverRegistry::new();

    let err = registry
        .register(Arc::new(SqliteDriver::with_migrations(
            MigrationSet::new().with_baseline(5),
        )))
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::InvalidMigrationPlan {
            baseline: 5,
            target: 0,
            ..
        }
    ));

    let err = init_with_registry(&registry, &config).unwrap_err();
    assert!(matches!(err, DbError::DriverNotFound(id) if id == "sqlite"));
    assert!(!Path::new(&config.address).exists());
}

#[test]
fn unknown_driver_is_not_found() {
    let err = init(&DatabaseConfig::new("mysql", MEMORY_ADDRESS)).unwrap_err();
    assert!(matches!(err, DbError::DriverNotFound(id) if id == "mysql"));
}

#[test]
fn uncreatable_storage_directory_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file").unwrap();
    let address = blocker.join("data").join("app.sqlite3");

    let err = init(&DatabaseConfig::new("sqlite", address.to_str().unwrap())).unwrap_err();
    assert!(matches!(err, DbError::StorageUnavailable { .. }));
}

#[test]
fn exhausted_startup_budget_fails_connect() {
    let mut config = DatabaseConfig::new("sqlite", MEMORY_ADDRESS);
    config.startup_timeout_ms = 0;

    match init(&config).unwrap_err() {
        DbError::ConnectionFailed { driver, source } => {
            assert_eq!(driver, "sqlite");
            assert!(matches!(source, BackendError::Timeout { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn file_config(dir: &Path) -> DatabaseConfig {
    let path = dir.join("data").join("app.sqlite3");
    DatabaseConfig::new("sqlite", path.to_str().unwrap())
}

fn registry_with(driver: SqliteDriver) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(driver)).unwrap();
    registry
}

fn two_steps(calls: &Arc<AtomicUsize>) -> MigrationSet<Connection> {
    let first = Arc::clone(calls);
    let second = Arc::clone(calls);
    MigrationSet::new()
        .step("create_alpha", move |conn: &mut Connection| {
            first.fetch_add(1, Ordering::SeqCst);
            conn.execute_batch("CREATE TABLE IF NOT EXISTS alpha (id INTEGER PRIMARY KEY);")?;
            Ok(())
        })
        .step("add_alpha_beta", move |conn: &mut Connection| {
            second.fetch_add(1, Ordering::SeqCst);
            conn.execute_batch("ALTER TABLE alpha ADD COLUMN beta TEXT;")?;
            Ok(())
        })
}

fn set_recorded_version(config: &DatabaseConfig, value: Option<&str>) {
    let conn = Connection::open(&config.address).unwrap();
    match value {
        Some(value) => conn
            .execute(
                "UPDATE settings SET value = ?1 WHERE id = 'db_version';",
                [value],
            )
            .unwrap(),
        None => conn
            .execute("DELETE FROM settings WHERE id = 'db_version';", [])
            .unwrap(),
    };
}

fn recorded_version(accessor: &DatabaseAccessor) -> String {
    accessor
        .with_sqlite(|conn| {
            Ok(conn.query_row(
                "SELECT value FROM settings WHERE id = 'db_version';",
                [],
                |row| row.get(0),
            )?)
        })
        .unwrap()
}

fn pragma(accessor: &DatabaseAccessor, name: &str) -> i64 {
    accessor
        .with_sqlite(|conn| Ok(conn.query_row(&format!("PRAGMA {name};"), [], |row| row.get(0))?))
        .unwrap()
}

fn column_exists(accessor: &DatabaseAccessor, table: &str, column: &str) -> bool {
    accessor
        .with_sqlite(|conn| appbase_core::db::sqlite::column_exists(conn, table, column))
        .unwrap()
}

fn assert_table_exists(accessor: &DatabaseAccessor, table_name: &str) {
    let exists: i64 = accessor
        .with_sqlite(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM sqlite_master
                    WHERE type = 'table' AND name = ?1
                );",
                [table_name],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
