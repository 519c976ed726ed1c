//! SQLite driver.
//!
//! # Responsibility
//! - Create the database directory, open and probe the file connection.
//! - Bootstrap the `settings` table and run the application migrations.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`, verified by reading it back.
//! - `:memory:` addresses skip storage preparation.

use super::accessor::{DatabaseAccessor, DbConnection};
use super::driver::DatabaseDriver;
use super::init::StartupBudget;
use super::migrations::{self, parse_version, MigrationReport, MigrationSet, VersionStore};
use super::schema::{catalog_error, BaseSchema};
use super::{BackendError, DbError, DbResult, DB_VERSION_KEY, SETTINGS_TABLE};
use crate::config::DatabaseConfig;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

pub const DRIVER_ID: &str = "sqlite";

/// Address opening a private in-memory database.
pub const MEMORY_ADDRESS: &str = ":memory:";

/// SQLite-backed driver.
#[derive(Debug)]
pub struct SqliteDriver {
    base_schema: BaseSchema<Connection>,
    migrations: MigrationSet<Connection>,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteDriver {
    /// Driver with the application schema migrations.
    pub fn new() -> Self {
        Self::with_migrations(app_migrations())
    }

    /// Driver with custom migrations; `settings` is seeded with their baseline.
    pub fn with_migrations(migrations: MigrationSet<Connection>) -> Self {
        let baseline = migrations.baseline();
        let base_schema = BaseSchema::new().table(SETTINGS_TABLE, move |conn: &mut Connection| {
            create_settings_table(conn, baseline)
        });
        Self {
            base_schema,
            migrations,
        }
    }

    pub fn migrations(&self) -> &MigrationSet<Connection> {
        &self.migrations
    }
}

impl DatabaseDriver for SqliteDriver {
    fn driver_id(&self) -> &str {
        DRIVER_ID
    }

    fn target_version(&self) -> u32 {
        self.migrations.target_version()
    }

    fn validate_migrations(&self) -> DbResult<()> {
        self.migrations.validate()
    }

    fn connect(&self, config: &DatabaseConfig, budget: &StartupBudget) -> DbResult<DbConnection> {
        let started_at = Instant::now();
        info!(
            "event=db_connect module=db status=start driver={} mode={}",
            DRIVER_ID,
            connection_mode(&config.address)
        );

        let result = prepare_storage(&config.address).and_then(|()| {
            open_connection(config, budget).map_err(|source| DbError::ConnectionFailed {
                driver: DRIVER_ID.to_string(),
                source,
            })
        });

        match result {
            Ok(conn) => Ok(DbConnection::Sqlite(conn)),
            Err(err) => {
                error!(
                    "event=db_connect module=db status=error driver={} duration_ms={} error={}",
                    DRIVER_ID,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn create_tables(&self, accessor: &DatabaseAccessor) -> DbResult<Vec<String>> {
        self.migrations.validate()?;
        accessor.with_connection(|conn| {
            let conn = conn.as_sqlite_mut()?;
            let existing = existing_tables(conn).map_err(catalog_error)?;
            self.base_schema.create_missing(conn, &existing)
        })
    }

    fn migrate_tables(
        &self,
        accessor: &DatabaseAccessor,
        budget: &StartupBudget,
    ) -> DbResult<MigrationReport> {
        accessor.with_connection(|conn| {
            migrations::run(conn.as_sqlite_mut()?, &SettingsTable, &self.migrations, budget)
        })
    }

    fn schema_version(&self, accessor: &DatabaseAccessor) -> DbResult<u32> {
        accessor.with_connection(|conn| SettingsTable.read_version(conn.as_sqlite_mut()?))
    }
}

/// Schema version record stored in the `settings` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsTable;

impl VersionStore<Connection> for SettingsTable {
    fn read_version(&self, conn: &mut Connection) -> DbResult<u32> {
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE id = ?1;",
                [DB_VERSION_KEY],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(|err| DbError::VersionRead {
                reason: "settings query failed".to_string(),
                source: Some(err.into()),
            })?;

        match value {
            Some(raw) => parse_version(raw.as_deref()),
            None => Err(DbError::VersionRead {
                reason: format!("settings row `{DB_VERSION_KEY}` is missing"),
                source: None,
            }),
        }
    }

    fn write_version(&self, conn: &mut Connection, version: u32) -> Result<(), BackendError> {
        let updated = conn.execute(
            "UPDATE settings SET value = ?1 WHERE id = ?2;",
            params![version.to_string(), DB_VERSION_KEY],
        )?;
        if updated != 1 {
            return Err(BackendError::Message(format!(
                "expected to update one `{DB_VERSION_KEY}` row, updated {updated}"
            )));
        }
        Ok(())
    }
}

/// Application schema, baseline 0.
pub fn app_migrations() -> MigrationSet<Connection> {
    MigrationSet::new()
        .step("create_sessions", |conn: &mut Connection| {
            conn.execute_batch(include_str!("0001_sessions.sql"))?;
            Ok(())
        })
        .step("index_sessions_expires_at", |conn: &mut Connection| {
            conn.execute_batch(include_str!("0002_sessions_expiry_index.sql"))?;
            Ok(())
        })
        .step("create_users", |conn: &mut Connection| {
            conn.execute_batch(include_str!("0003_users.sql"))?;
            if !column_exists(conn, "sessions", "user_id")? {
                conn.execute_batch(
                    "ALTER TABLE sessions
                        ADD COLUMN user_id INTEGER REFERENCES users(id) ON DELETE CASCADE;",
                )?;
            }
            Ok(())
        })
}

/// Returns `true` when `table` has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, BackendError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2;",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn connection_mode(address: &str) -> &'static str {
    if address == MEMORY_ADDRESS {
        "memory"
    } else {
        "file"
    }
}

fn prepare_storage(address: &str) -> DbResult<()> {
    if address == MEMORY_ADDRESS {
        return Ok(());
    }
    let Some(parent) = Path::new(address)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    else {
        return Ok(());
    };
    std::fs::create_dir_all(parent).map_err(|source| DbError::StorageUnavailable {
        path: parent.to_path_buf(),
        source,
    })
}

fn open_connection(
    config: &DatabaseConfig,
    budget: &StartupBudget,
) -> Result<Connection, BackendError> {
    let conn = if config.address == MEMORY_ADDRESS {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.address)?
    };
    conn.busy_timeout(config.busy_timeout())?;

    let probe: i64 = conn.query_row("SELECT 1;", [], |row| row.get(0))?;
    if probe != 1 {
        return Err(BackendError::Message(format!(
            "connection probe returned {probe}"
        )));
    }

    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(BackendError::Message(
            "foreign key enforcement could not be enabled".to_string(),
        ));
    }

    budget.check()?;
    Ok(conn)
}

fn existing_tables(conn: &Connection) -> Result<BTreeSet<String>, BackendError> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table';")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(names)
}

fn create_settings_table(conn: &mut Connection, baseline: u32) -> Result<(), BackendError> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE settings (
            id TEXT PRIMARY KEY NOT NULL,
            value TEXT DEFAULT ''
        );",
    )?;
    tx.execute(
        "INSERT INTO settings (id, value) VALUES (?1, ?2);",
        params![DB_VERSION_KEY, baseline.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}
