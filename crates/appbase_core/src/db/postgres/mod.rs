//! PostgreSQL driver, compiled with the `postgres` feature.
//!
//! # Responsibility
//! - Connect with the configured DSN within the startup budget.
//! - Bootstrap the `settings` table and run the application migrations.
//!
//! # Invariants
//! - Returned clients run with `session_replication_role = origin`, so
//!   foreign key triggers are enforced.

use super::accessor::{DatabaseAccessor, DbConnection};
use super::driver::DatabaseDriver;
use super::init::StartupBudget;
use super::migrations::{self, parse_version, MigrationReport, MigrationSet, VersionStore};
use super::schema::{catalog_error, BaseSchema};
use super::{BackendError, DbError, DbResult, DB_VERSION_KEY, SETTINGS_TABLE};
use crate::config::DatabaseConfig;
use ::postgres::{Client, Config as PgConfig, NoTls};
use log::{error, info};
use std::collections::BTreeSet;
use std::time::Instant;

pub const DRIVER_ID: &str = "postgres";

/// PostgreSQL-backed driver.
#[derive(Debug)]
pub struct PostgresDriver {
    base_schema: BaseSchema<Client>,
    migrations: MigrationSet<Client>,
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresDriver {
    /// Driver with the application schema migrations.
    pub fn new() -> Self {
        Self::with_migrations(app_migrations())
    }

    /// Driver with custom migrations; `settings` is seeded with their baseline.
    pub fn with_migrations(migrations: MigrationSet<Client>) -> Self {
        let baseline = migrations.baseline();
        let base_schema = BaseSchema::new().table(SETTINGS_TABLE, move |client: &mut Client| {
            create_settings_table(client, baseline)
        });
        Self {
            base_schema,
            migrations,
        }
    }

    pub fn migrations(&self) -> &MigrationSet<Client> {
        &self.migrations
    }
}

impl DatabaseDriver for PostgresDriver {
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
            "event=db_connect module=db status=start driver={}",
            DRIVER_ID
        );

        match open_client(config, budget) {
            Ok(client) => Ok(DbConnection::Postgres(client)),
            Err(source) => {
                error!(
                    "event=db_connect module=db status=error driver={} duration_ms={} error={}",
                    DRIVER_ID,
                    started_at.elapsed().as_millis(),
                    source
                );
                Err(DbError::ConnectionFailed {
                    driver: DRIVER_ID.to_string(),
                    source,
                })
            }
        }
    }

    fn create_tables(&self, accessor: &DatabaseAccessor) -> DbResult<Vec<String>> {
        self.migrations.validate()?;
        accessor.with_connection(|conn| {
            let client = conn.as_postgres_mut()?;
            let existing = existing_tables(client).map_err(catalog_error)?;
            self.base_schema.create_missing(client, &existing)
        })
    }

    fn migrate_tables(
        &self,
        accessor: &DatabaseAccessor,
        budget: &StartupBudget,
    ) -> DbResult<MigrationReport> {
        accessor.with_connection(|conn| {
            migrations::run(
                conn.as_postgres_mut()?,
                &SettingsTable,
                &self.migrations,
                budget,
            )
        })
    }

    fn schema_version(&self, accessor: &DatabaseAccessor) -> DbResult<u32> {
        accessor.with_connection(|conn| SettingsTable.read_version(conn.as_postgres_mut()?))
    }
}

/// Schema version record stored in the `settings` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsTable;

impl VersionStore<Client> for SettingsTable {
    fn read_version(&self, client: &mut Client) -> DbResult<u32> {
        match fetch_version_value(client) {
            Ok(Some(raw)) => parse_version(raw.as_deref()),
            Ok(None) => Err(DbError::VersionRead {
                reason: format!("settings row `{DB_VERSION_KEY}` is missing"),
                source: None,
            }),
            Err(err) => Err(DbError::VersionRead {
                reason: "settings query failed".to_string(),
                source: Some(err),
            }),
        }
    }

    fn write_version(&self, client: &mut Client, version: u32) -> Result<(), BackendError> {
        let updated = client.execute(
            "UPDATE settings SET value = $1 WHERE id = $2",
            &[&version.to_string(), &DB_VERSION_KEY],
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
pub fn app_migrations() -> MigrationSet<Client> {
    MigrationSet::new()
        .step("create_sessions", |client: &mut Client| {
            client.batch_execute(include_str!("0001_sessions.sql"))?;
            Ok(())
        })
        .step("index_sessions_expires_at", |client: &mut Client| {
            client.batch_execute(include_str!("0002_sessions_expiry_index.sql"))?;
            Ok(())
        })
        .step("create_users", |client: &mut Client| {
            client.batch_execute(include_str!("0003_users.sql"))?;
            Ok(())
        })
}

fn fetch_version_value(client: &mut Client) -> Result<Option<Option<String>>, BackendError> {
    let row = client.query_opt(
        "SELECT value FROM settings WHERE id = $1",
        &[&DB_VERSION_KEY],
    )?;
    match row {
        Some(row) => Ok(Some(row.try_get::<_, Option<String>>(0)?)),
        None => Ok(None),
    }
}

fn open_client(config: &DatabaseConfig, budget: &StartupBudget) -> Result<Client, BackendError> {
    let mut pg_config: PgConfig = config.address.parse()?;
    budget.check()?;

    let remaining = budget.remaining();
    let connect_timeout = pg_config
        .get_connect_timeout()
        .map_or(remaining, |timeout| (*timeout).min(remaining));
    pg_config.connect_timeout(connect_timeout);

    let mut client = pg_config.connect(NoTls)?;

    let probe: i32 = client.query_one("SELECT 1", &[])?.try_get(0)?;
    if probe != 1 {
        return Err(BackendError::Message(format!(
            "connection probe returned {probe}"
        )));
    }

    // Changing the role needs elevated privileges; the default is already origin.
    if replication_role(&mut client)? != "origin" {
        client.batch_execute("SET session_replication_role = 'origin'")?;
    }
    let role = replication_role(&mut client)?;
    if role != "origin" {
        return Err(BackendError::Message(format!(
            "foreign key enforcement could not be enabled, session_replication_role={role}"
        )));
    }

    budget.check()?;
    Ok(client)
}

fn replication_role(client: &mut Client) -> Result<String, BackendError> {
    Ok(client
        .query_one("SHOW session_replication_role", &[])?
        .try_get(0)?)
}

fn existing_tables(client: &mut Client) -> Result<BTreeSet<String>, BackendError> {
    let rows = client.query(
        "SELECT table_name::text
         FROM information_schema.tables
         WHERE table_schema = current_schema()",
        &[],
    )?;
    let mut names = BTreeSet::new();
    for row in rows {
        names.insert(row.try_get::<_, String>(0)?);
    }
    Ok(names)
}

fn create_settings_table(client: &mut Client, baseline: u32) -> Result<(), BackendError> {
    let mut tx = client.transaction()?;
    tx.batch_execute(
        "CREATE TABLE settings (
            id TEXT PRIMARY KEY NOT NULL,
            value TEXT DEFAULT ''
        )",
    )?;
    tx.execute(
        "INSERT INTO settings (id, value) VALUES ($1, $2)",
        &[&DB_VERSION_KEY, &baseline.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}
