//! Pluggable database accessor with versioned schema migration.
//!
//! # Responsibility
//! - Select a compiled-in backend driver by identifier.
//! - Connect, bootstrap the base schema, and migrate it to the target version.
//! - Hand the ready connection to the rest of the application.
//!
//! # Invariants
//! - Schema version is tracked in the `settings` table (`id = 'db_version'`).
//! - Callers never receive an accessor before every startup stage succeeded.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub mod accessor;
pub mod driver;
mod init;
pub mod migrations;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod registry;
pub mod schema;
pub mod sqlite;

pub use accessor::{DatabaseAccessor, DbConnection};
pub use driver::DatabaseDriver;
pub use init::{init, init_with_registry, StartupBudget};
pub use migrations::{MigrationReport, MigrationSet, VersionStore};
pub use registry::{global_registry, DriverRegistry};
pub use schema::BaseSchema;

pub type DbResult<T> = Result<T, DbError>;

/// Reserved table holding the schema version record.
pub const SETTINGS_TABLE: &str = "settings";

/// Key of the schema version row inside [`SETTINGS_TABLE`].
pub const DB_VERSION_KEY: &str = "db_version";

/// Failure reported by a backend while executing a statement.
#[derive(Debug)]
pub enum BackendError {
    Sqlite(rusqlite::Error),
    #[cfg(feature = "postgres")]
    Postgres(::postgres::Error),
    Timeout {
        limit: Duration,
    },
    Message(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            #[cfg(feature = "postgres")]
            Self::Postgres(err) => write!(f, "{err}"),
            Self::Timeout { limit } => {
                write!(f, "startup timeout of {}ms exceeded", limit.as_millis())
            }
            Self::Message(message) => write!(f, "{message}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            #[cfg(feature = "postgres")]
            Self::Postgres(err) => Some(err),
            Self::Timeout { .. } | Self::Message(_) => None,
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

#[cfg(feature = "postgres")]
impl From<::postgres::Error> for BackendError {
    fn from(value: ::postgres::Error) -> Self {
        Self::Postgres(value)
    }
}

/// Startup and accessor errors.
///
/// Every startup variant carries the stage context (driver, table, or
/// version transition) so the entry point can report it without wrapping.
#[derive(Debug)]
pub enum DbError {
    StorageUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    ConnectionFailed {
        driver: String,
        source: BackendError,
    },
    SchemaInit {
        table: String,
        source: BackendError,
    },
    VersionRead {
        reason: String,
        source: Option<BackendError>,
    },
    VersionMismatch {
        recorded: u32,
        target: u32,
    },
    MigrationStep {
        from: u32,
        to: u32,
        source: BackendError,
    },
    VersionWrite {
        version: u32,
        source: BackendError,
    },
    InvalidMigrationPlan {
        baseline: u32,
        target: u32,
        available: usize,
    },
    DriverNotFound(String),
    DuplicateDriver(String),
    InvalidDriverId(String),
    WrongBackend {
        expected: &'static str,
        actual: &'static str,
    },
    ConnectionPoisoned,
    Backend(BackendError),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageUnavailable { path, source } => write!(
                f,
                "storage location `{}` is unavailable: {source}",
                path.display()
            ),
            Self::ConnectionFailed { driver, source } => {
                write!(f, "failed to connect with driver `{driver}`: {source}")
            }
            Self::SchemaInit { table, source } => {
                write!(f, "failed to create table `{table}`: {source}")
            }
            Self::VersionRead { reason, .. } => {
                write!(f, "failed to read database version: {reason}")
            }
            Self::VersionMismatch { recorded, target } => write!(
                f,
                "database schema version {recorded} is newer than supported {target}"
            ),
            Self::MigrationStep { from, to, source } => {
                write!(f, "migration from version {from} to {to} failed: {source}")
            }
            Self::VersionWrite { version, source } => {
                write!(f, "failed to record database version {version}: {source}")
            }
            Self::InvalidMigrationPlan {
                baseline,
                target,
                available,
            } => write!(
                f,
                "invalid migration plan: baseline {baseline}, target {target}, {available} registered slots"
            ),
            Self::DriverNotFound(id) => write!(f, "database driver not found: {id}"),
            Self::DuplicateDriver(id) => write!(f, "database driver already registered: {id}"),
            Self::InvalidDriverId(id) => write!(f, "database driver id is invalid: `{id}`"),
            Self::WrongBackend { expected, actual } => write!(
                f,
                "driver expected a {expected} connection but received {actual}"
            ),
            Self::ConnectionPoisoned => write!(f, "database connection lock is poisoned"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StorageUnavailable { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. }
            | Self::SchemaInit { source, .. }
            | Self::MigrationStep { source, .. }
            | Self::VersionWrite { source, .. } => Some(source),
            Self::VersionRead { source, .. } => {
                source.as_ref().map(|err| err as &(dyn Error + 'static))
            }
            Self::Backend(err) => Some(err),
            Self::VersionMismatch { .. }
            | Self::InvalidMigrationPlan { .. }
            | Self::DriverNotFound(_)
            | Self::DuplicateDriver(_)
            | Self::InvalidDriverId(_)
            | Self::WrongBackend { .. }
            | Self::ConnectionPoisoned => None,
        }
    }
}

impl From<BackendError> for DbError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Backend(BackendError::Sqlite(value))
    }
}

#[cfg(feature = "postgres")]
impl From<::postgres::Error> for DbError {
    fn from(value: ::postgres::Error) -> Self {
        Self::Backend(BackendError::Postgres(value))
    }
}
