//! Accessor handle shared with request handlers after startup.
//!
//! # Responsibility
//! - Own the live backend connection produced by a driver.
//! - Serialize statement execution so one handle can be shared across threads.
//!
//! # Invariants
//! - The accessor returned by `init` has a migrated schema and referential
//!   integrity enforcement enabled.
//! - `driver_name` always names the driver that produced the connection.

use super::{BackendError, DbError, DbResult};
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::sync::Mutex;

/// Open connection for one of the compiled-in backends.
pub enum DbConnection {
    Sqlite(Connection),
    #[cfg(feature = "postgres")]
    Postgres(::postgres::Client),
}

impl DbConnection {
    /// Returns the backend name of this connection.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgres",
        }
    }

    /// Returns the SQLite connection, or `WrongBackend` for other backends.
    pub fn as_sqlite_mut(&mut self) -> DbResult<&mut Connection> {
        match self {
            Self::Sqlite(conn) => Ok(conn),
            #[cfg(feature = "postgres")]
            other => Err(DbError::WrongBackend {
                expected: "sqlite",
                actual: other.backend(),
            }),
        }
    }

    /// Returns the Postgres client, or `WrongBackend` for other backends.
    #[cfg(feature = "postgres")]
    pub fn as_postgres_mut(&mut self) -> DbResult<&mut ::postgres::Client> {
        match self {
            Self::Postgres(client) => Ok(client),
            other => Err(DbError::WrongBackend {
                expected: "postgres",
                actual: other.backend(),
            }),
        }
    }

    /// Executes one or more statements without parameters.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        match self {
            Self::Sqlite(conn) => conn.execute_batch(sql)?,
            #[cfg(feature = "postgres")]
            Self::Postgres(client) => client.batch_execute(sql)?,
        }
        Ok(())
    }
}

impl Debug for DbConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbConnection").field(&self.backend()).finish()
    }
}

/// Ready-to-use database handle.
///
/// Only [`crate::db::init`] hands one out, after table creation and
/// migration succeeded. Callers cannot wrap a raw connection themselves:
///
/// ```compile_fail
/// use appbase_core::db::{DatabaseAccessor, DbConnection};
///
/// let conn = rusqlite::Connection::open_in_memory().unwrap();
/// let _ = DatabaseAccessor::new("sqlite", DbConnection::Sqlite(conn));
/// ```
pub struct DatabaseAccessor {
    driver_name: String,
    backend: &'static str,
    conn: Mutex<DbConnection>,
}

impl DatabaseAccessor {
    /// Wraps a connection produced by the driver named `driver_name`.
    pub(crate) fn new(driver_name: impl Into<String>, conn: DbConnection) -> Self {
        Self {
            driver_name: driver_name.into(),
            backend: conn.backend(),
            conn: Mutex::new(conn),
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Runs `f` with exclusive access to the underlying connection.
    ///
    /// # Errors
    /// - Returns `ConnectionPoisoned` when a previous holder panicked.
    /// - Propagates any error returned by `f`.
    pub fn with_connection<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut DbConnection) -> DbResult<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| DbError::ConnectionPoisoned)?;
        f(&mut guard)
    }

    /// Runs `f` against the SQLite connection.
    pub fn with_sqlite<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Connection) -> Result<T, BackendError>,
    {
        self.with_connection(|conn| Ok(f(conn.as_sqlite_mut()?)?))
    }

    /// Executes one or more statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.with_connection(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Consumes the accessor and returns the owned connection.
    pub fn into_connection(self) -> DbResult<DbConnection> {
        self.conn.into_inner().map_err(|_| DbError::ConnectionPoisoned)
    }
}

impl Debug for DatabaseAccessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseAccessor")
            .field("driver_name", &self.driver_name)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
