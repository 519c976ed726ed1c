//! Storage bootstrap for the appbase web-application scaffold.
//!
//! The application picks a compiled-in database driver by identifier, and
//! [`db::init`] returns a [`DatabaseAccessor`] whose schema is migrated to the
//! latest version the driver knows. Request handlers share that accessor.

pub mod config;
pub mod db;
pub mod logging;

pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use db::{
    global_registry, init, init_with_registry, BackendError, BaseSchema, DatabaseAccessor,
    DatabaseDriver, DbConnection, DbError, DbResult, DriverRegistry, MigrationReport,
    MigrationSet, StartupBudget, VersionStore,
};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status, LogTarget};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
