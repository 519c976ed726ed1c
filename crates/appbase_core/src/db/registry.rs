//! Driver registry keyed by driver identifier.
//!
//! # Responsibility
//! - Map identifiers to the backends compiled into this build.
//! - Resolve the configured identifier during startup.
//!
//! # Invariants
//! - All registrations happen before the first lookup; the process-wide
//!   registry is built once and never mutated afterwards.
//! - Duplicate identifiers are rejected, never overwritten.

use super::driver::DatabaseDriver;
use super::sqlite::SqliteDriver;
use super::{DbError, DbResult};
use log::debug;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;

static GLOBAL_REGISTRY: OnceCell<DriverRegistry> = OnceCell::new();

/// Registered backend drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry holding every backend enabled at compile time.
    pub fn with_builtin_drivers() -> DbResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SqliteDriver::new()))?;
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(super::postgres::PostgresDriver::new()))?;
        Ok(registry)
    }

    /// Registers one driver under its `driver_id()`.
    ///
    /// # Errors
    /// - `InvalidDriverId` when the id is empty or not `[a-z0-9_-]+`.
    /// - `DuplicateDriver` when the id is already registered.
    /// - `InvalidMigrationPlan` when the driver's migrations cannot reach its
    ///   target version.
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) -> DbResult<()> {
        let driver_id = driver.driver_id().trim().to_string();
        if !is_valid_driver_id(&driver_id) {
            return Err(DbError::InvalidDriverId(driver_id));
        }
        if self.drivers.contains_key(driver_id.as_str()) {
            return Err(DbError::DuplicateDriver(driver_id));
        }
        driver.validate_migrations()?;

        debug!(
            "event=driver_register module=db status=ok driver={} target_version={}",
            driver_id,
            driver.target_version()
        );
        self.drivers.insert(driver_id, driver);
        Ok(())
    }

    /// Returns the driver registered under `driver_id`.
    ///
    /// # Errors
    /// - `DriverNotFound` when the backend is unknown or not compiled in.
    pub fn lookup(&self, driver_id: &str) -> DbResult<Arc<dyn DatabaseDriver>> {
        let normalized = driver_id.trim();
        self.drivers
            .get(normalized)
            .cloned()
            .ok_or_else(|| DbError::DriverNotFound(normalized.to_string()))
    }

    pub fn contains(&self, driver_id: &str) -> bool {
        self.drivers.contains_key(driver_id.trim())
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Returns sorted driver ids.
    pub fn driver_ids(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}

/// Returns the process-wide registry, building it on first use.
///
/// # Errors
/// - Propagates builtin registration failures; the process must not start.
pub fn global_registry() -> DbResult<&'static DriverRegistry> {
    GLOBAL_REGISTRY.get_or_try_init(DriverRegistry::with_builtin_drivers)
}

fn is_valid_driver_id(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::{global_registry, DriverRegistry};
    use crate::config::DatabaseConfig;
    use crate::db::sqlite::SqliteDriver;
    use crate::db::{
        DatabaseAccessor, DatabaseDriver, DbConnection, DbError, DbResult, MigrationReport,
        MigrationSet, StartupBudget,
    };
    use std::sync::Arc;

    struct MockDriver {
        driver_id: String,
    }

    impl MockDriver {
        fn new(driver_id: &str) -> Self {
            Self {
                driver_id: driver_id.to_string(),
            }
        }
    }

    impl DatabaseDriver for MockDriver {
        fn driver_id(&self) -> &str {
            &self.driver_id
        }

        fn target_version(&self) -> u32 {
            0
        }

        fn connect(
            &self,
            _config: &DatabaseConfig,
            _budget: &StartupBudget,
        ) -> DbResult<DbConnection> {
            Ok(DbConnection::Sqlite(rusqlite::Connection::open_in_memory()?))
        }

        fn create_tables(&self, _accessor: &DatabaseAccessor) -> DbResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn migrate_tables(
            &self,
            _accessor: &DatabaseAccessor,
            _budget: &StartupBudget,
        ) -> DbResult<MigrationReport> {
            Ok(MigrationReport {
                from: 0,
                to: 0,
                applied: Vec::new(),
            })
        }

        fn schema_version(&self, _accessor: &DatabaseAccessor) -> DbResult<u32> {
            Ok(0)
        }
    }

    #[test]
    fn lookup_returns_the_registered_instance() {
        let mut registry = DriverRegistry::new();
        let driver: Arc<dyn DatabaseDriver> = Arc::new(MockDriver::new("mock"));
        registry
            .register(Arc::clone(&driver))
            .expect("driver should register");

        let found = registry.lookup("mock").expect("driver should be found");
        assert!(Arc::ptr_eq(&found, &driver));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_invalid_or_duplicate_driver_id() {
        let mut registry = DriverRegistry::new();
        let invalid = registry.register(Arc::new(MockDriver::new("My Driver")));
        assert!(matches!(invalid, Err(DbError::InvalidDriverId(_))));
        let blank = registry.register(Arc::new(MockDriver::new("   ")));
        assert!(matches!(blank, Err(DbError::InvalidDriverId(_))));

        registry
            .register(Arc::new(MockDriver::new("mock")))
            .expect("first driver should register");
        let duplicate = registry.register(Arc::new(MockDriver::new("mock")));
        assert!(matches!(duplicate, Err(DbError::DuplicateDriver(id)) if id == "mock"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_driver_with_invalid_migration_plan() {
        let mut registry = DriverRegistry::new();
        let driver = SqliteDriver::with_migrations(MigrationSet::new().with_baseline(5));

        let err = registry
            .register(Arc::new(driver))
            .expect_err("baseline beyond target should be rejected");
        assert!(matches!(
            err,
            DbError::InvalidMigrationPlan {
                baseline: 5,
                target: 0,
                ..
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_driver_is_not_found() {
        let registry = DriverRegistry::new();
        assert!(registry.is_empty());
        let err = registry.lookup("mysql").err().expect("lookup should fail");
        assert!(matches!(err, DbError::DriverNotFound(id) if id == "mysql"));
    }

    #[test]
    fn lookup_trims_input() {
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(MockDriver::new("mock")))
            .expect("driver should register");
        assert!(registry.lookup("  mock ").is_ok());
        assert!(registry.contains(" mock"));
    }

    #[test]
    fn builtin_registry_contains_sqlite() {
        let registry = DriverRegistry::with_builtin_drivers().expect("builtin drivers should register");
        assert!(registry.contains("sqlite"));
        #[cfg(feature = "postgres")]
        assert!(registry.contains("postgres"));

        let ids = registry.driver_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn global_registry_is_built_once() {
        let first = global_registry().expect("global registry should build");
        let second = global_registry().expect("global registry should be cached");
        assert!(std::ptr::eq(first, second));
    }
}
