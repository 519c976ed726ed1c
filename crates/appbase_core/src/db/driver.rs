//! Capability contract implemented by every storage backend.

use super::accessor::{DatabaseAccessor, DbConnection};
use super::init::StartupBudget;
use super::migrations::MigrationReport;
use super::DbResult;
use crate::config::DatabaseConfig;

/// One storage backend able to connect, bootstrap, and migrate its schema.
///
/// Implementations are stateless across connections apart from their own
/// static table definitions and migration steps, and are shared through the
/// driver registry as `Arc<dyn DatabaseDriver>`.
pub trait DatabaseDriver: Send + Sync {
    /// Registry key, e.g. `sqlite`.
    fn driver_id(&self) -> &str;

    /// Latest schema version known by this driver.
    fn target_version(&self) -> u32;

    /// Rejects a migration plan that could not bring a fresh database to
    /// [`Self::target_version`]. Called on registration and before any table
    /// is created.
    fn validate_migrations(&self) -> DbResult<()> {
        Ok(())
    }

    /// Prepares storage, opens a connection, probes it, and enables
    /// referential integrity enforcement.
    fn connect(&self, config: &DatabaseConfig, budget: &StartupBudget) -> DbResult<DbConnection>;

    /// Creates base tables missing from the catalog and returns their names.
    fn create_tables(&self, accessor: &DatabaseAccessor) -> DbResult<Vec<String>>;

    /// Advances the recorded schema version to [`Self::target_version`].
    fn migrate_tables(
        &self,
        accessor: &DatabaseAccessor,
        budget: &StartupBudget,
    ) -> DbResult<MigrationReport>;

    /// Reads the currently recorded schema version.
    fn schema_version(&self, accessor: &DatabaseAccessor) -> DbResult<u32>;
}
