//! Startup orchestration for the database accessor.
//!
//! # Responsibility
//! - Resolve the configured driver and run connect, table creation, and
//!   migration strictly in that order.
//! - Bound the whole sequence by the configured startup timeout.
//!
//! # Invariants
//! - The first failing stage aborts startup and its error is returned as-is.
//! - An accessor is only returned after every stage succeeded.

use super::accessor::DatabaseAccessor;
use super::registry::{global_registry, DriverRegistry};
use super::{BackendError, DbResult};
use crate::config::DatabaseConfig;
use log::{error, info};
use std::time::{Duration, Instant};

/// Deadline shared by all startup stages.
#[derive(Debug, Clone, Copy)]
pub struct StartupBudget {
    started_at: Instant,
    limit: Duration,
}

impl StartupBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the time left before the deadline, zero once exhausted.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.limit
    }

    /// Returns `Timeout` once the deadline has passed.
    pub fn check(&self) -> Result<(), BackendError> {
        if self.is_exhausted() {
            return Err(BackendError::Timeout { limit: self.limit });
        }
        Ok(())
    }
}

/// Initializes the accessor using the process-wide driver registry.
///
/// # Errors
/// - Returns the registry error when the builtin drivers fail to register.
/// - Otherwise see [`init_with_registry`].
pub fn init(config: &DatabaseConfig) -> DbResult<DatabaseAccessor> {
    init_with_registry(global_registry()?, config)
}

/// Initializes the accessor using the driver registered in `registry`.
///
/// # Side effects
/// - Creates storage directories, base tables, and applies migrations.
/// - Emits `db_init` logging events with duration and status.
///
/// # Errors
/// - `DriverNotFound` when `config.driver` is not registered.
/// - Any stage error from connect, table creation, or migration, unchanged.
pub fn init_with_registry(
    registry: &DriverRegistry,
    config: &DatabaseConfig,
) -> DbResult<DatabaseAccessor> {
    let budget = StartupBudget::new(config.startup_timeout());
    info!(
        "event=db_init module=db status=start driver={} timeout_ms={}",
        config.driver,
        budget.limit().as_millis()
    );

    match run_stages(registry, config, &budget) {
        Ok(accessor) => {
            info!(
                "event=db_init module=db status=ok driver={} duration_ms={}",
                accessor.driver_name(),
                budget.elapsed().as_millis()
            );
            Ok(accessor)
        }
        Err(err) => {
            error!(
                "event=db_init module=db status=error driver={} duration_ms={} error={}",
                config.driver,
                budget.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn run_stages(
    registry: &DriverRegistry,
    config: &DatabaseConfig,
    budget: &StartupBudget,
) -> DbResult<DatabaseAccessor> {
    let driver = registry.lookup(&config.driver)?;

    let conn = driver.connect(config, budget)?;
    let accessor = DatabaseAccessor::new(driver.driver_id(), conn);
    info!(
        "event=db_connect module=db status=ok driver={} backend={} duration_ms={}",
        accessor.driver_name(),
        accessor.backend(),
        budget.elapsed().as_millis()
    );

    let created = driver.create_tables(&accessor)?;
    info!(
        "event=db_create_tables module=db status=ok driver={} created={}",
        accessor.driver_name(),
        created.join(",")
    );

    let report = driver.migrate_tables(&accessor, budget)?;
    info!(
        "event=db_migrate module=db status=ok driver={} from={} to={} applied={}",
        accessor.driver_name(),
        report.from,
        report.to,
        report.applied.len()
    );

    Ok(accessor)
}
