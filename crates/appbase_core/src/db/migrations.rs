//! Versioned migration registry and executor shared by all drivers.
//!
//! # Responsibility
//! - Hold migration steps indexed by the version they upgrade from.
//! - Advance the persisted schema version through pending steps in order.
//!
//! # Invariants
//! - Step at index `i` upgrades version `i` to `i + 1`; `None` slots are no-ops.
//! - The version record is written once, after every pending step succeeded.
//! - A recorded version newer than the target is rejected before any step runs.
//! - Steps are not rolled back on failure, so each step must tolerate a re-run.

use crate::db::init::StartupBudget;
use crate::db::{BackendError, DbError, DbResult};
use log::{debug, error, info};
use std::fmt::{Debug, Formatter};
use std::time::Instant;

type StepFn<C> = Box<dyn Fn(&mut C) -> Result<(), BackendError> + Send + Sync>;

struct MigrationStep<C> {
    name: &'static str,
    apply: StepFn<C>,
}

/// Ordered migration steps for one backend connection type `C`.
pub struct MigrationSet<C> {
    baseline: u32,
    target: Option<u32>,
    steps: Vec<Option<MigrationStep<C>>>,
}

impl<C> Default for MigrationSet<C> {
    fn default() -> Self {
        Self {
            baseline: 0,
            target: None,
            steps: Vec::new(),
        }
    }
}

impl<C> MigrationSet<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the version seeded into a freshly created version record.
    pub fn with_baseline(mut self, version: u32) -> Self {
        self.baseline = version;
        self
    }

    /// Pins the target version instead of deriving it from the slot count.
    pub fn with_target(mut self, version: u32) -> Self {
        self.target = Some(version);
        self
    }

    /// Appends a step upgrading from version `self.len()`.
    pub fn step<F>(mut self, name: &'static str, apply: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        self.steps.push(Some(MigrationStep {
            name,
            apply: Box::new(apply),
        }));
        self
    }

    /// Appends an empty slot for a version without structural change.
    pub fn noop(mut self) -> Self {
        self.steps.push(None);
        self
    }

    pub fn baseline(&self) -> u32 {
        self.baseline
    }

    /// Returns the version the schema is migrated to.
    pub fn target_version(&self) -> u32 {
        self.target.unwrap_or(self.steps.len() as u32)
    }

    /// Returns the number of step slots, including no-op slots.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Checks `baseline <= target <= len()`.
    ///
    /// # Errors
    /// - `InvalidMigrationPlan` when either bound is violated.
    pub fn validate(&self) -> DbResult<()> {
        let target = self.target_version();
        if target as usize > self.steps.len() || self.baseline > target {
            return Err(DbError::InvalidMigrationPlan {
                baseline: self.baseline,
                target,
                available: self.steps.len(),
            });
        }
        Ok(())
    }
}

impl<C> Debug for MigrationSet<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names = self
            .steps
            .iter()
            .map(|step| step.as_ref().map_or("<noop>", |step| step.name))
            .collect::<Vec<_>>();
        f.debug_struct("MigrationSet")
            .field("baseline", &self.baseline)
            .field("target", &self.target_version())
            .field("steps", &names)
            .finish()
    }
}

/// Persisted schema version record for connection type `C`.
pub trait VersionStore<C> {
    /// Reads the recorded version; a missing or corrupt record is `VersionRead`.
    fn read_version(&self, conn: &mut C) -> DbResult<u32>;

    fn write_version(&self, conn: &mut C, version: u32) -> Result<(), BackendError>;
}

/// Outcome of one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    /// Indices of the steps that were invoked, ascending.
    pub applied: Vec<u32>,
}

impl MigrationReport {
    /// Returns `true` when the record already matched the target.
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Parses the textual value stored in the version record.
pub fn parse_version(raw: Option<&str>) -> DbResult<u32> {
    let Some(raw) = raw else {
        return Err(DbError::VersionRead {
            reason: "version value is NULL".to_string(),
            source: None,
        });
    };
    raw.trim().parse::<u32>().map_err(|_| DbError::VersionRead {
        reason: format!("version value `{raw}` is not a non-negative integer"),
        source: None,
    })
}

/// Applies pending steps of `set` and records the target version.
///
/// # Errors
/// The startup budget is checked before every step and once more before the
/// record is written, so a step overrunning the deadline leaves the record
/// at its previous version.
///
/// # Errors
/// - `InvalidMigrationPlan` when the target exceeds the registered slots or
///   the baseline exceeds the target.
/// - `VersionRead` when the record cannot be read.
/// - `VersionMismatch` when the record is newer than the target.
/// - `MigrationStep` when a step fails or the startup budget runs out before
///   it; the record is left unchanged.
/// - `VersionWrite` when the budget ran out after the last step or the final
///   record update fails.
pub fn run<C, S>(
    conn: &mut C,
    store: &S,
    set: &MigrationSet<C>,
    budget: &StartupBudget,
) -> DbResult<MigrationReport>
where
    S: VersionStore<C> + ?Sized,
{
    set.validate()?;
    let target = set.target_version();
    let current = store.read_version(conn)?;

    debug!(
        "event=db_migrate module=db status=check current_version={} target_version={}",
        current, target
    );

    if current == target {
        return Ok(MigrationReport {
            from: current,
            to: target,
            applied: Vec::new(),
        });
    }

    if current > target {
        return Err(DbError::VersionMismatch {
            recorded: current,
            target,
        });
    }

    let mut applied = Vec::new();
    for (index, slot) in set.steps[current as usize..target as usize].iter().enumerate() {
        let from = current + index as u32;
        let Some(step) = slot else {
            continue;
        };

        budget.check().map_err(|source| DbError::MigrationStep {
            from,
            to: from + 1,
            source,
        })?;

        let started_at = Instant::now();
        if let Err(source) = (step.apply)(conn) {
            error!(
                "event=db_migration_step module=db status=error from={} to={} name={} duration_ms={} error={}",
                from,
                from + 1,
                step.name,
                started_at.elapsed().as_millis(),
                source
            );
            return Err(DbError::MigrationStep {
                from,
                to: from + 1,
                source,
            });
        }
        info!(
            "event=db_migration_step module=db status=ok from={} to={} name={} duration_ms={}",
            from,
            from + 1,
            step.name,
            started_at.elapsed().as_millis()
        );
        applied.push(from);
    }

    budget
        .check()
        .and_then(|()| store.write_version(conn, target))
        .map_err(|source| DbError::VersionWrite {
            version: target,
            source,
        })?;

    Ok(MigrationReport {
        from: current,
        to: target,
        applied,
    })
}
