//! Base schema bootstrap driven by catalog introspection.
//!
//! # Responsibility
//! - Declare the tables that must exist from version 0.
//! - Create the declared tables the catalog does not list yet.
//!
//! # Invariants
//! - The database catalog is the only source of truth for table existence.
//! - Each missing table's creation procedure runs exactly once per call.
//! - Partially created tables are not rolled back; the next call skips them.

use super::{BackendError, DbError, DbResult};
use log::{error, info};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};

type CreateFn<C> = Box<dyn Fn(&mut C) -> Result<(), BackendError> + Send + Sync>;

/// Table name to creation procedure mapping for connection type `C`.
pub struct BaseSchema<C> {
    tables: BTreeMap<&'static str, CreateFn<C>>,
}

impl<C> Default for BaseSchema<C> {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }
}

impl<C> BaseSchema<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` with the procedure creating it. Redeclaring replaces.
    pub fn table<F>(mut self, name: &'static str, create: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        self.tables.insert(name, Box::new(create));
        self
    }

    /// Returns declared table names in creation order.
    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Runs the creation procedure of every declared table absent from
    /// `existing` and returns the created names.
    ///
    /// # Errors
    /// - Returns `SchemaInit` naming the first table whose procedure failed.
    pub fn create_missing(
        &self,
        conn: &mut C,
        existing: &BTreeSet<String>,
    ) -> DbResult<Vec<String>> {
        let mut created = Vec::new();
        for (name, create) in &self.tables {
            if existing.contains(*name) {
                continue;
            }
            if let Err(source) = create(conn) {
                error!(
                    "event=db_create_table module=db status=error table={} error={}",
                    name, source
                );
                return Err(DbError::SchemaInit {
                    table: (*name).to_string(),
                    source,
                });
            }
            info!("event=db_create_table module=db status=ok table={}", name);
            created.push((*name).to_string());
        }
        Ok(created)
    }
}

impl<C> Debug for BaseSchema<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseSchema")
            .field("tables", &self.table_names())
            .finish()
    }
}

/// Maps a catalog query failure to the table-creation stage error.
pub(crate) fn catalog_error(source: BackendError) -> DbError {
    DbError::SchemaInit {
        table: "<catalog>".to_string(),
        source,
    }
}
