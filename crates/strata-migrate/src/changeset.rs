use std::fmt;
use std::sync::Arc;

use strata_common::{Flavour, Result};
use strata_db::Transaction;

/// Read-only information handed to context-aware changesets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationContext {
    /// Which Postgres-like API the migration is talking to.
    pub flavour: Flavour,
}

type HandleFn = dyn Fn(&mut dyn Transaction) -> Result<()> + Send + Sync;
type ContextFn = dyn Fn(&mut dyn Transaction, &MigrationContext) -> Result<()> + Send + Sync;

/// One direction of a migration.
///
/// Exactly two call shapes are accepted: the transaction handle alone, or
/// the handle together with the [`MigrationContext`].
#[derive(Clone)]
pub enum Changeset {
    Handle(Arc<HandleFn>),
    HandleWithContext(Arc<ContextFn>),
}

impl Changeset {
    pub fn handle<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Transaction) -> Result<()> + Send + Sync + 'static,
    {
        Self::Handle(Arc::new(f))
    }

    pub fn with_context<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Transaction, &MigrationContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::HandleWithContext(Arc::new(f))
    }

    /// A changeset that runs `sql` as a script.
    pub fn sql(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self::handle(move |tx| tx.execute_batch(&sql))
    }

    pub fn run(&self, tx: &mut dyn Transaction, context: &MigrationContext) -> Result<()> {
        match self {
            Self::Handle(f) => f(tx),
            Self::HandleWithContext(f) => f(tx, context),
        }
    }

    pub fn wants_context(&self) -> bool {
        matches!(self, Self::HandleWithContext(_))
    }
}

impl fmt::Debug for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(_) => f.write_str("Changeset::Handle"),
            Self::HandleWithContext(_) => f.write_str("Changeset::HandleWithContext"),
        }
    }
}

/// A registered migration: a name and its forward and backward changesets.
#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    pub up: Changeset,
    pub down: Changeset,
}
