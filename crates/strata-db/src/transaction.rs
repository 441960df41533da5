use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_common::{Flavour, Result};

use crate::cancel::Cancellation;
use crate::table::TableName;

/// Backend-neutral SQL parameter and result value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One result row, columns in select order.
pub type Row = Vec<SqlValue>;

/// A persisted applied-migration record.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    pub id: i64,
    pub name: String,
    pub batch: i64,
    pub applied_at: DateTime<Utc>,
}

/// The transactional handle migrations run against.
///
/// Every call happens inside the transaction opened by
/// [`Database::run_in_transaction`]; an error from any call aborts it.
pub trait Transaction {
    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Execute a script of one or more statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    fn flavour(&self) -> Flavour;
}

/// Tracking-table bookkeeping used by the migrator, on top of the plain handle.
pub trait TrackingTransaction: Transaction {
    fn as_transaction(&mut self) -> &mut dyn Transaction;

    /// Create the tracking table if it does not exist yet.
    fn ensure_table(&mut self, table: &TableName) -> Result<()>;

    /// Hold a mutual-exclusion span over `table` until the transaction ends.
    ///
    /// The span excludes other writers of the table, including other holders
    /// of the span, but not plain readers.
    fn lock_table(&mut self, table: &TableName) -> Result<()>;

    /// Names of every applied migration, in insertion order.
    fn applied_names(&mut self, table: &TableName) -> Result<Vec<String>>;

    fn applied_migrations(&mut self, table: &TableName) -> Result<Vec<AppliedMigration>>;

    /// Highest batch number recorded, or zero for an empty table.
    fn max_batch(&mut self, table: &TableName) -> Result<i64>;

    /// Names recorded under `batch`, most recently inserted first.
    fn batch_names(&mut self, table: &TableName, batch: i64) -> Result<Vec<String>>;

    fn record(&mut self, table: &TableName, name: &str, batch: i64) -> Result<()>;

    fn erase(&mut self, table: &TableName, name: &str) -> Result<()>;
}

/// A database that can run work inside a transaction.
///
/// Implementations commit when `work` returns `Ok` and roll back when it
/// returns `Err`, when a statement fails, or when `cancel` trips.
pub trait Database {
    fn flavour(&self) -> Flavour;

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()>;
}

impl<T: Database + ?Sized> Database for Arc<T> {
    fn flavour(&self) -> Flavour {
        (**self).flavour()
    }

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()> {
        (**self).run_in_transaction(cancel, work)
    }
}

impl<T: Database + ?Sized> Database for Box<T> {
    fn flavour(&self) -> Flavour {
        (**self).flavour()
    }

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()> {
        (**self).run_in_transaction(cancel, work)
    }
}
