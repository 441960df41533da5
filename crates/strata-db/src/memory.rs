//! In-memory [`Database`] for tests.
//!
//! Tracking rows live in plain vectors. Each transaction works on the live
//! state and restores a snapshot taken at begin if it fails, so commit and
//! rollback behave like a real backend. SQL sent through the plain handle is
//! recorded but not interpreted; `query` always returns no rows.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use strata_common::{Error, Flavour, Result};

use crate::cancel::Cancellation;
use crate::table::TableName;
use crate::transaction::{AppliedMigration, Database, Row, SqlValue, TrackingTransaction, Transaction};

/// Transaction lifecycle events, kept even for rolled-back transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin,
    Lock(String),
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: HashMap<String, Vec<AppliedMigration>>,
    next_id: i64,
    statements: Vec<String>,
}

pub struct MemoryDatabase {
    state: Mutex<State>,
    events: Mutex<Vec<Event>>,
    flavour: Flavour,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_flavour(Flavour::Postgres)
    }

    pub fn with_flavour(flavour: Flavour) -> Self {
        Self {
            state: Mutex::new(State::default()),
            events: Mutex::new(Vec::new()),
            flavour,
        }
    }

    /// Insert a tracking row directly, creating the table if needed.
    pub fn seed(&self, table: &TableName, name: &str, batch: i64) {
        let mut state = lock(&self.state);
        insert_row(&mut state, table, name, batch);
    }

    pub fn applied(&self, table: &TableName) -> Vec<AppliedMigration> {
        lock(&self.state)
            .tables
            .get(&table.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn applied_names(&self, table: &TableName) -> Vec<String> {
        self.applied(table).into_iter().map(|m| m.name).collect()
    }

    pub fn has_table(&self, table: &TableName) -> bool {
        lock(&self.state).tables.contains_key(&table.to_string())
    }

    /// Statements from committed transactions, in execution order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state).statements.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn lock_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Lock(_)))
            .count()
    }

    pub fn commit_count(&self) -> usize {
        self.events().iter().filter(|e| **e == Event::Commit).count()
    }

    pub fn rollback_count(&self) -> usize {
        self.events().iter().filter(|e| **e == Event::Rollback).count()
    }
}

impl Database for MemoryDatabase {
    fn flavour(&self) -> Flavour {
        self.flavour
    }

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()> {
        cancel.check()?;
        // Holding the state lock for the whole transaction serializes them.
        let mut state = lock(&self.state);
        let snapshot = state.clone();
        lock(&self.events).push(Event::Begin);

        let result = {
            let mut handle = MemoryTransaction {
                state: &mut *state,
                events: &self.events,
                cancel,
                flavour: self.flavour,
            };
            work(&mut handle).and_then(|()| cancel.check())
        };

        match result {
            Ok(()) => {
                lock(&self.events).push(Event::Commit);
                Ok(())
            }
            Err(e) => {
                *state = snapshot;
                lock(&self.events).push(Event::Rollback);
                Err(e)
            }
        }
    }
}

struct MemoryTransaction<'a> {
    state: &'a mut State,
    events: &'a Mutex<Vec<Event>>,
    cancel: &'a Cancellation,
    flavour: Flavour,
}

impl MemoryTransaction<'_> {
    fn rows(&mut self, table: &TableName) -> Result<&mut Vec<AppliedMigration>> {
        self.state
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| Error::Database(format!("relation {table} does not exist")))
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> Result<usize> {
        self.cancel.check()?;
        self.state.statements.push(sql.to_string());
        Ok(0)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.cancel.check()?;
        self.state.statements.push(sql.to_string());
        Ok(())
    }

    fn query(&mut self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
        self.cancel.check()?;
        self.state.statements.push(sql.to_string());
        Ok(Vec::new())
    }

    fn flavour(&self) -> Flavour {
        self.flavour
    }
}

impl TrackingTransaction for MemoryTransaction<'_> {
    fn as_transaction(&mut self) -> &mut dyn Transaction {
        self
    }

    fn ensure_table(&mut self, table: &TableName) -> Result<()> {
        self.cancel.check()?;
        self.state.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    fn lock_table(&mut self, table: &TableName) -> Result<()> {
        self.cancel.check()?;
        self.rows(table)?;
        lock(self.events).push(Event::Lock(table.to_string()));
        Ok(())
    }

    fn applied_names(&mut self, table: &TableName) -> Result<Vec<String>> {
        self.cancel.check()?;
        Ok(self.rows(table)?.iter().map(|m| m.name.clone()).collect())
    }

    fn applied_migrations(&mut self, table: &TableName) -> Result<Vec<AppliedMigration>> {
        self.cancel.check()?;
        Ok(self.rows(table)?.clone())
    }

    fn max_batch(&mut self, table: &TableName) -> Result<i64> {
        self.cancel.check()?;
        Ok(self.rows(table)?.iter().map(|m| m.batch).max().unwrap_or(0))
    }

    fn batch_names(&mut self, table: &TableName, batch: i64) -> Result<Vec<String>> {
        self.cancel.check()?;
        let mut members: Vec<&AppliedMigration> =
            self.rows(table)?.iter().filter(|m| m.batch == batch).collect();
        members.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(members.into_iter().map(|m| m.name.clone()).collect())
    }

    fn record(&mut self, table: &TableName, name: &str, batch: i64) -> Result<()> {
        self.cancel.check()?;
        self.rows(table)?;
        insert_row(self.state, table, name, batch);
        Ok(())
    }

    fn erase(&mut self, table: &TableName, name: &str) -> Result<()> {
        self.cancel.check()?;
        self.rows(table)?.retain(|m| m.name != name);
        Ok(())
    }
}

fn insert_row(state: &mut State, table: &TableName, name: &str, batch: i64) {
    state.next_id += 1;
    let id = state.next_id;
    state
        .tables
        .entry(table.to_string())
        .or_default()
        .push(AppliedMigration {
            id,
            name: name.to_string(),
            batch,
            applied_at: Utc::now(),
        });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
