use std::collections::HashSet;

use strata_common::{Error, Result};

/// The three-way diff between applied and registered migration names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Applied but not registered, in applied order.
    pub unknown: Vec<String>,
    /// Applied and registered, in applied order.
    pub known: Vec<String>,
    /// Registered but not applied, sorted ascending.
    pub pending: Vec<String>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.unknown.is_empty()
    }

    /// The pending names, or `UnknownAppliedMigration` if any applied name is
    /// no longer registered.
    pub fn into_pending(self) -> Result<Vec<String>> {
        if self.unknown.is_empty() {
            Ok(self.pending)
        } else {
            Err(Error::UnknownAppliedMigration(self.unknown))
        }
    }
}

pub fn reconcile(applied: &[String], registered: &[String]) -> Reconciliation {
    let registered_set: HashSet<&str> = registered.iter().map(String::as_str).collect();
    let applied_set: HashSet<&str> = applied.iter().map(String::as_str).collect();

    let (known, unknown): (Vec<String>, Vec<String>) = applied
        .iter()
        .cloned()
        .partition(|name| registered_set.contains(name.as_str()));

    let mut pending: Vec<String> = registered
        .iter()
        .filter(|name| !applied_set.contains(name.as_str()))
        .cloned()
        .collect();
    pending.sort();
    pending.dedup();

    Reconciliation {
        unknown,
        known,
        pending,
    }
}
