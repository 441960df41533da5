use std::collections::HashMap;
use std::ptr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use strata_common::{Error, Phase, Result};
use tracing::debug;

use crate::changeset::{Changeset, Migration};

#[derive(Debug, Default)]
struct Inner {
    migrations: HashMap<String, Migration>,
    names: Vec<String>,
}

/// Thread-safe catalog of known migrations.
///
/// Names are unique. The name list and the map always describe the same set:
/// every mutation validates first and then updates both under one write lock.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register a migration under `name`.
    ///
    /// `up` and `down` accept either a [`Changeset`] or an `Option` so that a
    /// missing direction can be reported instead of silently accepted.
    pub fn register(
        &self,
        name: impl Into<String>,
        up: impl Into<Option<Changeset>>,
        down: impl Into<Option<Changeset>>,
    ) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::NoMigrationName);
        }
        let up = up.into().ok_or_else(|| missing_changeset(&name, Phase::Migrate))?;
        let down = down
            .into()
            .ok_or_else(|| missing_changeset(&name, Phase::Rollback))?;

        let mut inner = self.write();
        if inner.migrations.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }

        debug!("registered migration {name}");
        inner.names.push(name.clone());
        inner
            .migrations
            .insert(name.clone(), Migration { name, up, down });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Migration> {
        self.read().migrations.get(name).cloned()
    }

    /// Registered names in their current order.
    pub fn list(&self) -> Vec<String> {
        self.read().names.clone()
    }

    pub fn count(&self) -> usize {
        self.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().migrations.contains_key(name)
    }

    pub fn sort(&self) {
        self.write().names.sort();
    }

    pub fn ensure_capacity(&self, additional: usize) {
        let mut inner = self.write();
        inner.names.reserve(additional);
        inner.migrations.reserve(additional);
    }

    /// Replace this registry's contents with a copy of `other`, then sort.
    ///
    /// Changeset handles are shared, not duplicated. Both locks are held for
    /// the copy and are always taken lower address first, so two registries
    /// copying from each other at the same time cannot deadlock.
    pub fn copy_from(&self, other: &Registry) {
        if ptr::eq(self, other) {
            self.sort();
            return;
        }

        let self_first = (self as *const Registry) < (other as *const Registry);
        let (mut target, source) = if self_first {
            let target = self.write();
            let source = other.read();
            (target, source)
        } else {
            let source = other.read();
            let target = self.write();
            (target, source)
        };

        target.migrations = source.migrations.clone();
        target.names = source.names.clone();
        target.names.sort();
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing_changeset(name: &str, phase: Phase) -> Error {
    Error::InvalidChangeset {
        name: name.to_string(),
        phase,
        reason: "changeset is missing".to_string(),
    }
}

/// Collects registrations and reports the first failure from [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Registry,
    error: Option<Error>,
}

impl RegistryBuilder {
    pub fn migration(
        mut self,
        name: impl Into<String>,
        up: impl Into<Option<Changeset>>,
        down: impl Into<Option<Changeset>>,
    ) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.registry.register(name, up, down) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn build(self) -> Result<Registry> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.registry),
        }
    }
}
