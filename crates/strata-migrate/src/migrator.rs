//! The migrator: reconciles the registry against the tracking table and runs
//! changesets inside transactions.
//!
//! Every operation opens a fresh database through the factory. Batch numbers
//! are read under the table lock in the same transaction that records them,
//! so two processes migrating at once serialize on the lock instead of
//! racing for a batch number.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use strata_common::{Error, Flavour, NameConvention, Phase, Result};
use strata_config::MigrationConfig;
use strata_db::{AppliedMigration, Cancellation, Database, TableName, TrackingTransaction};
use tracing::info;

use crate::changeset::{Changeset, Migration, MigrationContext};
use crate::naming::caser_for;
use crate::reconcile::reconcile;
use crate::registry::Registry;
use crate::scaffold::{Template, create_migration_file};

pub const DEFAULT_MIGRATION_TABLE_NAME: &str = strata_config::DEFAULT_MIGRATION_TABLE_NAME;
pub const DEFAULT_INITIAL_MIGRATION_NAME: &str = strata_config::DEFAULT_INITIAL_MIGRATION_NAME;

type Factory<D> = Box<dyn Fn() -> Result<D> + Send>;

/// A migration recorded by a run, with the batch it was recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEntry {
    pub name: String,
    pub batch: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub applied: Vec<AppliedEntry>,
}

impl RunReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.applied.iter().map(|e| e.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// The batch that was undone, `None` when nothing was applied.
    pub batch: Option<i64>,
    pub rolled_back: Vec<String>,
}

/// Snapshot of the tracking table against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
    pub unknown: Vec<String>,
}

pub struct Migrator<D> {
    factory: Factory<D>,
    registry: Registry,
    table: TableName,
    initial_migration: String,
    name_convention: NameConvention,
    explicit_lock: bool,
    verbosity: i32,
    cancel: Cancellation,
    migration_dir: PathBuf,
    template_dir: Option<PathBuf>,
    flavour: Option<Flavour>,
}

impl<D: Database + 'static> Migrator<D> {
    pub fn builder<F>(factory: F) -> MigratorBuilder<D>
    where
        F: Fn() -> Result<D> + Send + 'static,
    {
        MigratorBuilder::new(Box::new(factory))
    }
}

impl<D: Database> Migrator<D> {
    pub fn register(
        &self,
        name: impl Into<String>,
        up: impl Into<Option<Changeset>>,
        down: impl Into<Option<Changeset>>,
    ) -> Result<()> {
        self.registry.register(name, up, down)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn initial_migration(&self) -> &str {
        &self.initial_migration
    }

    pub fn name_convention(&self) -> NameConvention {
        self.name_convention
    }

    pub fn explicit_lock(&self) -> bool {
        self.explicit_lock
    }

    /// Positive when verbose, negative when quiet.
    pub fn verbosity(&self) -> i32 {
        self.verbosity
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    pub fn template_dir(&self) -> Option<&Path> {
        self.template_dir.as_deref()
    }

    /// Run the initial migration in a batch of its own.
    pub fn init(&self) -> Result<RunReport> {
        let db = (self.factory)()?;
        let context = self.context(&db);
        let name = self.initial_migration.as_str();

        let entry = self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
            self.bootstrap(tx)?;
            self.maybe_lock(tx)?;
            let batch = tx.max_batch(&self.table)? + 1;

            self.log_at(0, format_args!("Batch {batch} run: 1 migrations"));
            let migration = self
                .registry
                .get(name)
                .ok_or_else(|| Error::InitialMigrationNotFound(name.to_string()))?;
            run_changeset(tx, &migration, Phase::Migrate, &context)?;
            tx.record(&self.table, name, batch)?;

            Ok(AppliedEntry {
                name: name.to_string(),
                batch,
            })
        })?;

        Ok(RunReport {
            applied: vec![entry],
        })
    }

    /// Apply every pending migration in one transaction under one batch.
    ///
    /// Either all of them are recorded or none are.
    pub fn migrate_batch(&self) -> Result<RunReport> {
        let db = (self.factory)()?;
        let context = self.context(&db);

        let applied = self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
            self.bootstrap(tx)?;
            self.maybe_lock(tx)?;
            let pending = self.pending_in(tx)?;
            if pending.is_empty() {
                self.log_at(1, format_args!("Nothing to migrate"));
                return Ok(Vec::new());
            }

            let batch = tx.max_batch(&self.table)? + 1;
            self.log_at(
                0,
                format_args!("Batch {batch} run: {} migrations", pending.len()),
            );

            let mut applied = Vec::with_capacity(pending.len());
            for name in pending {
                let migration = self.migration(&name)?;
                run_changeset(tx, &migration, Phase::Migrate, &context)?;
                tx.record(&self.table, &name, batch)?;
                applied.push(AppliedEntry { name, batch });
            }
            Ok(applied)
        })?;

        Ok(RunReport { applied })
    }

    /// Apply pending migrations one per transaction, each under its own batch.
    ///
    /// A failure leaves the migrations before it committed. A migration that
    /// a concurrent run recorded after discovery is skipped.
    pub fn migrate_step_by_step(&self) -> Result<RunReport> {
        let db = (self.factory)()?;
        let context = self.context(&db);

        let pending = self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
            self.bootstrap(tx)?;
            self.maybe_lock(tx)?;
            self.pending_in(tx)
        })?;
        if pending.is_empty() {
            self.log_at(1, format_args!("Nothing to migrate"));
            return Ok(RunReport::default());
        }

        let mut report = RunReport::default();
        for name in &pending {
            let entry = self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
                self.maybe_lock(tx)?;
                if tx.applied_names(&self.table)?.contains(name) {
                    self.log_at(1, format_args!("Skipping {name}: already applied"));
                    return Ok(None);
                }

                let batch = tx.max_batch(&self.table)? + 1;
                self.log_at(0, format_args!("Batch {batch} run: 1 migration - {name}"));
                let migration = self.migration(name)?;
                run_changeset(tx, &migration, Phase::Migrate, &context)?;
                tx.record(&self.table, name, batch)?;

                Ok(Some(AppliedEntry {
                    name: name.clone(),
                    batch,
                }))
            })?;
            report.applied.extend(entry);
        }

        Ok(report)
    }

    /// Undo every migration in the most recent batch, in ascending name order.
    pub fn rollback(&self) -> Result<RollbackReport> {
        let db = (self.factory)()?;
        let context = self.context(&db);

        self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
            self.bootstrap(tx)?;
            self.maybe_lock(tx)?;

            let applied = tx.applied_names(&self.table)?;
            let reconciliation = reconcile(&applied, &self.registry.list());
            if !reconciliation.is_consistent() {
                return Err(Error::UnknownAppliedMigration(reconciliation.unknown));
            }

            let batch = tx.max_batch(&self.table)?;
            let mut names = tx.batch_names(&self.table, batch)?;
            if names.is_empty() {
                self.log_at(1, format_args!("Nothing to roll back"));
                return Ok(RollbackReport::default());
            }

            names.sort();
            self.log_at(
                0,
                format_args!("Batch {batch} rollback: {} migrations", names.len()),
            );
            for name in &names {
                let migration = self.migration(name)?;
                run_changeset(tx, &migration, Phase::Rollback, &context)?;
                tx.erase(&self.table, name)?;
                self.log_at(0, format_args!("Rolled back {name}"));
            }

            Ok(RollbackReport {
                batch: Some(batch),
                rolled_back: names,
            })
        })
    }

    /// Applied records plus what is pending and what is unknown.
    ///
    /// Unlike the run operations this reports unknown names instead of
    /// failing on them, and takes no lock.
    pub fn status(&self) -> Result<Status> {
        let db = (self.factory)()?;
        self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
            self.bootstrap(tx)?;
            let applied = tx.applied_migrations(&self.table)?;
            let names: Vec<String> = applied.iter().map(|m| m.name.clone()).collect();
            let reconciliation = reconcile(&names, &self.registry.list());
            Ok(Status {
                applied,
                pending: reconciliation.pending,
                unknown: reconciliation.unknown,
            })
        })
    }

    /// Names that the next migrate would apply, in execution order.
    pub fn pending(&self) -> Result<Vec<String>> {
        let db = (self.factory)()?;
        self.transaction(&db, |tx: &mut dyn TrackingTransaction| {
            self.bootstrap(tx)?;
            self.pending_in(tx)
        })
    }

    /// Scaffold a new Rust migration in the migration directory.
    pub fn create(&self, description: &str) -> Result<PathBuf> {
        self.create_from_template(description, &Template::rust())
    }

    pub fn create_from_template(&self, description: &str, template: &Template) -> Result<PathBuf> {
        if description.trim().is_empty() {
            return Err(Error::NoMigrationName);
        }

        let caser = caser_for(self.name_convention);
        let now = Local::now();
        let filename = caser.to_file_case(now, description);
        let func_name = caser.to_func_case(now, description);

        let path = create_migration_file(&self.migration_dir, &filename, &func_name, template)?;
        self.log_at(0, format_args!("Created migration {}", path.display()));
        Ok(path)
    }

    /// Load a named template from the configured template directory.
    pub fn template(&self, name: &str) -> Result<Template> {
        let dir = self
            .template_dir
            .as_deref()
            .ok_or_else(|| Error::Config(format!("no template directory set for template {name}")))?;
        Template::from_dir(dir, name)
    }

    fn context(&self, db: &D) -> MigrationContext {
        MigrationContext {
            flavour: self.flavour.unwrap_or_else(|| db.flavour()),
        }
    }

    fn transaction<T>(
        &self,
        db: &D,
        mut work: impl FnMut(&mut dyn TrackingTransaction) -> Result<T>,
    ) -> Result<T> {
        let mut output = None;
        db.run_in_transaction(&self.cancel, &mut |tx: &mut dyn TrackingTransaction| {
            output = Some(work(tx)?);
            Ok(())
        })?;
        output.ok_or_else(|| Error::Other("transaction committed without a result".into()))
    }

    fn bootstrap(&self, tx: &mut dyn TrackingTransaction) -> Result<()> {
        tx.ensure_table(&self.table)
    }

    fn maybe_lock(&self, tx: &mut dyn TrackingTransaction) -> Result<()> {
        if self.explicit_lock {
            tx.lock_table(&self.table)?;
        }
        Ok(())
    }

    fn pending_in(&self, tx: &mut dyn TrackingTransaction) -> Result<Vec<String>> {
        let applied = tx.applied_names(&self.table)?;
        reconcile(&applied, &self.registry.list()).into_pending()
    }

    fn migration(&self, name: &str) -> Result<Migration> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::MigrationNotRegistered(name.to_string()))
    }

    fn log_at(&self, required: i32, message: fmt::Arguments<'_>) {
        log_at(self.verbosity, required, message);
    }
}

fn log_at(verbosity: i32, required: i32, message: fmt::Arguments<'_>) {
    if verbosity >= required {
        info!("{message}");
    }
}

fn run_changeset(
    tx: &mut dyn TrackingTransaction,
    migration: &Migration,
    phase: Phase,
    context: &MigrationContext,
) -> Result<()> {
    let changeset = match phase {
        Phase::Migrate => &migration.up,
        Phase::Rollback => &migration.down,
    };
    changeset
        .run(tx.as_transaction(), context)
        .map_err(|e| Error::changeset(&migration.name, phase, e))
}

/// Builds a [`Migrator`] from ordered steps over the defaults.
///
/// Steps run in call order. The first failing step is kept and reported by
/// [`build`](Self::build); the steps after it are ignored.
pub struct MigratorBuilder<D> {
    factory: Factory<D>,
    registry: Registry,
    table: Option<TableName>,
    initial_migration: String,
    name_convention: NameConvention,
    explicit_lock: bool,
    verbosity: i32,
    cancel: Option<Cancellation>,
    migration_dir: Option<PathBuf>,
    template_dir: Option<PathBuf>,
    flavour: Option<Flavour>,
    error: Option<Error>,
}

impl<D: Database> MigratorBuilder<D> {
    fn new(factory: Factory<D>) -> Self {
        Self {
            factory,
            registry: Registry::new(),
            table: None,
            initial_migration: DEFAULT_INITIAL_MIGRATION_NAME.to_string(),
            name_convention: NameConvention::default(),
            explicit_lock: true,
            verbosity: 0,
            cancel: None,
            migration_dir: None,
            template_dir: None,
            flavour: None,
            error: None,
        }
    }

    fn step(mut self, apply: impl FnOnce(&mut Self) -> Result<()>) -> Self {
        if self.error.is_none() {
            if let Err(e) = apply(&mut self) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn table_name(self, name: &str) -> Self {
        self.step(|b| {
            b.table = Some(TableName::parse(name)?);
            Ok(())
        })
    }

    pub fn initial_name(self, name: &str) -> Self {
        self.step(|b| {
            if name.trim().is_empty() {
                return Err(Error::NoMigrationName);
            }
            b.initial_migration = name.to_string();
            Ok(())
        })
    }

    pub fn name_convention(self, convention: NameConvention) -> Self {
        self.step(|b| {
            b.name_convention = convention;
            Ok(())
        })
    }

    /// Reserve room for `capacity` migrations.
    pub fn capacity(self, capacity: usize) -> Self {
        self.step(|b| {
            b.registry.ensure_capacity(capacity);
            Ok(())
        })
    }

    /// Take a copy of `registry`'s migrations, replacing any set before.
    pub fn migrations(self, registry: &Registry) -> Self {
        self.step(|b| {
            b.registry.copy_from(registry);
            Ok(())
        })
    }

    pub fn explicit_lock(self, enabled: bool) -> Self {
        self.step(|b| {
            b.explicit_lock = enabled;
            Ok(())
        })
    }

    /// Fails if `quiet` was already set.
    pub fn verbosity(self, level: u8) -> Self {
        self.step(|b| {
            if b.verbosity < 0 {
                return Err(Error::InvalidVerbosity {
                    current: b.verbosity,
                });
            }
            b.verbosity = i32::from(level);
            Ok(())
        })
    }

    /// Fails if `verbosity` was already set.
    pub fn quiet(self, level: u8) -> Self {
        self.step(|b| {
            if b.verbosity > 0 {
                return Err(Error::InvalidVerbosity {
                    current: b.verbosity,
                });
            }
            b.verbosity = -i32::from(level);
            Ok(())
        })
    }

    pub fn cancellation(self, cancel: Cancellation) -> Self {
        self.step(|b| {
            b.cancel = Some(cancel);
            Ok(())
        })
    }

    pub fn template_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.step(|b| {
            b.template_dir = Some(dir.into());
            Ok(())
        })
    }

    pub fn migration_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.step(|b| {
            b.migration_dir = Some(dir.into());
            Ok(())
        })
    }

    /// Override the flavour handed to context-aware changesets. Without this
    /// the backend's own flavour is used.
    pub fn flavour(self, flavour: Flavour) -> Self {
        self.step(|b| {
            b.flavour = Some(flavour);
            Ok(())
        })
    }

    /// Apply every setting from a loaded config file.
    ///
    /// Zero verbosity and quiet levels and unset paths leave the current
    /// values alone.
    pub fn config(self, config: &MigrationConfig) -> Self {
        let mut builder = self
            .table_name(&config.table_name)
            .initial_name(&config.initial_migration)
            .name_convention(config.name_convention)
            .explicit_lock(config.explicit_lock);
        if config.verbosity > 0 {
            builder = builder.verbosity(config.verbosity);
        }
        if config.quiet > 0 {
            builder = builder.quiet(config.quiet);
        }
        if let Some(flavour) = config.flavour {
            builder = builder.flavour(flavour);
        }
        if let Some(dir) = &config.migration_dir {
            builder = builder.migration_dir(dir.clone());
        }
        if let Some(dir) = &config.template_dir {
            builder = builder.template_dir(dir.clone());
        }
        builder
    }

    pub fn build(self) -> Result<Migrator<D>> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let table = match self.table {
            Some(table) => table,
            None => TableName::parse(DEFAULT_MIGRATION_TABLE_NAME)?,
        };

        let cancel = match self.cancel {
            Some(cancel) => cancel,
            None => {
                log_at(self.verbosity, 1, format_args!("Using unbounded cancellation"));
                Cancellation::unbounded()
            }
        };

        let migration_dir = match self.migration_dir {
            Some(dir) => dir,
            None => {
                let dir = std::env::current_dir()?;
                log_at(
                    self.verbosity,
                    1,
                    format_args!("Setting migration directory: {}", dir.display()),
                );
                dir
            }
        };

        Ok(Migrator {
            factory: self.factory,
            registry: self.registry,
            table,
            initial_migration: self.initial_migration,
            name_convention: self.name_convention,
            explicit_lock: self.explicit_lock,
            verbosity: self.verbosity,
            cancel,
            migration_dir,
            template_dir: self.template_dir,
            flavour: self.flavour,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use strata_db::MemoryDatabase;
    use strata_db::memory::Event;

    fn table() -> TableName {
        TableName::parse(DEFAULT_MIGRATION_TABLE_NAME).unwrap()
    }

    fn statement(sql: &str) -> Changeset {
        Changeset::sql(sql)
    }

    fn failing() -> Changeset {
        Changeset::handle(|_| Err(Error::Other("boom".into())))
    }

    fn registry(names: &[&str]) -> Registry {
        let registry = Registry::new();
        for name in names {
            registry
                .register(*name, statement(&format!("up {name}")), statement(&format!("down {name}")))
                .unwrap();
        }
        registry
    }

    fn builder(db: &Arc<MemoryDatabase>, registry: &Registry) -> MigratorBuilder<Arc<MemoryDatabase>> {
        let handle = Arc::clone(db);
        Migrator::builder(move || Ok(Arc::clone(&handle)))
            .migrations(registry)
            .migration_dir(std::env::temp_dir())
    }

    fn migrator(db: &Arc<MemoryDatabase>, registry: &Registry) -> Migrator<Arc<MemoryDatabase>> {
        builder(db, registry).build().unwrap()
    }

    fn batches(db: &MemoryDatabase) -> Vec<(String, i64)> {
        db.applied(&table())
            .into_iter()
            .map(|m| (m.name, m.batch))
            .collect()
    }

    #[test]
    fn migrate_batch_applies_everything_under_one_batch() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&["C", "A", "B"]));

        let report = m.migrate_batch().unwrap();
        assert_eq!(report.names(), vec!["A", "B", "C"]);
        assert!(report.applied.iter().all(|e| e.batch == 1));
        assert_eq!(db.statements(), vec!["up A", "up B", "up C"]);

        // a second run finds nothing pending
        assert!(m.migrate_batch().unwrap().is_empty());
        assert_eq!(db.applied_names(&table()), vec!["A", "B", "C"]);
    }

    #[test]
    fn migrate_batch_failure_records_nothing() {
        let db = Arc::new(MemoryDatabase::new());
        let reg = registry(&["A", "C"]);
        reg.register("B", failing(), statement("down B")).unwrap();
        let m = migrator(&db, &reg);

        let err = m.migrate_batch().unwrap_err();
        assert!(matches!(
            err,
            Error::Changeset { ref name, phase: Phase::Migrate, .. } if name == "B"
        ));
        assert!(db.applied(&table()).is_empty());
        assert!(db.statements().is_empty());
        assert_eq!(db.rollback_count(), 1);
    }

    #[test]
    fn step_by_step_keeps_progress_before_a_failure() {
        let db = Arc::new(MemoryDatabase::new());
        let reg = registry(&["A", "C"]);
        reg.register("B", failing(), statement("down B")).unwrap();
        let m = migrator(&db, &reg);

        assert!(m.migrate_step_by_step().is_err());
        assert_eq!(batches(&db), vec![("A".to_string(), 1)]);
        assert_eq!(db.statements(), vec!["up A"]);
    }

    #[test]
    fn step_by_step_gives_each_migration_its_own_batch() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&["A", "B", "C"]));

        let report = m.migrate_step_by_step().unwrap();
        let got: Vec<i64> = report.applied.iter().map(|e| e.batch).collect();
        assert_eq!(got, vec![1, 2, 3]);

        // so a rollback undoes exactly the last one
        let rollback = m.rollback().unwrap();
        assert_eq!(rollback.batch, Some(3));
        assert_eq!(rollback.rolled_back, vec!["C"]);
        assert_eq!(db.applied_names(&table()), vec!["A", "B"]);
    }

    #[test]
    fn step_by_step_continues_from_applied_batches() {
        let db = Arc::new(MemoryDatabase::new());
        db.seed(&table(), "A", 1);
        let m = migrator(&db, &registry(&["A", "B"]));

        let report = m.migrate_step_by_step().unwrap();
        assert_eq!(
            report.applied,
            vec![AppliedEntry {
                name: "B".into(),
                batch: 2
            }]
        );
    }

    #[test]
    fn rollback_undoes_the_whole_batch_in_name_order() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&["A", "B", "C"]));
        m.migrate_batch().unwrap();

        let report = m.rollback().unwrap();
        assert_eq!(report.batch, Some(1));
        assert_eq!(report.rolled_back, vec!["A", "B", "C"]);
        assert!(db.applied(&table()).is_empty());
        assert_eq!(
            db.statements(),
            vec!["up A", "up B", "up C", "down A", "down B", "down C"]
        );

        // the next batch starts from 1 again
        let report = m.migrate_batch().unwrap();
        assert!(report.applied.iter().all(|e| e.batch == 1));
    }

    #[test]
    fn rollback_of_empty_table_is_a_no_op() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&["A"]));
        assert_eq!(m.rollback().unwrap(), RollbackReport::default());
        assert!(db.statements().is_empty());
    }

    #[test]
    fn rollback_failure_keeps_rows() {
        let db = Arc::new(MemoryDatabase::new());
        let reg = registry(&["A"]);
        reg.register("B", statement("up B"), failing()).unwrap();
        let m = migrator(&db, &reg);
        m.migrate_batch().unwrap();

        let err = m.rollback().unwrap_err();
        assert!(matches!(
            err,
            Error::Changeset { ref name, phase: Phase::Rollback, .. } if name == "B"
        ));
        assert_eq!(db.applied_names(&table()), vec!["A", "B"]);
    }

    #[test]
    fn unknown_applied_migration_stops_every_run_mode() {
        let db = Arc::new(MemoryDatabase::new());
        db.seed(&table(), "Z", 1);
        let m = migrator(&db, &registry(&["A"]));

        for result in [
            m.migrate_batch().map(|_| ()),
            m.migrate_step_by_step().map(|_| ()),
            m.rollback().map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(Error::UnknownAppliedMigration(ref u)) if *u == vec!["Z".to_string()]
            ));
        }
        assert!(db.statements().is_empty());
        assert_eq!(db.applied_names(&table()), vec!["Z"]);
    }

    #[test]
    fn init_runs_initial_migration_first() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&[DEFAULT_INITIAL_MIGRATION_NAME, "A"]));

        let report = m.init().unwrap();
        assert_eq!(report.names(), vec![DEFAULT_INITIAL_MIGRATION_NAME]);
        assert_eq!(report.applied[0].batch, 1);

        let report = m.migrate_batch().unwrap();
        assert_eq!(report.names(), vec!["A"]);
        assert_eq!(report.applied[0].batch, 2);
    }

    #[test]
    fn init_requires_initial_migration() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&["A"]));
        assert!(matches!(
            m.init(),
            Err(Error::InitialMigrationNotFound(ref n)) if n == DEFAULT_INITIAL_MIGRATION_NAME
        ));
        assert!(!db.has_table(&table()));
    }

    #[test]
    fn lock_is_taken_in_every_mutating_transaction() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &registry(&["A", "B"]));
        m.migrate_step_by_step().unwrap();
        // discovery plus one per migration
        assert_eq!(db.lock_count(), 3);

        m.rollback().unwrap();
        assert_eq!(db.lock_count(), 4);

        m.status().unwrap();
        assert_eq!(db.lock_count(), 4);
    }

    #[test]
    fn no_lock_when_disabled() {
        let db = Arc::new(MemoryDatabase::new());
        let m = builder(&db, &registry(&["A", "B"]))
            .explicit_lock(false)
            .build()
            .unwrap();
        m.migrate_step_by_step().unwrap();
        m.rollback().unwrap();
        m.migrate_batch().unwrap();
        assert_eq!(db.lock_count(), 0);
        assert!(db.commit_count() > 0);
    }

    #[test]
    fn cancelled_before_run_executes_nothing() {
        let db = Arc::new(MemoryDatabase::new());
        let cancel = Cancellation::unbounded();
        cancel.cancel();
        let m = builder(&db, &registry(&["A"]))
            .cancellation(cancel)
            .build()
            .unwrap();

        assert!(matches!(m.migrate_batch(), Err(Error::Cancelled)));
        assert!(db.events().is_empty());
        assert!(!db.has_table(&table()));
    }

    #[test]
    fn cancellation_mid_run_rolls_back_only_the_open_transaction() {
        let db = Arc::new(MemoryDatabase::new());
        let cancel = Cancellation::unbounded();
        let trip = cancel.clone();

        let reg = registry(&["A"]);
        reg.register(
            "B",
            Changeset::handle(move |_| {
                trip.cancel();
                Ok(())
            }),
            statement("down B"),
        )
        .unwrap();
        reg.register("C", statement("up C"), statement("down C")).unwrap();

        let m = builder(&db, &reg).cancellation(cancel).build().unwrap();
        let err = m.migrate_step_by_step().unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(db.applied_names(&table()), vec!["A"]);
        assert_eq!(db.events().last(), Some(&Event::Rollback));
    }

    #[test]
    fn status_reports_without_failing() {
        let db = Arc::new(MemoryDatabase::new());
        db.seed(&table(), "A", 1);
        db.seed(&table(), "Z", 1);
        let m = migrator(&db, &registry(&["A", "C", "B"]));

        let status = m.status().unwrap();
        let applied: Vec<&str> = status.applied.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(applied, vec!["A", "Z"]);
        assert_eq!(status.pending, vec!["B", "C"]);
        assert_eq!(status.unknown, vec!["Z"]);

        assert!(matches!(m.pending(), Err(Error::UnknownAppliedMigration(_))));
    }

    #[test]
    fn context_flavour_follows_backend_unless_overridden() {
        let reg = Registry::new();
        reg.register(
            "A",
            Changeset::with_context(|tx, context| {
                tx.execute_batch(&format!("flavour {}", context.flavour))
            }),
            statement("down A"),
        )
        .unwrap();

        let db = Arc::new(MemoryDatabase::with_flavour(Flavour::CockroachDb));
        migrator(&db, &reg).migrate_batch().unwrap();
        assert_eq!(db.statements(), vec!["flavour cockroachdb"]);

        let db = Arc::new(MemoryDatabase::new());
        builder(&db, &reg)
            .flavour(Flavour::Sqlite)
            .build()
            .unwrap()
            .migrate_batch()
            .unwrap();
        assert_eq!(db.statements(), vec!["flavour sqlite"]);
    }

    #[test]
    fn migrations_registered_on_the_migrator_are_run() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &Registry::new());
        m.register("A", statement("up A"), statement("down A")).unwrap();
        assert_eq!(m.registry().count(), 1);
        assert_eq!(m.pending().unwrap(), vec!["A"]);
    }

    #[test]
    fn custom_table_name_is_used() {
        let db = Arc::new(MemoryDatabase::new());
        let m = builder(&db, &registry(&["A"]))
            .table_name("history")
            .build()
            .unwrap();
        m.migrate_batch().unwrap();

        let custom = TableName::parse("history").unwrap();
        assert_eq!(db.applied_names(&custom), vec!["A"]);
        assert!(!db.has_table(&table()));
        assert_eq!(db.events()[1], Event::Lock("history".into()));
    }

    #[test]
    fn verbosity_and_quiet_conflict() {
        let db = Arc::new(MemoryDatabase::new());
        let reg = Registry::new();

        let err = builder(&db, &reg).verbosity(2).quiet(1).build().err();
        assert!(matches!(err, Some(Error::InvalidVerbosity { current: 2 })));

        let err = builder(&db, &reg).quiet(1).verbosity(1).build().err();
        assert!(matches!(err, Some(Error::InvalidVerbosity { current: -1 })));

        let m = builder(&db, &reg).quiet(3).build().unwrap();
        assert_eq!(m.verbosity(), -3);
    }

    #[test]
    fn first_failing_step_wins() {
        let db = Arc::new(MemoryDatabase::new());
        let err = builder(&db, &Registry::new())
            .table_name("a.b.c")
            .initial_name("")
            .build()
            .err();
        assert!(matches!(err, Some(Error::Config(_))));
    }

    #[test]
    fn config_steps_apply_file_settings() {
        let db = Arc::new(MemoryDatabase::new());
        let config = MigrationConfig {
            table_name: "history".into(),
            initial_migration: "0000_base".into(),
            name_convention: NameConvention::CamelCase,
            explicit_lock: false,
            quiet: 1,
            ..Default::default()
        };
        let m = builder(&db, &Registry::new()).config(&config).build().unwrap();

        assert_eq!(m.table().to_string(), "history");
        assert_eq!(m.initial_migration(), "0000_base");
        assert_eq!(m.name_convention(), NameConvention::CamelCase);
        assert!(!m.explicit_lock());
        assert_eq!(m.verbosity(), -1);
    }

    #[test]
    fn defaults() {
        let db = Arc::new(MemoryDatabase::new());
        let handle = Arc::clone(&db);
        let m = Migrator::builder(move || Ok(Arc::clone(&handle)))
            .build()
            .unwrap();
        assert_eq!(m.table().to_string(), DEFAULT_MIGRATION_TABLE_NAME);
        assert_eq!(m.initial_migration(), DEFAULT_INITIAL_MIGRATION_NAME);
        assert!(m.explicit_lock());
        assert_eq!(m.verbosity(), 0);
        assert!(!m.cancellation().is_cancelled());
        assert_eq!(m.migration_dir(), std::env::current_dir().unwrap());
        assert!(m.template_dir().is_none());
    }

    #[test]
    fn create_writes_a_rust_migration() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(MemoryDatabase::new());
        let m = builder(&db, &Registry::new())
            .migration_dir(dir.path())
            .build()
            .unwrap();

        let path = m.create("add users").unwrap();
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.ends_with("_add_users.rs"), "{file_name}");
        assert!(file_name[..14].chars().all(|c| c.is_ascii_digit()));
        assert!(fs::read_to_string(&path).unwrap().contains("pub fn register"));

        assert!(matches!(m.create("   "), Err(Error::NoMigrationName)));
    }

    #[test]
    fn create_from_named_template() {
        let migrations = tempfile::tempdir().unwrap();
        let templates = tempfile::tempdir().unwrap();
        fs::write(templates.path().join("table.sql"), "-- {{filename}}\n").unwrap();

        let db = Arc::new(MemoryDatabase::new());
        let m = builder(&db, &Registry::new())
            .migration_dir(migrations.path())
            .template_dir(templates.path())
            .name_convention(NameConvention::CamelCase)
            .build()
            .unwrap();

        let template = m.template("table").unwrap();
        let path = m.create_from_template("add users", &template).unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap().to_string();
        assert!(stem.ends_with("AddUsers"));
        assert_eq!(path.extension().unwrap(), "sql");
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("-- {stem}\n"));
    }

    #[test]
    fn named_template_needs_a_template_dir() {
        let db = Arc::new(MemoryDatabase::new());
        let m = migrator(&db, &Registry::new());
        assert!(matches!(m.template("table"), Err(Error::Config(_))));
    }
}
