//! Migration orchestration: a catalog of named changesets and a migrator
//! that applies and rolls them back against a tracked database.

pub mod changeset;
pub mod migrator;
pub mod naming;
pub mod reconcile;
pub mod registry;
pub mod scaffold;
pub mod sql_dir;

pub use changeset::{Changeset, Migration, MigrationContext};
pub use migrator::{
    AppliedEntry, DEFAULT_INITIAL_MIGRATION_NAME, DEFAULT_MIGRATION_TABLE_NAME, Migrator,
    MigratorBuilder, RollbackReport, RunReport, Status,
};
pub use naming::{CamelCaser, Caser, SnakeCaser, caser_for};
pub use reconcile::{Reconciliation, reconcile};
pub use registry::{Registry, RegistryBuilder};
pub use scaffold::{Template, create_migration_file};
pub use sql_dir::load_sql_dir;

pub use strata_common::{Error, Flavour, NameConvention, Phase, Result};
pub use strata_db::{
    AppliedMigration, Cancellation, Database, SqlValue, TableName, TrackingTransaction, Transaction,
};
