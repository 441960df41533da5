use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_common::{Error, Flavour, NameConvention, Result};

pub const DEFAULT_MIGRATION_TABLE_NAME: &str = "public.x_migrations";
pub const DEFAULT_INITIAL_MIGRATION_NAME: &str = "000000000000_init";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.migrations.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://...` URL or a SQLite file path.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub table_name: String,
    pub initial_migration: String,
    pub name_convention: NameConvention,
    pub explicit_lock: bool,
    pub verbosity: u8,
    pub quiet: u8,
    pub flavour: Option<Flavour>,
    pub migration_dir: Option<PathBuf>,
    pub template_dir: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_MIGRATION_TABLE_NAME.to_string(),
            initial_migration: DEFAULT_INITIAL_MIGRATION_NAME.to_string(),
            name_convention: NameConvention::default(),
            explicit_lock: true,
            verbosity: 0,
            quiet: 0,
            flavour: None,
            migration_dir: None,
            template_dir: None,
        }
    }
}

impl MigrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.verbosity > 0 && self.quiet > 0 {
            return Err(Error::InvalidVerbosity {
                current: i32::from(self.verbosity),
            });
        }
        if self.table_name.trim().is_empty() {
            return Err(Error::Config("migrations.table_name must not be empty".into()));
        }
        if self.initial_migration.trim().is_empty() {
            return Err(Error::Config(
                "migrations.initial_migration must not be empty".into(),
            ));
        }
        Ok(())
    }
}
