use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use strata_config::{AppConfig, ConfigLoader, MigrationConfig};
use strata_migrate::{Cancellation, Migrator, Registry, Template, load_sql_dir};
use tracing::debug;

use crate::backend::{self, Backend};
use crate::output;
use crate::{Cli, Command};

const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

pub fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_or_default(&cwd)?,
    };

    let migration_dir = cli
        .migrations_dir
        .clone()
        .or_else(|| config.migrations.migration_dir.clone())
        .unwrap_or_else(|| cwd.join(DEFAULT_MIGRATIONS_DIR));

    let migrator = build_migrator(&cli, &config, &migration_dir)?;

    match cli.command {
        Command::Init => output::print_run(&migrator.init()?),
        Command::Migrate { one_by_one } => {
            let report = if one_by_one {
                migrator.migrate_step_by_step()?
            } else {
                migrator.migrate_batch()?
            };
            output::print_run(&report);
        }
        Command::Rollback => output::print_rollback(&migrator.rollback()?),
        Command::Create {
            description,
            template,
            rust,
        } => {
            let template = match template {
                Some(name) => migrator.template(&name)?,
                None if rust => Template::rust(),
                None => Template::sql(),
            };
            std::fs::create_dir_all(&migration_dir).with_context(|| {
                format!("failed to create {}", migration_dir.display())
            })?;
            let path = migrator.create_from_template(&description.join(" "), &template)?;
            println!("{}", path.display());
        }
        Command::Status { json } => {
            let status = migrator.status()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output::status_json(&status))?
                );
            } else {
                output::print_status(&status, migrator.table());
            }
        }
    }

    Ok(())
}

/// Command-line flags win over the config file.
fn effective_config(cli: &Cli, config: &AppConfig) -> MigrationConfig {
    let mut migrations = config.migrations.clone();
    if cli.verbose > 0 || cli.quiet > 0 {
        migrations.verbosity = 0;
        migrations.quiet = 0;
    }
    if let Some(table) = &cli.table {
        migrations.table_name = table.clone();
    }
    if cli.no_lock {
        migrations.explicit_lock = false;
    }
    migrations
}

fn build_migrator(cli: &Cli, config: &AppConfig, migration_dir: &Path) -> Result<Migrator<Backend>> {
    let registry = Registry::new();
    if migration_dir.is_dir() {
        let count = load_sql_dir(migration_dir, &registry)?;
        debug!("loaded {count} sql migrations from {}", migration_dir.display());
    }

    let migrations = effective_config(cli, config);
    let url = cli.database.clone().or_else(|| config.database.url.clone());
    let flavour = migrations.flavour;

    let mut builder = Migrator::builder(move || backend::open(url.as_deref(), flavour))
        .config(&migrations)
        .migrations(&registry)
        .migration_dir(PathBuf::from(migration_dir));
    if cli.verbose > 0 {
        builder = builder.verbosity(cli.verbose);
    }
    if cli.quiet > 0 {
        builder = builder.quiet(cli.quiet);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.cancellation(Cancellation::with_timeout(Duration::from_secs(secs)));
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use strata_common::Error;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("strata").chain(args.iter().copied()))
    }

    #[test]
    fn flags_override_config() {
        let config = AppConfig {
            migrations: MigrationConfig {
                verbosity: 2,
                table_name: "from_file".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let migrations = effective_config(&cli(&["-q", "--table", "t", "--no-lock", "status"]), &config);
        assert_eq!(migrations.table_name, "t");
        assert_eq!(migrations.verbosity, 0);
        assert!(!migrations.explicit_lock);
    }

    #[test]
    fn verbose_and_quiet_together_fail() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_migrator(&cli(&["-v", "-q", "status"]), &AppConfig::default(), dir.path())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidVerbosity { .. })
        ));
    }

    #[test]
    fn migrates_sql_directory_into_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migrations");
        fs::create_dir(&migrations).unwrap();
        fs::write(
            migrations.join("001_users.sql"),
            "-- Up migration\nCREATE TABLE users (id INTEGER);\n-- Down migration\nDROP TABLE users;\n",
        )
        .unwrap();
        let db = dir.path().join("app.db");
        let db = db.to_str().unwrap();

        let args = cli(&["--database", db, "migrate"]);
        let migrator = build_migrator(&args, &AppConfig::default(), &migrations).unwrap();
        assert_eq!(migrator.migrate_batch().unwrap().names(), vec!["001_users"]);
        assert!(migrator.status().unwrap().pending.is_empty());
    }
}
