mod backend;
mod commands;
mod output;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// strata - transactional schema migrations
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: strata.toml / strata.yaml in the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database to migrate: a postgres:// URL or a SQLite file path
    #[arg(long, env = "STRATA_DATABASE", global = true)]
    pub database: Option<String>,

    /// Tracking table, optionally schema-qualified
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Directory holding migration files
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Do not lock the tracking table
    #[arg(long, global = true)]
    pub no_lock: bool,

    /// More output; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Less output; repeat for less
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the initial migration
    Init,

    /// Apply pending migrations
    Migrate {
        /// Apply each migration in its own transaction and batch
        #[arg(long)]
        one_by_one: bool,
    },

    /// Undo the most recent batch
    Rollback,

    /// Scaffold a new migration file
    Create {
        /// What the migration does, e.g. "add users table"
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,

        /// Named template from the template directory
        #[arg(long, value_name = "NAME")]
        template: Option<String>,

        /// Generate a Rust module instead of a SQL file
        #[arg(long, conflicts_with = "template")]
        rust: bool,
    },

    /// Show applied, pending and unknown migrations
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8, quiet: u8) {
    let level = match (verbose, quiet) {
        (_, q) if q > 0 => "warn",
        (v, _) if v >= 2 => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    commands::run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_flags() {
        let cli = Cli::parse_from([
            "strata",
            "--database",
            "app.db",
            "-vv",
            "migrate",
            "--one-by-one",
            "--no-lock",
        ]);
        assert_eq!(cli.database.as_deref(), Some("app.db"));
        assert_eq!(cli.verbose, 2);
        assert!(cli.no_lock);
        assert!(matches!(cli.command, Command::Migrate { one_by_one: true }));
    }

    #[test]
    fn create_joins_description_words() {
        let cli = Cli::parse_from(["strata", "create", "add", "users", "--rust"]);
        match cli.command {
            Command::Create {
                description, rust, ..
            } => {
                assert_eq!(description, vec!["add", "users"]);
                assert!(rust);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rust_and_template_conflict() {
        let result = Cli::try_parse_from(["strata", "create", "x", "--rust", "--template", "t"]);
        assert!(result.is_err());
    }
}
