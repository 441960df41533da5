use std::path::Path;

use strata_common::{Error, Flavour, Result};
#[cfg(feature = "postgres")]
use strata_db::PostgresDatabase;
use strata_db::{Cancellation, Database, SqliteDatabase, TrackingTransaction};

/// Whichever backend the `--database` value selected.
pub enum Backend {
    Sqlite(SqliteDatabase),
    #[cfg(feature = "postgres")]
    Postgres(PostgresDatabase),
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// Open the database named by `url`.
///
/// `postgres://` and `postgresql://` URLs go to Postgres; anything else is a
/// SQLite file path, with an optional `sqlite://` prefix.
pub fn open(url: Option<&str>, flavour: Option<Flavour>) -> Result<Backend> {
    let url = url.ok_or_else(|| {
        Error::Config("no database configured; pass --database or set STRATA_DATABASE".into())
    })?;

    if is_postgres_url(url) {
        return open_postgres(url, flavour);
    }

    let path = url.strip_prefix("sqlite://").unwrap_or(url);
    Ok(Backend::Sqlite(SqliteDatabase::open(Path::new(path))?))
}

#[cfg(feature = "postgres")]
fn open_postgres(url: &str, flavour: Option<Flavour>) -> Result<Backend> {
    let db = PostgresDatabase::connect_with_flavour(url, flavour.unwrap_or(Flavour::Postgres))?;
    Ok(Backend::Postgres(db))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(_url: &str, _flavour: Option<Flavour>) -> Result<Backend> {
    Err(Error::Config(
        "postgres URLs need strata built with the `postgres` feature".into(),
    ))
}

impl Database for Backend {
    fn flavour(&self) -> Flavour {
        match self {
            Self::Sqlite(db) => db.flavour(),
            #[cfg(feature = "postgres")]
            Self::Postgres(db) => db.flavour(),
        }
    }

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()> {
        match self {
            Self::Sqlite(db) => db.run_in_transaction(cancel, work),
            #[cfg(feature = "postgres")]
            Self::Postgres(db) => db.run_in_transaction(cancel, work),
        }
    }
}
