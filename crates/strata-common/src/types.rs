use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which Postgres-like API a migration is talking to.
///
/// Migrations receive this through their execution context so they can
/// branch on syntax the backends disagree about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavour {
    /// Upstream PostgreSQL, or anything wire- and syntax-compatible with it.
    #[default]
    Postgres,
    /// CockroachDB. Speaks the Postgres protocol with its own extensions.
    #[serde(alias = "cockroach", alias = "cockroachdb")]
    CockroachDb,
    Sqlite,
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::CockroachDb => write!(f, "cockroachdb"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Flavour {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "cockroachdb" | "cockroach" | "cockroach_db" => Ok(Self::CockroachDb),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!("unknown database flavour: {other}"))),
        }
    }
}

/// Casing used when generating migration file and function names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameConvention {
    #[default]
    #[serde(alias = "snakeCase")]
    SnakeCase,
    #[serde(alias = "camelCase")]
    CamelCase,
}

impl fmt::Display for NameConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnakeCase => write!(f, "snake_case"),
            Self::CamelCase => write!(f, "camel_case"),
        }
    }
}

impl FromStr for NameConvention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snake_case" | "snakeCase" | "snake" => Ok(Self::SnakeCase),
            "camel_case" | "camelCase" | "camel" => Ok(Self::CamelCase),
            other => Err(Error::Config(format!("unknown naming convention: {other}"))),
        }
    }
}

/// Direction a changeset runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Migrate,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Migrate => write!(f, "migrate"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}
