use std::path::PathBuf;

use thiserror::Error;

use crate::types::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("migration already exists: {0}")]
    DuplicateName(String),

    #[error("invalid {phase} changeset for migration {name}: {reason}")]
    InvalidChangeset {
        name: String,
        phase: Phase,
        reason: String,
    },

    #[error("no migration name specified")]
    NoMigrationName,

    #[error("unknown applied migrations: {}", .0.join(", "))]
    UnknownAppliedMigration(Vec<String>),

    #[error("no migration by name: {0}")]
    MigrationNotRegistered(String),

    #[error("initial migration not known: {0}")]
    InitialMigrationNotFound(String),

    #[error("verbosity already set in opposite direction (current verbosity {current})")]
    InvalidVerbosity { current: i32 },

    #[error("migration file already exists: {}", .0.display())]
    FileAlreadyExists(PathBuf),

    #[error("{name} failed to {phase}: {source}")]
    Changeset {
        name: String,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a changeset failure with the migration it came from.
    pub fn changeset(name: impl Into<String>, phase: Phase, source: Error) -> Self {
        Self::Changeset {
            name: name.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// True for failures caused by a cancellation signal or an expired deadline,
    /// including ones wrapped by a changeset.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::Changeset { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}
