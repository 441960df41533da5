use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::debug;

const RUST_TEMPLATE: &str = r#"//! Migration {{filename}}.

use strata_migrate::{Changeset, MigrationContext, Registry, Result, Transaction};

pub fn register(registry: &Registry) -> Result<()> {
    registry.register(
        "{{filename}}",
        Changeset::with_context(up_{{func_name}}),
        Changeset::with_context(down_{{func_name}}),
    )
}

fn up_{{func_name}}(tx: &mut dyn Transaction, _context: &MigrationContext) -> Result<()> {
    tx.execute_batch("")
}

fn down_{{func_name}}(tx: &mut dyn Transaction, _context: &MigrationContext) -> Result<()> {
    tx.execute_batch("")
}
"#;

const SQL_TEMPLATE: &str = "-- Migration: {{filename}}

-- Up migration


-- Down migration

";

/// Text a new migration file is rendered from.
///
/// `{{filename}}` and `{{func_name}}` are replaced when rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
    extension: String,
}

impl Template {
    pub fn new(text: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// A Rust module exposing `register(&Registry)`.
    pub fn rust() -> Self {
        Self::new(RUST_TEMPLATE, "rs")
    }

    /// A plain SQL file with up and down sections, loadable by
    /// [`load_sql_dir`](crate::load_sql_dir).
    pub fn sql() -> Self {
        Self::new(SQL_TEMPLATE, "sql")
    }

    /// Load the template called `name` from `dir`.
    ///
    /// `name` may carry an extension (`table.sql`) or not (`table`); in the
    /// latter case the first file in `dir` with that stem is used. The new
    /// migration file takes the template file's extension.
    pub fn from_dir(dir: &Path, name: &str) -> Result<Self> {
        let path = find_template(dir, name)?;
        let text = fs::read_to_string(&path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("rs")
            .to_string();
        debug!("loaded template {}", path.display());
        Ok(Self::new(text, extension))
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn render(&self, filename: &str, func_name: &str) -> String {
        self.text
            .replace("{{filename}}", filename)
            .replace("{{func_name}}", func_name)
    }
}

fn find_template(dir: &Path, name: &str) -> Result<PathBuf> {
    let direct = dir.join(name);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.file_stem().and_then(|s| s.to_str()) == Some(name))
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        Error::Config(format!(
            "template {name} not found in {}",
            dir.display()
        ))
    })
}

/// Render `template` into `dir/<filename>.<extension>`.
///
/// The file is created atomically and never overwritten: an existing path
/// fails with `FileAlreadyExists`.
pub fn create_migration_file(
    dir: &Path,
    filename: &str,
    func_name: &str,
    template: &Template,
) -> Result<PathBuf> {
    let path = if template.extension.is_empty() {
        dir.join(filename)
    } else {
        dir.join(format!("{filename}.{}", template.extension))
    };

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(Error::FileAlreadyExists(path));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(template.render(filename, func_name).as_bytes())?;
    file.sync_all()?;

    Ok(path)
}
