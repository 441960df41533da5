//! Registering plain `.sql` migration files.
//!
//! Each file holds an `-- Up migration` section and a `-- Down migration`
//! section. The migration name is the file stem.

use std::fs;
use std::path::{Path, PathBuf};

use strata_common::{Error, Phase, Result};
use tracing::debug;

use crate::changeset::Changeset;
use crate::registry::Registry;

#[derive(Debug, Default, PartialEq, Eq)]
struct Sections {
    up: String,
    down: String,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// `-- Up migration` style marker, ignoring case and spacing after `--`.
fn is_marker(line: &str, marker: &str) -> bool {
    line.trim_start_matches('-').trim().eq_ignore_ascii_case(marker)
}

fn parse_sections(content: &str) -> Sections {
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut section = Section::Preamble;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            if is_marker(trimmed, "up migration") {
                section = Section::Up;
            } else if is_marker(trimmed, "down migration") {
                section = Section::Down;
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        match section {
            Section::Up => up.push(line),
            Section::Down => down.push(line),
            Section::Preamble => {}
        }
    }

    Sections {
        up: up.join("\n").trim().to_string(),
        down: down.join("\n").trim().to_string(),
    }
}

fn sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "sql"))
        .collect();
    files.sort();
    Ok(files)
}

/// Register every `*.sql` file in `dir`, in file-name order.
///
/// Returns how many migrations were registered. A file with an empty up or
/// down section fails with `InvalidChangeset` before anything after it is
/// registered.
pub fn load_sql_dir(dir: &Path, registry: &Registry) -> Result<usize> {
    let files = sql_files(dir)?;
    for path in &files {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Config(format!("invalid migration file name: {}", path.display())))?;

        let sections = parse_sections(&fs::read_to_string(path)?);
        if sections.up.is_empty() {
            return Err(empty_section(name, Phase::Migrate));
        }
        if sections.down.is_empty() {
            return Err(empty_section(name, Phase::Rollback));
        }

        registry.register(name, Changeset::sql(sections.up), Changeset::sql(sections.down))?;
        debug!("loaded sql migration {}", path.display());
    }
    Ok(files.len())
}

fn empty_section(name: &str, phase: Phase) -> Error {
    Error::InvalidChangeset {
        name: name.to_string(),
        phase,
        reason: format!("no {phase} section in sql file"),
    }
}
