use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CANDIDATES: &[&str] = &["strata.toml", "strata.yaml", "strata.yml"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse `path` as YAML or TOML depending on its extension, then validate.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: AppConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        config.validate()?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// First `strata.{toml,yaml,yml}` found in `dir`, if any.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        let found = CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file());
        if found.is_none() {
            debug!("no config file in {}", dir.display());
        }
        found
    }

    /// Load the discovered config from `dir`, or defaults when there is none.
    pub fn load_or_default(dir: &Path) -> Result<AppConfig> {
        match Self::discover(dir) {
            Some(path) => Self::load(&path),
            None => Ok(AppConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use strata_common::{Flavour, NameConvention};

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        fs::write(
            &path,
            r#"
[database]
url = "app.db"

[migrations]
table_name = "schema_history"
name_convention = "camelCase"
explicit_lock = false
verbosity = 1
flavour = "cockroachdb"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("app.db"));
        assert_eq!(config.migrations.table_name, "schema_history");
        assert_eq!(config.migrations.name_convention, NameConvention::CamelCase);
        assert!(!config.migrations.explicit_lock);
        assert_eq!(config.migrations.flavour, Some(Flavour::CockroachDb));
        // unspecified fields keep their defaults
        assert_eq!(config.migrations.initial_migration, "000000000000_init");
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.yaml");
        fs::write(&path, "migrations:\n  quiet: 2\n  migration_dir: db/migrations\n").unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.migrations.quiet, 2);
        assert_eq!(
            config.migrations.migration_dir.as_deref(),
            Some(Path::new("db/migrations"))
        );
    }

    #[test]
    fn rejects_conflicting_verbosity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        fs::write(&path, "[migrations]\nverbosity = 1\nquiet = 1\n").unwrap();
        assert!(matches!(
            ConfigLoader::load(&path),
            Err(Error::InvalidVerbosity { .. })
        ));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.ini");
        fs::write(&path, "").unwrap();
        assert!(matches!(ConfigLoader::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn discover_prefers_toml() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::discover(dir.path()).is_none());
        assert_eq!(
            ConfigLoader::load_or_default(dir.path()).unwrap(),
            AppConfig::default()
        );

        fs::write(dir.path().join("strata.yml"), "").unwrap();
        fs::write(dir.path().join("strata.toml"), "").unwrap();
        assert_eq!(
            ConfigLoader::discover(dir.path()),
            Some(dir.path().join("strata.toml"))
        );
    }
}
