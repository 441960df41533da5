pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, DEFAULT_INITIAL_MIGRATION_NAME, DEFAULT_MIGRATION_TABLE_NAME, DatabaseConfig,
    MigrationConfig,
};
