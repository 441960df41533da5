pub mod cancel;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod pg;
pub mod sqlite;
pub mod table;
pub mod transaction;

pub use cancel::Cancellation;
pub use memory::MemoryDatabase;
#[cfg(feature = "postgres")]
pub use pg::PostgresDatabase;
pub use sqlite::SqliteDatabase;
pub use table::TableName;
pub use transaction::{AppliedMigration, Database, Row, SqlValue, TrackingTransaction, Transaction};
