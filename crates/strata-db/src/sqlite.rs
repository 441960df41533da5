use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter};
use strata_common::{Error, Flavour, Result};
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::table::{TableName, quote_ident};
use crate::transaction::{AppliedMigration, Database, Row, SqlValue, TrackingTransaction, Transaction};

/// How long a writer waits for another connection's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite-backed [`Database`].
///
/// The connection sits behind a mutex, so a single `SqliteDatabase` runs one
/// transaction at a time. Separate processes serialize through SQLite's own
/// file locks.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening migration database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("migration database lock poisoned".into()))
    }
}

impl Database for SqliteDatabase {
    fn flavour(&self) -> Flavour {
        Flavour::Sqlite
    }

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()> {
        cancel.check()?;
        let mut conn = self.connection()?;
        // IMMEDIATE takes the write lock at BEGIN, where the busy timeout
        // applies; upgrading a deferred read lock later fails without waiting.
        // Dropping an uncommitted transaction rolls it back.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        {
            let mut handle = SqliteTransaction { tx: &tx, cancel };
            work(&mut handle)?;
        }

        cancel.check()?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))
    }
}

struct SqliteTransaction<'a, 'c> {
    tx: &'a rusqlite::Transaction<'c>,
    cancel: &'a Cancellation,
}

impl Transaction for SqliteTransaction<'_, '_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.cancel.check()?;
        debug!("execute: {sql}");
        self.tx
            .execute(sql, params_from_iter(params.iter()))
            .map_err(|e| Error::Database(format!("failed to execute statement: {e}")))
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.cancel.check()?;
        debug!("execute batch: {sql}");
        self.tx
            .execute_batch(sql)
            .map_err(|e| Error::Database(format!("failed to execute script: {e}")))
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.cancel.check()?;
        debug!("query: {sql}");
        let mut stmt = self
            .tx
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let columns = stmt.column_count();

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))?
        {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| Error::Database(format!("failed to read column {idx}: {e}")))?;
                values.push(from_value_ref(value));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn flavour(&self) -> Flavour {
        Flavour::Sqlite
    }
}

impl TrackingTransaction for SqliteTransaction<'_, '_> {
    fn as_transaction(&mut self) -> &mut dyn Transaction {
        self
    }

    fn ensure_table(&mut self, table: &TableName) -> Result<()> {
        self.cancel.check()?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                batch INTEGER NOT NULL,
                migration_time TEXT NOT NULL
            )",
            sqlite_table(table)
        );
        self.tx
            .execute_batch(&sql)
            .map_err(|e| Error::Database(format!("failed to create tracking table {table}: {e}")))
    }

    fn lock_table(&mut self, table: &TableName) -> Result<()> {
        self.cancel.check()?;
        // SQLite has no table locks. Any write statement takes the database's
        // RESERVED lock for the rest of the transaction, which keeps other
        // writers out while readers carry on, so issue one that touches no rows.
        let sql = format!("UPDATE {} SET batch = batch WHERE 0", sqlite_table(table));
        self.tx
            .execute(&sql, [])
            .map(|_| ())
            .map_err(|e| Error::Database(format!("failed to lock tracking table {table}: {e}")))
    }

    fn applied_names(&mut self, table: &TableName) -> Result<Vec<String>> {
        self.cancel.check()?;
        let sql = format!("SELECT name FROM {} ORDER BY id", sqlite_table(table));
        self.query_names(&sql, params![])
    }

    fn applied_migrations(&mut self, table: &TableName) -> Result<Vec<AppliedMigration>> {
        self.cancel.check()?;
        let sql = format!(
            "SELECT id, name, batch, migration_time FROM {} ORDER BY id",
            sqlite_table(table)
        );
        let mut stmt = self
            .tx
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    batch: row.get(2)?,
                    applied_at: parse_datetime(row.get::<_, String>(3)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query applied migrations: {e}")))?;

        let mut applied = Vec::new();
        for row in rows {
            applied.push(
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?,
            );
        }
        Ok(applied)
    }

    fn max_batch(&mut self, table: &TableName) -> Result<i64> {
        self.cancel.check()?;
        let sql = format!("SELECT COALESCE(MAX(batch), 0) FROM {}", sqlite_table(table));
        self.tx
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to read batch number: {e}")))
    }

    fn batch_names(&mut self, table: &TableName, batch: i64) -> Result<Vec<String>> {
        self.cancel.check()?;
        let sql = format!(
            "SELECT name FROM {} WHERE batch = ?1 ORDER BY id DESC",
            sqlite_table(table)
        );
        self.query_names(&sql, params![batch])
    }

    fn record(&mut self, table: &TableName, name: &str, batch: i64) -> Result<()> {
        self.cancel.check()?;
        let sql = format!(
            "INSERT INTO {} (name, batch, migration_time) VALUES (?1, ?2, ?3)",
            sqlite_table(table)
        );
        self.tx
            .execute(&sql, params![name, batch, Utc::now().to_rfc3339()])
            .map(|_| ())
            .map_err(|e| Error::Database(format!("failed to record migration {name}: {e}")))
    }

    fn erase(&mut self, table: &TableName, name: &str) -> Result<()> {
        self.cancel.check()?;
        let sql = format!("DELETE FROM {} WHERE name = ?1", sqlite_table(table));
        self.tx
            .execute(&sql, params![name])
            .map(|_| ())
            .map_err(|e| Error::Database(format!("failed to erase migration {name}: {e}")))
    }
}

impl SqliteTransaction<'_, '_> {
    fn query_names(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<String>> {
        let mut stmt = self
            .tx
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query migration names: {e}")))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(
                row.map_err(|e| Error::Database(format!("failed to read migration name: {e}")))?,
            );
        }
        Ok(names)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}

/// SQLite has no `public` schema; tables there live in the main database.
fn sqlite_table(table: &TableName) -> String {
    match table.schema() {
        None | Some("public") => quote_ident(table.name()),
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table.name())),
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // Rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
