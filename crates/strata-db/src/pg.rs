//! PostgreSQL backend over the blocking `postgres` client.
//!
//! Also usable against CockroachDB; pass [`Flavour::CockroachDb`] to
//! [`PostgresDatabase::connect_with_flavour`] so migrations can tell.

use std::error::Error as StdError;
use std::sync::{Mutex, MutexGuard};

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use postgres::types::{IsNull, ToSql, Type};
use postgres::{Client, NoTls};
use strata_common::{Error, Flavour, Result};
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::table::TableName;
use crate::transaction::{AppliedMigration, Database, Row, SqlValue, TrackingTransaction, Transaction};

pub struct PostgresDatabase {
    client: Mutex<Client>,
    flavour: Flavour,
}

impl PostgresDatabase {
    pub fn connect(url: &str) -> Result<Self> {
        Self::connect_with_flavour(url, Flavour::Postgres)
    }

    pub fn connect_with_flavour(url: &str, flavour: Flavour) -> Result<Self> {
        info!("connecting to {flavour} migration database");
        let client = Client::connect(url, NoTls)
            .map_err(|e| Error::Database(format!("failed to connect: {e}")))?;
        Ok(Self {
            client: Mutex::new(client),
            flavour,
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Client>> {
        self.client
            .lock()
            .map_err(|_| Error::Database("migration database lock poisoned".into()))
    }
}

impl Database for PostgresDatabase {
    fn flavour(&self) -> Flavour {
        self.flavour
    }

    fn run_in_transaction(
        &self,
        cancel: &Cancellation,
        work: &mut dyn FnMut(&mut dyn TrackingTransaction) -> Result<()>,
    ) -> Result<()> {
        cancel.check()?;
        let mut client = self.connection()?;
        // Dropping an uncommitted transaction rolls it back.
        let mut tx = client
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        {
            let mut handle = PostgresTransaction {
                tx: &mut tx,
                cancel,
                flavour: self.flavour,
            };
            work(&mut handle)?;
        }

        cancel.check()?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))
    }
}

struct PostgresTransaction<'a, 'c> {
    tx: &'a mut postgres::Transaction<'c>,
    cancel: &'a Cancellation,
    flavour: Flavour,
}

impl Transaction for PostgresTransaction<'_, '_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.cancel.check()?;
        debug!("execute: {sql}");
        let params = as_params(params);
        self.tx
            .execute(sql, &params)
            .map(|n| n as usize)
            .map_err(|e| Error::Database(format!("failed to execute statement: {e}")))
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.cancel.check()?;
        debug!("execute batch: {sql}");
        self.tx
            .batch_execute(sql)
            .map_err(|e| Error::Database(format!("failed to execute script: {e}")))
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.cancel.check()?;
        debug!("query: {sql}");
        let params = as_params(params);
        let rows = self
            .tx
            .query(sql, &params)
            .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

        rows.iter()
            .map(|row| (0..row.len()).map(|idx| column_value(row, idx)).collect())
            .collect()
    }

    fn flavour(&self) -> Flavour {
        self.flavour
    }
}

impl TrackingTransaction for PostgresTransaction<'_, '_> {
    fn as_transaction(&mut self) -> &mut dyn Transaction {
        self
    }

    fn ensure_table(&mut self, table: &TableName) -> Result<()> {
        self.cancel.check()?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id serial,
                name varchar,
                batch integer,
                migration_time timestamptz
            )",
            table.quoted()
        );
        self.tx
            .batch_execute(&sql)
            .map_err(|e| Error::Database(format!("failed to create tracking table {table}: {e}")))
    }

    fn lock_table(&mut self, table: &TableName) -> Result<()> {
        self.cancel.check()?;
        // SHARE ROW EXCLUSIVE conflicts with itself and with writers but not
        // with ACCESS SHARE, so dumps and plain reads keep working.
        let sql = format!("LOCK {} IN SHARE ROW EXCLUSIVE MODE", table.quoted());
        self.tx
            .batch_execute(&sql)
            .map_err(|e| Error::Database(format!("failed to lock tracking table {table}: {e}")))
    }

    fn applied_names(&mut self, table: &TableName) -> Result<Vec<String>> {
        self.cancel.check()?;
        let sql = format!("SELECT name FROM {} ORDER BY id", table.quoted());
        self.query_names(&sql, &[])
    }

    fn applied_migrations(&mut self, table: &TableName) -> Result<Vec<AppliedMigration>> {
        self.cancel.check()?;
        let sql = format!(
            "SELECT id::bigint, name, batch::bigint, migration_time FROM {} ORDER BY id",
            table.quoted()
        );
        let rows = self
            .tx
            .query(sql.as_str(), &[])
            .map_err(|e| Error::Database(format!("failed to query applied migrations: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(AppliedMigration {
                    id: row.try_get(0).map_err(read_err)?,
                    name: row.try_get(1).map_err(read_err)?,
                    batch: row.try_get(2).map_err(read_err)?,
                    applied_at: row
                        .try_get::<_, Option<DateTime<Utc>>>(3)
                        .map_err(read_err)?
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    fn max_batch(&mut self, table: &TableName) -> Result<i64> {
        self.cancel.check()?;
        let sql = format!("SELECT COALESCE(MAX(batch), 0)::bigint FROM {}", table.quoted());
        let row = self
            .tx
            .query_one(sql.as_str(), &[])
            .map_err(|e| Error::Database(format!("failed to read batch number: {e}")))?;
        row.try_get(0).map_err(read_err)
    }

    fn batch_names(&mut self, table: &TableName, batch: i64) -> Result<Vec<String>> {
        self.cancel.check()?;
        let batch = batch_param(batch)?;
        let sql = format!(
            "SELECT name FROM {} WHERE batch = $1 ORDER BY id DESC",
            table.quoted()
        );
        self.query_names(&sql, &[&batch])
    }

    fn record(&mut self, table: &TableName, name: &str, batch: i64) -> Result<()> {
        self.cancel.check()?;
        let batch = batch_param(batch)?;
        let sql = format!(
            "INSERT INTO {} (name, batch, migration_time) VALUES ($1, $2, now())",
            table.quoted()
        );
        self.tx
            .execute(sql.as_str(), &[&name, &batch])
            .map(|_| ())
            .map_err(|e| Error::Database(format!("failed to record migration {name}: {e}")))
    }

    fn erase(&mut self, table: &TableName, name: &str) -> Result<()> {
        self.cancel.check()?;
        let sql = format!("DELETE FROM {} WHERE name = $1", table.quoted());
        self.tx
            .execute(sql.as_str(), &[&name])
            .map(|_| ())
            .map_err(|e| Error::Database(format!("failed to erase migration {name}: {e}")))
    }
}

impl PostgresTransaction<'_, '_> {
    fn query_names(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<String>> {
        let rows = self
            .tx
            .query(sql, params)
            .map_err(|e| Error::Database(format!("failed to query migration names: {e}")))?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(read_err))
            .collect()
    }
}

fn batch_param(batch: i64) -> Result<i32> {
    i32::try_from(batch).map_err(|_| Error::Database(format!("batch number out of range: {batch}")))
}

fn read_err(e: postgres::Error) -> Error {
    Error::Database(format!("failed to read column: {e}"))
}

fn as_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn column_value(row: &postgres::Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_().clone();
    let value: std::result::Result<SqlValue, postgres::Error> = if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx).map(|v| v.map(i64::from).into())
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx).map(|v| v.map(i64::from).into())
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(Into::into)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx).map(|v| v.map(f64::from).into())
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(Into::into)
    } else if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(|v| v.map(i64::from).into())
    } else if ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx).map(Into::into)
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map(|dt| dt.to_rfc3339()).into())
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR || ty == Type::NAME {
        row.try_get::<_, Option<String>>(idx).map(Into::into)
    } else {
        return Err(Error::Database(format!(
            "unsupported column type {ty} in column {idx}"
        )));
    };
    value.map_err(read_err)
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Integer(v) if *ty == Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
            SqlValue::Integer(v) if *ty == Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
            SqlValue::Integer(v) if *ty == Type::BOOL => (*v != 0).to_sql(ty, out),
            SqlValue::Integer(v) => v.to_sql(ty, out),
            SqlValue::Real(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            SqlValue::Real(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Blob(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.to_sql(ty, out)
    }
}
