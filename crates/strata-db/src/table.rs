use std::fmt;
use std::str::FromStr;

use strata_common::{Error, Result};

/// Identity of the tracking table, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    /// Parse `table` or `schema.table`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (Some(schema.trim()), name.trim()),
            None => (None, raw),
        };

        if name.is_empty() || name.contains('.') {
            return Err(Error::Config(format!("invalid tracking table name: {raw:?}")));
        }
        if schema.is_some_and(str::is_empty) {
            return Err(Error::Config(format!("invalid tracking table schema: {raw:?}")));
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quoted identifier with its schema, e.g. `"public"."x_migrations"`.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Double-quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
