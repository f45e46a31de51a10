// Database Driver Traits
// Defines the backend abstraction shared by the SQL Server and PostgreSQL drivers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::db::params::Params;

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Mssql,
    Postgresql,
}

impl DatabaseType {
    /// Value of `database_used` that selects this backend
    pub fn config_value(&self) -> &'static str {
        match self {
            DatabaseType::Mssql => "SQL",
            DatabaseType::Postgresql => "POSTGRES",
        }
    }

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Postgresql => "PostgreSQL",
        }
    }
}

impl FromStr for DatabaseType {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SQL" => Ok(DatabaseType::Mssql),
            "POSTGRES" => Ok(DatabaseType::Postgresql),
            other => Err(DatabaseError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_value())
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Unsupported database type: {0:?}")]
    UnsupportedBackend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Sequence contains more than one element ({0} rows)")]
    MultipleRows(usize),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Mssql(#[from] tiberius::error::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    /// Transport failure reported by a driver, e.g. a refused TCP connection
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Row mapping error: {0}")]
    Mapping(#[from] serde_json::Error),

    #[error("Runtime error: {0}")]
    Runtime(std::io::Error),
}

impl DatabaseError {
    fn checkout_timeout() -> Self {
        DatabaseError::Pool("Timed out waiting for a connection".to_string())
    }
}

impl From<bb8_tiberius::Error> for DatabaseError {
    fn from(err: bb8_tiberius::Error) -> Self {
        match err {
            bb8_tiberius::Error::Tiberius(e) => DatabaseError::Mssql(e),
            bb8_tiberius::Error::Io(e) => DatabaseError::Io(e),
        }
    }
}

impl From<bb8::RunError<bb8_tiberius::Error>> for DatabaseError {
    fn from(err: bb8::RunError<bb8_tiberius::Error>) -> Self {
        match err {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => DatabaseError::checkout_timeout(),
        }
    }
}

impl From<bb8::RunError<tokio_postgres::Error>> for DatabaseError {
    fn from(err: bb8::RunError<tokio_postgres::Error>) -> Self {
        match err {
            bb8::RunError::User(e) => DatabaseError::Postgres(e),
            bb8::RunError::TimedOut => DatabaseError::checkout_timeout(),
        }
    }
}

/// Whether a command is raw SQL text or a stored procedure/function name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandKind {
    #[default]
    Text,
    StoredProcedure,
}

/// Cell value in a result set or a bound parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<CellValue> for serde_json::Value {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(b),
            CellValue::Int(i) => serde_json::Value::from(i),
            // NaN and infinities have no JSON form
            CellValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::String(s) | CellValue::DateTime(s) => serde_json::Value::String(s),
            CellValue::Binary(bytes) => {
                serde_json::Value::Array(bytes.into_iter().map(serde_json::Value::from).collect())
            }
        }
    }
}

/// A single result row: column names in select order plus their values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<CellValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<CellValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name, ignoring ASCII case
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|idx| &self.values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Connection trait - one checked-out backend connection, owned by a single call
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Backend this connection talks to
    fn database_type(&self) -> DatabaseType;

    /// Run a command and collect the rows of its first result set
    async fn query(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
    ) -> Result<Vec<Row>, DatabaseError>;

    /// Run a command that returns no rows, yielding the affected-row count
    async fn execute(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
    ) -> Result<u64, DatabaseError>;

    async fn begin(&mut self) -> Result<(), DatabaseError>;

    async fn commit(&mut self) -> Result<(), DatabaseError>;

    async fn rollback(&mut self) -> Result<(), DatabaseError>;
}

/// Database driver trait - hands out connections for one configured backend
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    /// Acquire a connection for the duration of one call
    async fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError>;
}
