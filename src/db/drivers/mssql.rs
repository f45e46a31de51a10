// MS-SQL Driver
// Implements DatabaseDriver for SQL Server using tiberius behind a bb8 pool

use crate::db::params::{Params, DATETIME_FORMAT};
use crate::db::pool::{TrackedManager, TrackedPool};
use crate::db::statement::{bind_text, mssql_procedure_call, BoundStatement, PlaceholderStyle};
use crate::db::traits::{
    CellValue, CommandKind, Connection, DatabaseDriver, DatabaseError, DatabaseType, Row,
};
use bb8::PooledConnection;
use bb8_tiberius::ConnectionManager;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{ColumnType, Config, Query};

/// Type alias for our connection pool
pub type MssqlPool = TrackedPool<ConnectionManager>;

type PooledClient = PooledConnection<'static, TrackedManager<ConnectionManager>>;

/// MS-SQL connection checked out of the pool for one call
pub struct MssqlConnection {
    client: PooledClient,
}

impl MssqlConnection {
    fn bind(sql: &str, params: &Params, kind: CommandKind) -> Query<'static> {
        let bound = match kind {
            CommandKind::Text => bind_text(sql, params, PlaceholderStyle::AtP),
            CommandKind::StoredProcedure => mssql_procedure_call(sql, params),
        };
        build_query(bound)
    }

    async fn run_batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let client = self.client.start();
        client.simple_query(sql).await?.into_results().await?;
        self.client.finish();
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for MssqlConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
    ) -> Result<Vec<Row>, DatabaseError> {
        let query = Self::bind(sql, params, kind);

        let client = self.client.start();
        let stream = query.query(client).await?;
        let rows = stream.into_first_result().await?;
        self.client.finish();

        Ok(rows.iter().map(row_from_tiberius).collect())
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
    ) -> Result<u64, DatabaseError> {
        let query = Self::bind(sql, params, kind);

        let client = self.client.start();
        let result = query.execute(client).await?;
        self.client.finish();

        Ok(result.total())
    }

    async fn begin(&mut self) -> Result<(), DatabaseError> {
        self.client.set_in_transaction(true);
        self.run_batch("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        self.run_batch("COMMIT TRANSACTION").await?;
        self.client.set_in_transaction(false);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.run_batch("ROLLBACK TRANSACTION").await?;
        self.client.set_in_transaction(false);
        Ok(())
    }
}

/// MS-SQL driver implementation
pub struct MssqlDriver {
    pool: MssqlPool,
}

impl MssqlDriver {
    /// Create a driver from an ADO.NET style connection string.
    ///
    /// No connection is opened here; the pool connects on first checkout.
    pub fn new(connection_string: &str, max_pool_size: u32) -> Result<Self, DatabaseError> {
        let config = Config::from_ado_string(connection_string).map_err(|e| {
            DatabaseError::Configuration(format!("Invalid SQL Server connection string: {}", e))
        })?;

        let manager = ConnectionManager::build(config)
            .map_err(|e| DatabaseError::Configuration(e.to_string()))?;

        let pool = TrackedPool::new(manager, max_pool_size)?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        let client = self.pool.get().await?;
        Ok(Box::new(MssqlConnection { client }))
    }
}

fn build_query(bound: BoundStatement<'_>) -> Query<'static> {
    let mut query = Query::new(bound.sql);
    for value in bound.values {
        match value {
            CellValue::Null => query.bind(Option::<String>::None),
            CellValue::Bool(b) => query.bind(*b),
            CellValue::Int(i) => query.bind(*i),
            CellValue::Float(f) => query.bind(*f),
            // SQL Server converts ISO 8601 text to date/time columns implicitly
            CellValue::String(s) | CellValue::DateTime(s) => query.bind(s.clone()),
            CellValue::Binary(b) => query.bind(b.clone()),
        }
    }
    query
}

fn row_from_tiberius(row: &tiberius::Row) -> Row {
    let columns = row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| cell_value_from_row(row, idx, col.column_type()))
        .collect();
    Row::new(columns, values)
}

/// Extract cell value from row
fn cell_value_from_row(row: &tiberius::Row, idx: usize, col_type: ColumnType) -> CellValue {
    match col_type {
        ColumnType::Null => CellValue::Null,

        // Integer types
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        ColumnType::Intn => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .unwrap_or(CellValue::Null),

        // Float types
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or(CellValue::Null),
        ColumnType::Float8 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(|v| CellValue::Float(v as f64)))
            .unwrap_or(CellValue::Null),

        // Decimal/Numeric types
        ColumnType::Decimaln | ColumnType::Numericn => row
            .try_get::<tiberius::numeric::Numeric, _>(idx)
            .ok()
            .flatten()
            .map(|n| CellValue::Float(f64::from(n)))
            .unwrap_or(CellValue::Null),

        // Money types
        ColumnType::Money | ColumnType::Money4 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),

        // Boolean
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),

        // String types
        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| CellValue::String(s.to_string()))
            .unwrap_or(CellValue::Null),

        // Date/Time types
        ColumnType::Datetime
        | ColumnType::Datetime2
        | ColumnType::Datetimen
        | ColumnType::Datetime4 => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.format(DATETIME_FORMAT).to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::DatetimeOffsetn => row
            .try_get::<DateTime<Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.to_rfc3339()))
            .unwrap_or(CellValue::Null),
        ColumnType::Daten => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| CellValue::DateTime(d.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Timen => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| CellValue::DateTime(t.to_string()))
            .unwrap_or(CellValue::Null),

        // Binary types
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|b| CellValue::Binary(b.to_vec()))
            .unwrap_or(CellValue::Null),

        // GUID
        ColumnType::Guid => row
            .try_get::<tiberius::Uuid, _>(idx)
            .ok()
            .flatten()
            .map(|u| CellValue::String(u.to_string()))
            .unwrap_or(CellValue::Null),

        // XML
        ColumnType::Xml => row
            .try_get::<&tiberius::xml::XmlData, _>(idx)
            .ok()
            .flatten()
            .map(|xml| CellValue::String(xml.to_owned().into_string()))
            .unwrap_or(CellValue::Null),

        // Default: try as string
        _ => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| CellValue::String(s.to_string()))
            .unwrap_or(CellValue::Null),
    }
}
