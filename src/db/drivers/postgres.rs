// PostgreSQL Driver
// Implements DatabaseDriver for PostgreSQL using tokio-postgres behind a bb8 pool

use crate::db::params::{Params, DATETIME_FORMAT};
use crate::db::pool::{TrackedManager, TrackedPool};
use crate::db::statement::{bind_text, postgres_routine_call, BoundStatement, PlaceholderStyle};
use crate::db::traits::{
    CellValue, CommandKind, Connection, DatabaseDriver, DatabaseError, DatabaseType, Row,
};
use bb8::PooledConnection;
use bb8_postgres::PostgresConnectionManager;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::error::Error;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

/// Type alias for our connection pool
pub type PostgresPool = TrackedPool<PostgresConnectionManager<NoTls>>;

type PooledClient = PooledConnection<'static, TrackedManager<PostgresConnectionManager<NoTls>>>;

/// Cells are sent in the binary format of whatever type the server inferred for
/// the placeholder, so an integer can fill a `smallint` column and an ISO string
/// a `timestamp` column.
impl ToSql for CellValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            CellValue::Null => Ok(IsNull::Yes),
            CellValue::Bool(b) => b.to_sql_checked(ty, out),
            CellValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql_checked(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql_checked(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql_checked(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql_checked(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql_checked(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => i.to_string().to_sql_checked(ty, out),
                _ => i.to_sql_checked(ty, out),
            },
            CellValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql_checked(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => f.to_string().to_sql_checked(ty, out),
                _ => f.to_sql_checked(ty, out),
            },
            CellValue::String(s) => match *ty {
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql_checked(ty, out)
                }
                _ => s.as_str().to_sql_checked(ty, out),
            },
            CellValue::DateTime(s) => match *ty {
                Type::TIMESTAMP => s.parse::<NaiveDateTime>()?.to_sql_checked(ty, out),
                Type::TIMESTAMPTZ => s.parse::<DateTime<Utc>>()?.to_sql_checked(ty, out),
                Type::DATE => s.parse::<NaiveDate>()?.to_sql_checked(ty, out),
                Type::TIME => s.parse::<NaiveTime>()?.to_sql_checked(ty, out),
                _ => s.as_str().to_sql_checked(ty, out),
            },
            CellValue::Binary(b) => b.as_slice().to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// PostgreSQL connection checked out of the pool for one call
pub struct PostgresConnection {
    client: PooledClient,
}

impl PostgresConnection {
    async fn run_batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let client = self.client.start();
        client.batch_execute(sql).await?;
        self.client.finish();
        Ok(())
    }
}

fn bind<'p>(sql: &str, params: &'p Params, kind: CommandKind, returns_rows: bool) -> BoundStatement<'p> {
    match kind {
        CommandKind::Text => bind_text(sql, params, PlaceholderStyle::Dollar),
        CommandKind::StoredProcedure => postgres_routine_call(sql, params, returns_rows),
    }
}

fn as_sql_args<'a>(bound: &'a BoundStatement<'_>) -> Vec<&'a (dyn ToSql + Sync)> {
    bound
        .values
        .iter()
        .map(|value| *value as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
    ) -> Result<Vec<Row>, DatabaseError> {
        let bound = bind(sql, params, kind, true);
        let args = as_sql_args(&bound);

        let client = self.client.start();
        let rows = client.query(bound.sql.as_str(), &args).await?;
        self.client.finish();

        rows.iter().map(row_from_postgres).collect()
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
    ) -> Result<u64, DatabaseError> {
        let bound = bind(sql, params, kind, false);
        let args = as_sql_args(&bound);

        let client = self.client.start();
        let affected = client.execute(bound.sql.as_str(), &args).await?;
        self.client.finish();

        Ok(affected)
    }

    async fn begin(&mut self) -> Result<(), DatabaseError> {
        self.client.set_in_transaction(true);
        self.run_batch("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        self.run_batch("COMMIT").await?;
        self.client.set_in_transaction(false);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.run_batch("ROLLBACK").await?;
        self.client.set_in_transaction(false);
        Ok(())
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver {
    pool: PostgresPool,
}

impl PostgresDriver {
    /// Create a driver from a libpq style connection string (`host=... user=...`
    /// or a `postgresql://` URL). The pool connects on first checkout.
    pub fn new(connection_string: &str, max_pool_size: u32) -> Result<Self, DatabaseError> {
        let manager = PostgresConnectionManager::new_from_stringlike(connection_string, NoTls)
            .map_err(|e| {
                DatabaseError::Configuration(format!("Invalid PostgreSQL connection string: {}", e))
            })?;

        let pool = TrackedPool::new(manager, max_pool_size)?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        let client = self.pool.get().await?;
        Ok(Box::new(PostgresConnection { client }))
    }
}

fn row_from_postgres(row: &tokio_postgres::Row) -> Result<Row, DatabaseError> {
    let columns = row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| cell_value_from_row(row, idx, col.type_()))
        .collect::<Result<_, _>>()?;
    Ok(Row::new(columns, values))
}

/// Extract cell value from row. A non-null value the driver cannot decode is an
/// error rather than a silent `Null`.
fn cell_value_from_row(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Result<CellValue, DatabaseError> {
    let value = match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),

        // Integer types
        Type::CHAR => row
            .try_get::<_, Option<i8>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),

        // Float types
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or(CellValue::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),

        // Date/Time types
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.format(DATETIME_FORMAT).to_string()))
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.to_rfc3339()))
            .unwrap_or(CellValue::Null),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(|d| CellValue::DateTime(d.to_string()))
            .unwrap_or(CellValue::Null),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(|t| CellValue::DateTime(t.to_string()))
            .unwrap_or(CellValue::Null),

        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Binary)
            .unwrap_or(CellValue::Null),

        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),

        Type::NUMERIC => row
            .try_get::<_, Option<Numeric>>(idx)
            .ok()
            .flatten()
            .map(|n| CellValue::Float(n.0))
            .unwrap_or(CellValue::Null),

        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .ok()
            .flatten()
            .map(|u| CellValue::String(u.to_string()))
            .unwrap_or(CellValue::Null),

        // Text types and anything else with a text-compatible decoding
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(text) => text.map(CellValue::String).unwrap_or(CellValue::Null),
            Err(_) if row.try_get::<_, Option<Undecoded>>(idx)?.is_none() => CellValue::Null,
            Err(e) => return Err(e.into()),
        },
    };
    Ok(value)
}

/// `numeric` read as a float, the same way SQL Server decimals are
#[derive(Debug)]
struct Numeric(f64);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        // ndigits, weight, sign, dscale, then ndigits base-10000 digits
        let word = |i: usize| -> Result<u16, Box<dyn Error + Sync + Send>> {
            raw.get(i * 2..i * 2 + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| "truncated numeric value".into())
        };

        let ndigits = word(0)? as usize;
        let weight = word(1)? as i16 as i32;
        let value = match word(2)? {
            0xC000 => f64::NAN,
            0xD000 => f64::INFINITY,
            0xF000 => f64::NEG_INFINITY,
            sign => {
                let mut value = 0.0;
                for i in 0..ndigits {
                    value += word(4 + i)? as f64 * 10_000f64.powi(weight - i as i32);
                }
                if sign == 0x4000 {
                    -value
                } else {
                    value
                }
            }
        };
        Ok(Numeric(value))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Any value, left undecoded; only tells NULL apart from a value
struct Undecoded;

impl<'a> FromSql<'a> for Undecoded {
    fn from_sql(_ty: &Type, _raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Undecoded)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}
