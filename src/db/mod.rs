// Database Module
// Backend selection, connection pooling, query execution and row mapping

pub mod blocking;
pub mod drivers;
pub mod factory;
pub mod mapping;
pub mod params;
pub mod pool;
pub mod query;
pub mod statement;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use drivers::{MssqlDriver, PostgresDriver};
pub use factory::ConnectionFactory;
pub use mapping::{from_row, from_rows};
pub use params::Params;
pub use query::{QueryEngine, QueryRequest, DEFAULT_COMMAND_TIMEOUT, EXTENDED_TIMEOUT};
pub use traits::{
    CellValue, CommandKind, Connection, DatabaseDriver, DatabaseError, DatabaseType, Row,
};
