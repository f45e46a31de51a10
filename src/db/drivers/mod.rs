// Database Drivers
// One implementation per supported backend

pub mod mssql;
pub mod postgres;

// Re-export drivers
pub use mssql::MssqlDriver;
pub use postgres::PostgresDriver;
