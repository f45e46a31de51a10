//! Dapper API
//!
//! A small data-access layer over SQL Server or PostgreSQL, chosen by
//! configuration, plus the HTTP service built on it.

pub mod config;
pub mod db;
pub mod server;

pub use config::{AppConfig, ConfigError, DatabaseSettings};
pub use db::{
    blocking, CellValue, CommandKind, ConnectionFactory, DatabaseError, DatabaseType, Params,
    QueryEngine, QueryRequest, Row,
};
pub use server::{create_router, AppState, User};
