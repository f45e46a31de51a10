//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. `dapper.toml` in the working directory
//! 2. An explicit config file passed on the command line
//! 3. Environment variables: `DAPPER_*`, with `__` separating nested keys
//!
//! ```toml
//! database_used = "SQL"
//! command_timeout_secs = 30
//!
//! [connection_strings]
//! sql_server = "Server=tcp:localhost,1433;Database=app;User Id=sa;Password=..."
//! postgres = "host=localhost user=postgres dbname=app"
//!
//! [server]
//! bind = "0.0.0.0"
//! port = 8080
//! ```

use std::ops::Deref;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::db::{DatabaseError, DatabaseType};

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "dapper.toml";

/// ADO.NET's default command timeout.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Boxed wrapper for figment::Error to reduce Result size on the stack.
#[derive(Debug)]
pub struct ConfigError(Box<figment::Error>);

impl Deref for ConfigError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Backend selection and everything needed to reach it.
///
/// The PascalCase key names (`DatabaseUsed`, `ConnectionStrings.SqlServer`, ...)
/// are accepted too, along with their lowercased forms, which is what figment
/// makes of environment variables such as `DAPPER_DATABASEUSED`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Backend selector: `"SQL"` or `"POSTGRES"`. Anything else is rejected
    /// when the connection factory is built.
    #[serde(alias = "DatabaseUsed", alias = "databaseused")]
    pub database_used: String,
    #[serde(alias = "ConnectionStrings", alias = "connectionstrings")]
    pub connection_strings: ConnectionStrings,
    /// Per-command timeout in seconds; `0` disables it.
    pub command_timeout_secs: u64,
    /// Upper bound on pooled connections; must be at least 1.
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            database_used: String::new(),
            connection_strings: ConnectionStrings::default(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Named connection strings, one per backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionStrings {
    /// ADO.NET style, e.g. `Server=tcp:host,1433;Database=app;User Id=sa;Password=...`
    #[serde(alias = "SqlServer", alias = "sqlserver")]
    pub sql_server: Option<String>,
    /// libpq key/value or `postgresql://` URL
    #[serde(alias = "Postgres")]
    pub postgres: Option<String>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `bind:port`, ready for a TCP listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl DatabaseSettings {
    /// Settings for the given selector, with every other field at its default.
    pub fn new(database_used: impl Into<String>) -> Self {
        Self {
            database_used: database_used.into(),
            ..Self::default()
        }
    }

    /// Parsed backend selector.
    pub fn database_type(&self) -> Result<DatabaseType, DatabaseError> {
        self.database_used.parse()
    }

    /// Connection string configured for `database_type`.
    pub fn connection_string(&self, database_type: DatabaseType) -> Result<&str, DatabaseError> {
        let (key, value) = match database_type {
            DatabaseType::Mssql => ("sql_server", &self.connection_strings.sql_server),
            DatabaseType::Postgresql => ("postgres", &self.connection_strings.postgres),
        };

        value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                DatabaseError::Configuration(format!(
                    "connection_strings.{} is required when database_used = \"{}\"",
                    key,
                    database_type.config_value()
                ))
            })
    }

    /// `None` when timeouts are disabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

impl AppConfig {
    /// Load config with layered resolution (default file → explicit file → env).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file(DEFAULT_CONFIG_FILE));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        Self::from_figment(figment.merge(Env::prefixed("DAPPER_").split("__")))
    }

    /// Extract from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(ConfigError::from)
    }
}
