// Connection Factory
// Picks the backend named in configuration and hands out connections for it

use std::sync::Arc;

use crate::config::DatabaseSettings;
use crate::db::drivers::{MssqlDriver, PostgresDriver};
use crate::db::traits::{Connection, DatabaseDriver, DatabaseError, DatabaseType};

/// The configured backend, resolved once at startup
pub struct ConnectionFactory {
    database_type: DatabaseType,
    connection_string: String,
    driver: Arc<dyn DatabaseDriver>,
}

impl ConnectionFactory {
    /// Resolve the backend selector and its connection string, and build the
    /// driver pool. No connection is opened here.
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, DatabaseError> {
        let database_type = settings.database_type()?;
        let connection_string = settings.connection_string(database_type)?.to_string();

        let driver: Arc<dyn DatabaseDriver> = match database_type {
            DatabaseType::Mssql => Arc::new(MssqlDriver::new(&connection_string, settings.pool_size)?),
            DatabaseType::Postgresql => {
                Arc::new(PostgresDriver::new(&connection_string, settings.pool_size)?)
            }
        };

        tracing::info!(
            backend = %database_type,
            pool_size = settings.pool_size,
            "Connection factory ready"
        );

        Ok(Self {
            database_type,
            connection_string,
            driver,
        })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Check out a connection from the backend pool
    pub async fn create_connection(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        self.driver.connect().await
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for ConnectionFactory {
    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    fn driver_name(&self) -> &'static str {
        self.driver.driver_name()
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        self.create_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionStrings;

    const SQL_SERVER: &str = "Server=tcp:127.0.0.1,1;Database=app;User Id=sa;Password=pw";
    const POSTGRES: &str = "host=127.0.0.1 port=1 user=postgres dbname=app";

    fn settings(database_used: &str) -> DatabaseSettings {
        DatabaseSettings {
            connection_strings: ConnectionStrings {
                sql_server: Some(SQL_SERVER.to_string()),
                postgres: Some(POSTGRES.to_string()),
            },
            ..DatabaseSettings::new(database_used)
        }
    }

    #[tokio::test]
    async fn test_sql_uses_sql_server_connection_string() {
        let factory = ConnectionFactory::from_settings(&settings("SQL")).unwrap();
        assert_eq!(factory.database_type(), DatabaseType::Mssql);
        assert_eq!(factory.connection_string(), SQL_SERVER);
        assert_eq!(factory.driver_name(), "Microsoft SQL Server");
    }

    #[tokio::test]
    async fn test_postgres_uses_postgres_connection_string() {
        let factory = ConnectionFactory::from_settings(&settings("POSTGRES")).unwrap();
        assert_eq!(factory.database_type(), DatabaseType::Postgresql);
        assert_eq!(factory.connection_string(), POSTGRES);
        assert_eq!(factory.driver_name(), "PostgreSQL");
    }

    #[tokio::test]
    async fn test_unknown_selector_is_unsupported() {
        for selector in ["MYSQL", "sql", "", "Postgres"] {
            let result = ConnectionFactory::from_settings(&settings(selector));
            assert!(
                matches!(result, Err(DatabaseError::UnsupportedBackend(ref name)) if name == selector),
                "selector {:?}",
                selector
            );
        }
    }

    #[tokio::test]
    async fn test_zero_pool_size_is_a_configuration_error() {
        for selector in ["SQL", "POSTGRES"] {
            let mut zero = settings(selector);
            zero.pool_size = 0;
            let result = ConnectionFactory::from_settings(&zero);
            assert!(
                matches!(result, Err(DatabaseError::Configuration(ref msg)) if msg.contains("pool_size")),
                "selector {:?}",
                selector
            );
        }
    }

    #[tokio::test]
    async fn test_missing_connection_string() {
        let result = ConnectionFactory::from_settings(&DatabaseSettings::new("POSTGRES"));
        assert!(matches!(result, Err(DatabaseError::Configuration(_))));

        let mut blank = settings("SQL");
        blank.connection_strings.sql_server = Some(String::new());
        let result = ConnectionFactory::from_settings(&blank);
        assert!(matches!(result, Err(DatabaseError::Configuration(_))));
    }
}
