//! Shared helpers for the HTTP integration tests.

use std::sync::{Arc, Mutex};

use dapper_api::db::{Connection, DatabaseDriver};
use dapper_api::{create_router, AppState, CellValue, CommandKind, DatabaseError, DatabaseType, Params, QueryEngine, Row};
use tokio::net::TcpListener;

/// Driver that answers every query with fixed rows and records the SQL it saw.
pub struct RecordingDriver {
    database_type: DatabaseType,
    rows: Vec<Row>,
    fail: bool,
    statements: Arc<Mutex<Vec<String>>>,
}

impl RecordingDriver {
    pub fn new(database_type: DatabaseType, rows: Vec<Row>) -> Self {
        Self {
            database_type,
            rows,
            fail: false,
            statements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(database_type: DatabaseType) -> Self {
        Self {
            fail: true,
            ..Self::new(database_type, Vec::new())
        }
    }

    pub fn statements(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.statements)
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for RecordingDriver {
    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        Ok(Box::new(RecordingConnection {
            database_type: self.database_type,
            rows: self.rows.clone(),
            fail: self.fail,
            statements: Arc::clone(&self.statements),
        }))
    }
}

struct RecordingConnection {
    database_type: DatabaseType,
    rows: Vec<Row>,
    fail: bool,
    statements: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Connection for RecordingConnection {
    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    async fn query(
        &mut self,
        sql: &str,
        _params: &Params,
        _kind: CommandKind,
    ) -> Result<Vec<Row>, DatabaseError> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.fail {
            return Err(DatabaseError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(self.rows.clone())
    }

    async fn execute(
        &mut self,
        sql: &str,
        _params: &Params,
        _kind: CommandKind,
    ) -> Result<u64, DatabaseError> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(0)
    }

    async fn begin(&mut self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// A `Username, Phone, Email` row.
pub fn user_row(username: &str, phone: Option<&str>, email: &str) -> Row {
    let text = |value: &str| CellValue::String(value.to_string());
    Row::new(
        vec![
            "Username".to_string(),
            "Phone".to_string(),
            "Email".to_string(),
        ],
        vec![
            text(username),
            phone.map(text).unwrap_or(CellValue::Null),
            text(email),
        ],
    )
}

/// State backed by `driver`.
pub fn state_for(driver: RecordingDriver) -> AppState {
    AppState::new(Arc::new(QueryEngine::new(Arc::new(driver))))
}

/// Start a server on a random port and return its base URL.
pub async fn start_test_server(state: AppState) -> String {
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    format!("http://{}", addr)
}
