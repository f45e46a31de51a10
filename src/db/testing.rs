// Test Doubles
// Scripted driver and connection that record every call

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::params::Params;
use crate::db::traits::{CommandKind, Connection, DatabaseDriver, DatabaseError, DatabaseType, Row};

/// Message of the driver error a statement scripted to fail returns
pub const STATEMENT_FAILURE: &str = "mock statement failed";

/// The driver error a failing statement returns
pub fn statement_failure() -> DatabaseError {
    DatabaseError::Mssql(tiberius::error::Error::Protocol(STATEMENT_FAILURE.into()))
}

pub fn is_statement_failure(err: &DatabaseError) -> bool {
    matches!(err, DatabaseError::Mssql(e) if e.to_string().contains(STATEMENT_FAILURE))
}

#[derive(Default)]
struct Script {
    rows: Vec<Row>,
    affected: u64,
    fail_statement: bool,
    fail_rollback: bool,
    delay: Option<Duration>,
}

pub struct MockDriver {
    database_type: DatabaseType,
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDriver {
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            database_type,
            script: Arc::new(Script::default()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("script is only edited before use")
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.script_mut().rows = rows;
        self
    }

    pub fn with_affected(mut self, affected: u64) -> Self {
        self.script_mut().affected = affected;
        self
    }

    pub fn failing(mut self) -> Self {
        self.script_mut().fail_statement = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.script_mut().fail_rollback = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.script_mut().delay = Some(delay);
        self
    }

    /// Calls seen so far, e.g. `["connect", "begin", "query INSERT ...", "commit"]`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MockDriver {
    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        self.calls.lock().unwrap().push("connect".to_string());
        Ok(Box::new(MockConnection {
            database_type: self.database_type,
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
        }))
    }
}

pub struct MockConnection {
    database_type: DatabaseType,
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockConnection {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn run(&self, verb: &str, sql: &str, kind: CommandKind) -> Result<(), DatabaseError> {
        let call = match kind {
            CommandKind::Text => format!("{} {}", verb, sql),
            CommandKind::StoredProcedure => format!("{} proc {}", verb, sql),
        };
        self.record(call);

        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_statement {
            return Err(statement_failure());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    async fn query(
        &mut self,
        sql: &str,
        _params: &Params,
        kind: CommandKind,
    ) -> Result<Vec<Row>, DatabaseError> {
        self.run("query", sql, kind).await?;
        Ok(self.script.rows.clone())
    }

    async fn execute(
        &mut self,
        sql: &str,
        _params: &Params,
        kind: CommandKind,
    ) -> Result<u64, DatabaseError> {
        self.run("execute", sql, kind).await?;
        Ok(self.script.affected)
    }

    async fn begin(&mut self) -> Result<(), DatabaseError> {
        self.record("begin".to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        self.record("commit".to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.record("rollback".to_string());
        if self.script.fail_rollback {
            return Err(DatabaseError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "mock rollback failed",
            )));
        }
        Ok(())
    }
}
