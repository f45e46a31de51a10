// Query Execution Engine
// Runs commands against the configured backend and maps the rows onto caller types

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::db::mapping::{from_row, from_rows};
use crate::db::params::Params;
use crate::db::traits::{
    CellValue, CommandKind, Connection, DatabaseDriver, DatabaseError, DatabaseType, Row,
};

/// Command timeout used when none is configured
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for long-running reports (10 hours)
pub const EXTENDED_TIMEOUT: Duration = Duration::from_secs(36_000);

/// A command plus its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Params,
    pub kind: CommandKind,
}

impl QueryRequest {
    /// Plain SQL text
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
            kind: CommandKind::Text,
        }
    }

    /// Stored procedure (or, on PostgreSQL, a function/procedure) called by name
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            sql: name.into(),
            params: Params::new(),
            kind: CommandKind::StoredProcedure,
        }
    }

    pub fn param(mut self, name: impl AsRef<str>, value: impl Into<CellValue>) -> Self {
        self.params.add(name, value);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

impl From<&str> for QueryRequest {
    fn from(sql: &str) -> Self {
        Self::text(sql)
    }
}

impl From<String> for QueryRequest {
    fn from(sql: String) -> Self {
        Self::text(sql)
    }
}

/// Async query executor.
///
/// Every call checks out its own connection and returns it to the pool when the
/// call ends. Only [`QueryEngine::insert`] and [`QueryEngine::update`] open an
/// explicit transaction; everything else runs under driver autocommit.
pub struct QueryEngine {
    driver: Arc<dyn DatabaseDriver>,
    command_timeout: Option<Duration>,
}

impl QueryEngine {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        }
    }

    /// Override the per-command timeout; `None` waits indefinitely
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn database_type(&self) -> DatabaseType {
        self.driver.database_type()
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Raw connection for callers that need driver-level access
    pub async fn connection(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        self.driver.connect().await
    }

    /// All rows, in order; empty when nothing matches
    pub async fn query_many<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Vec<T>, DatabaseError> {
        let rows = self.fetch(&request.into(), self.command_timeout).await?;
        from_rows(&rows)
    }

    /// First row, or `None` when there are no rows
    pub async fn query_first_or_default<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        let rows = self.fetch(&request.into(), self.command_timeout).await?;
        first(&rows)
    }

    /// The only row, or `None` when there are no rows. More than one row is an error.
    pub async fn query_single_or_default<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        let rows = self.fetch(&request.into(), self.command_timeout).await?;
        match rows.len() {
            0 | 1 => first(&rows),
            n => Err(DatabaseError::MultipleRows(n)),
        }
    }

    /// [`QueryEngine::query_many`] with [`EXTENDED_TIMEOUT`]
    pub async fn query_many_with_extended_timeout<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Vec<T>, DatabaseError> {
        let rows = self.fetch(&request.into(), Some(EXTENDED_TIMEOUT)).await?;
        from_rows(&rows)
    }

    /// [`QueryEngine::query_first_or_default`] with [`EXTENDED_TIMEOUT`]
    pub async fn query_first_with_extended_timeout<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        let rows = self.fetch(&request.into(), Some(EXTENDED_TIMEOUT)).await?;
        first(&rows)
    }

    /// Run a command that returns no rows; yields the affected-row count
    pub async fn execute(&self, request: impl Into<QueryRequest>) -> Result<u64, DatabaseError> {
        let request = request.into();
        tracing::debug!(sql = %request.sql, kind = ?request.kind, "Executing command");

        let mut conn = self.driver.connect().await?;
        with_timeout(
            self.command_timeout,
            conn.execute(&request.sql, &request.params, request.kind),
        )
        .await
    }

    /// Run an insert in its own transaction and map the first returned row
    pub async fn insert<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.in_transaction("insert", request.into()).await
    }

    /// Run an update in its own transaction and map the first returned row
    pub async fn update<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.in_transaction("update", request.into()).await
    }

    async fn fetch(
        &self,
        request: &QueryRequest,
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>, DatabaseError> {
        tracing::debug!(sql = %request.sql, kind = ?request.kind, "Executing query");

        let mut conn = self.driver.connect().await?;
        let rows = with_timeout(
            timeout,
            conn.query(&request.sql, &request.params, request.kind),
        )
        .await?;

        tracing::debug!(rows = rows.len(), "Query completed");
        Ok(rows)
    }

    /// BEGIN, run, COMMIT. A statement or mapping failure rolls back and returns
    /// the original error.
    ///
    /// A timeout does not roll back: the statement may still be running on the
    /// server, and a ROLLBACK on the same connection would queue behind it. The
    /// connection is dropped instead, which ends the server-side transaction.
    async fn in_transaction<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: QueryRequest,
    ) -> Result<Option<T>, DatabaseError> {
        tracing::debug!(operation, sql = %request.sql, kind = ?request.kind, "Executing in transaction");

        let mut conn = self.driver.connect().await?;
        conn.begin().await?;

        let result = with_timeout(
            self.command_timeout,
            conn.query(&request.sql, &request.params, request.kind),
        )
        .await
        .and_then(|rows| first(&rows));

        match result {
            Ok(value) => {
                conn.commit().await?;
                Ok(value)
            }
            Err(DatabaseError::Timeout(limit)) => {
                tracing::warn!(
                    operation,
                    timeout = ?limit,
                    "Command timed out inside a transaction; discarding connection"
                );
                Err(DatabaseError::Timeout(limit))
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback().await {
                    tracing::warn!(
                        operation,
                        error = %rollback_err,
                        "Rollback failed; connection will be discarded"
                    );
                }
                Err(e)
            }
        }
    }
}

fn first<T: DeserializeOwned>(rows: &[Row]) -> Result<Option<T>, DatabaseError> {
    rows.first().map(from_row).transpose()
}

async fn with_timeout<T, F>(timeout: Option<Duration>, operation: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| DatabaseError::Timeout(limit))?,
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{is_statement_failure, MockDriver};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        username: String,
    }

    fn user_row(name: &str) -> Row {
        Row::new(
            vec!["Username".to_string()],
            vec![CellValue::String(name.to_string())],
        )
    }

    fn engine_over(driver: MockDriver) -> (QueryEngine, Arc<MockDriver>) {
        let driver = Arc::new(driver);
        (QueryEngine::new(driver.clone()), driver)
    }

    #[tokio::test]
    async fn test_query_many_empty() {
        let (engine, _) = engine_over(MockDriver::new(DatabaseType::Mssql));
        let users: Vec<User> = engine.query_many("SELECT * FROM Users").await.unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_query_many_keeps_order() {
        let (engine, driver) = engine_over(
            MockDriver::new(DatabaseType::Mssql).with_rows(vec![user_row("a"), user_row("b")]),
        );

        let users: Vec<User> = engine.query_many("EXEC GetAllUsers").await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(driver.calls(), vec!["connect", "query EXEC GetAllUsers"]);
    }

    #[tokio::test]
    async fn test_first_or_default() {
        let (engine, _) = engine_over(MockDriver::new(DatabaseType::Postgresql));
        let none: Option<User> = engine.query_first_or_default("SELECT 1").await.unwrap();
        assert_eq!(none, None);

        let (engine, _) = engine_over(
            MockDriver::new(DatabaseType::Postgresql).with_rows(vec![user_row("a"), user_row("b")]),
        );
        let first: Option<User> = engine.query_first_or_default("SELECT 1").await.unwrap();
        assert_eq!(first.unwrap().username, "a");
    }

    #[tokio::test]
    async fn test_single_or_default() {
        let (engine, _) = engine_over(MockDriver::new(DatabaseType::Mssql).with_rows(vec![user_row("a")]));
        let single: Option<User> = engine.query_single_or_default("SELECT 1").await.unwrap();
        assert_eq!(single.unwrap().username, "a");

        let (engine, _) = engine_over(MockDriver::new(DatabaseType::Mssql));
        let none: Option<User> = engine.query_single_or_default("SELECT 1").await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_single_or_default_rejects_many_rows() {
        let (engine, _) = engine_over(
            MockDriver::new(DatabaseType::Mssql).with_rows(vec![user_row("a"), user_row("b")]),
        );
        let err = engine
            .query_single_or_default::<User>("SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::MultipleRows(2)));
    }

    #[tokio::test]
    async fn test_extended_timeout_queries() {
        let (engine, _) = engine_over(MockDriver::new(DatabaseType::Mssql).with_rows(vec![user_row("a")]));

        let all: Vec<User> = engine
            .query_many_with_extended_timeout(QueryRequest::procedure("MonthlyReport"))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let first: Option<User> = engine
            .query_first_with_extended_timeout(QueryRequest::procedure("MonthlyReport"))
            .await
            .unwrap();
        assert_eq!(first.unwrap().username, "a");
    }

    #[tokio::test]
    async fn test_execute_returns_affected_rows() {
        let (engine, driver) = engine_over(MockDriver::new(DatabaseType::Mssql).with_affected(3));
        let affected = engine
            .execute(QueryRequest::procedure("ArchiveUsers").param("days", 30))
            .await
            .unwrap();

        assert_eq!(affected, 3);
        assert_eq!(driver.calls(), vec!["connect", "execute proc ArchiveUsers"]);
    }

    #[tokio::test]
    async fn test_insert_commits_on_success() {
        let (engine, driver) = engine_over(MockDriver::new(DatabaseType::Mssql).with_rows(vec![user_row("new")]));

        let inserted: Option<User> = engine
            .insert(
                QueryRequest::text("INSERT INTO Users (Username) OUTPUT INSERTED.* VALUES (@name)")
                    .param("name", "new"),
            )
            .await
            .unwrap();

        assert_eq!(inserted.unwrap().username, "new");
        assert_eq!(
            driver.calls(),
            vec![
                "connect",
                "begin",
                "query INSERT INTO Users (Username) OUTPUT INSERTED.* VALUES (@name)",
                "commit",
            ]
        );
    }

    #[tokio::test]
    async fn test_update_rolls_back_on_failure() {
        let (engine, driver) = engine_over(MockDriver::new(DatabaseType::Postgresql).failing());

        let err = engine
            .update::<User>(QueryRequest::procedure("update_user").param("id", 1))
            .await
            .unwrap_err();

        assert!(is_statement_failure(&err), "unexpected error: {:?}", err);
        let calls = driver.calls();
        assert_eq!(calls, vec!["connect", "begin", "query proc update_user", "rollback"]);
        assert!(!calls.contains(&"commit".to_string()));
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_original_error() {
        let (engine, driver) =
            engine_over(MockDriver::new(DatabaseType::Mssql).failing().failing_rollback());

        let err = engine.insert::<User>("INSERT INTO Users DEFAULT VALUES").await.unwrap_err();

        assert!(is_statement_failure(&err), "unexpected error: {:?}", err);
        assert_eq!(driver.calls().last().map(String::as_str), Some("rollback"));
    }

    #[tokio::test]
    async fn test_mapping_failure_rolls_back() {
        let bad_row = Row::new(vec!["Username".to_string()], vec![CellValue::Int(1)]);
        let (engine, driver) = engine_over(MockDriver::new(DatabaseType::Mssql).with_rows(vec![bad_row]));

        let err = engine.insert::<User>("INSERT INTO Users DEFAULT VALUES").await.unwrap_err();

        assert!(matches!(err, DatabaseError::Mapping(_)));
        assert_eq!(driver.calls().last().map(String::as_str), Some("rollback"));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let driver = Arc::new(MockDriver::new(DatabaseType::Mssql).slow(Duration::from_secs(5)));
        let engine = QueryEngine::new(driver).with_command_timeout(Some(Duration::from_millis(20)));

        let err = engine.query_many::<User>("WAITFOR DELAY '00:00:05'").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_timeout_in_transaction_skips_rollback() {
        let driver = Arc::new(MockDriver::new(DatabaseType::Mssql).slow(Duration::from_secs(5)));
        let engine =
            QueryEngine::new(driver.clone()).with_command_timeout(Some(Duration::from_millis(20)));

        let started = std::time::Instant::now();
        let err = engine.update::<User>("UPDATE Users SET Phone = NULL").await.unwrap_err();

        assert!(matches!(err, DatabaseError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            driver.calls(),
            vec!["connect", "begin", "query UPDATE Users SET Phone = NULL"]
        );
    }

    #[test]
    fn test_request_builders() {
        let request = QueryRequest::procedure("InsertUser")
            .param("@Username", "alice")
            .param("Phone", None::<String>);

        assert_eq!(request.kind, CommandKind::StoredProcedure);
        assert_eq!(request.params.len(), 2);
        assert_eq!(
            request.params.get("username"),
            Some(&CellValue::String("alice".to_string()))
        );

        let text: QueryRequest = "SELECT 1".into();
        assert_eq!(text.kind, CommandKind::Text);
        assert!(text.params.is_empty());
    }
}
