//! Web server module.
//!
//! Exposes the user listing endpoint over whichever backend is configured.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::config::DatabaseSettings;
use crate::db::{ConnectionFactory, DatabaseError, DatabaseType, QueryEngine};

/// Row shape returned by the `GetAllUsers` routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub username: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Ready(Arc<QueryEngine>),
    /// Selector named a backend we cannot serve; every request fails
    Unsupported(String),
}

impl AppState {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self {
            backend: Backend::Ready(engine),
        }
    }

    pub fn unsupported(database_used: impl Into<String>) -> Self {
        Self {
            backend: Backend::Unsupported(database_used.into()),
        }
    }

    /// Resolve the configured backend.
    ///
    /// An unrecognized selector still yields a state (requests then answer 500),
    /// while a recognized backend with a missing or malformed connection string
    /// is a startup error.
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, DatabaseError> {
        match ConnectionFactory::from_settings(settings) {
            Ok(factory) => {
                let engine = QueryEngine::new(Arc::new(factory))
                    .with_command_timeout(settings.command_timeout());
                Ok(Self::new(Arc::new(engine)))
            }
            Err(DatabaseError::UnsupportedBackend(name)) => {
                tracing::error!(database_used = %name, "Unsupported database type; requests will fail");
                Ok(Self::unsupported(name))
            }
            Err(e) => Err(e),
        }
    }

    fn engine(&self) -> Result<&QueryEngine, DatabaseError> {
        match &self.backend {
            Backend::Ready(engine) => Ok(engine),
            Backend::Unsupported(name) => Err(DatabaseError::UnsupportedBackend(name.clone())),
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

/// Any failure is logged and surfaced as a bare 500.
pub struct ApiError(DatabaseError);

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// Statement listing all users on `database_type`.
pub fn get_all_users_sql(database_type: DatabaseType) -> &'static str {
    match database_type {
        DatabaseType::Mssql => "EXEC GetAllUsers",
        DatabaseType::Postgresql => "SELECT * FROM GetAllUsers()",
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/GetAllUsers", get(get_all_users_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// All users, as a JSON array.
async fn get_all_users_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, ApiError> {
    let engine = state.engine()?;
    let sql = get_all_users_sql(engine.database_type());

    let users = engine.query_many::<User>(sql).await?;
    tracing::debug!(count = users.len(), "Fetched users");

    Ok(Json(users))
}
