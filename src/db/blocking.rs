// Blocking Query Engine
// Synchronous wrapper that drives the async engine on its own runtime

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::{Builder, Runtime};

use crate::config::DatabaseSettings;
use crate::db::factory::ConnectionFactory;
use crate::db::query::{QueryEngine as AsyncQueryEngine, QueryRequest};
use crate::db::traits::{Connection, DatabaseDriver, DatabaseError, DatabaseType};

/// Synchronous counterpart of [`crate::db::QueryEngine`].
///
/// Owns a current-thread tokio runtime. Calling any method from inside an async
/// context panics, as with any nested `block_on`.
pub struct QueryEngine {
    inner: AsyncQueryEngine,
    runtime: Runtime,
}

impl QueryEngine {
    /// Build the connection factory and engine from settings
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self, DatabaseError> {
        let runtime = new_runtime()?;

        // Pool construction spawns its maintenance tasks on the current runtime
        let factory = {
            let _guard = runtime.enter();
            ConnectionFactory::from_settings(settings)?
        };
        let inner = AsyncQueryEngine::new(Arc::new(factory))
            .with_command_timeout(settings.command_timeout());

        Ok(Self { inner, runtime })
    }

    /// Wrap an engine built over any driver
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Result<Self, DatabaseError> {
        Ok(Self {
            inner: AsyncQueryEngine::new(driver),
            runtime: new_runtime()?,
        })
    }

    /// Replace the wrapped engine, keeping the runtime
    pub fn with_engine(mut self, inner: AsyncQueryEngine) -> Self {
        self.inner = inner;
        self
    }

    pub fn database_type(&self) -> DatabaseType {
        self.inner.database_type()
    }

    /// Raw connection for callers that need driver-level access.
    ///
    /// [`Connection`] is async; drive its calls with [`QueryEngine::block_on`].
    /// Drop the connection before dropping the engine.
    pub fn connection(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        self.runtime.block_on(self.inner.connection())
    }

    /// Run a future on the engine's runtime, e.g. a call on [`QueryEngine::connection`]
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn query_many<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Vec<T>, DatabaseError> {
        self.runtime.block_on(self.inner.query_many(request))
    }

    pub fn query_first_or_default<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.runtime.block_on(self.inner.query_first_or_default(request))
    }

    pub fn query_single_or_default<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.runtime.block_on(self.inner.query_single_or_default(request))
    }

    pub fn query_many_with_extended_timeout<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Vec<T>, DatabaseError> {
        self.runtime
            .block_on(self.inner.query_many_with_extended_timeout(request))
    }

    pub fn query_first_with_extended_timeout<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.runtime
            .block_on(self.inner.query_first_with_extended_timeout(request))
    }

    pub fn execute(&self, request: impl Into<QueryRequest>) -> Result<u64, DatabaseError> {
        self.runtime.block_on(self.inner.execute(request))
    }

    pub fn insert<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.runtime.block_on(self.inner.insert(request))
    }

    pub fn update<T: DeserializeOwned>(
        &self,
        request: impl Into<QueryRequest>,
    ) -> Result<Option<T>, DatabaseError> {
        self.runtime.block_on(self.inner.update(request))
    }
}

fn new_runtime() -> Result<Runtime, DatabaseError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(DatabaseError::Runtime)
}
