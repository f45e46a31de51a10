// Connection Pool Tracking
// Wraps a bb8 connection manager so that interrupted connections are never handed out again

use bb8::{ErrorSink, ManageConnection, Pool, PooledConnection, RunError, State};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::db::traits::DatabaseError;

/// A pooled connection plus the state the pool needs to decide whether it can be reused
pub struct Tracked<C> {
    conn: C,
    /// An operation started and has not finished (cancelled future, timeout, driver error)
    busy: bool,
    /// BEGIN was issued and neither COMMIT nor ROLLBACK completed
    in_transaction: bool,
}

impl<C> Tracked<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            busy: false,
            in_transaction: false,
        }
    }

    /// Mark the start of an operation; call [`Tracked::finish`] once it completes
    pub fn start(&mut self) -> &mut C {
        self.busy = true;
        &mut self.conn
    }

    pub fn finish(&mut self) {
        self.busy = false;
    }

    pub fn set_in_transaction(&mut self, in_transaction: bool) {
        self.in_transaction = in_transaction;
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether the pool must drop this connection instead of reusing it
    pub fn is_tainted(&self) -> bool {
        self.busy || self.in_transaction
    }
}

impl<C> Deref for Tracked<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for Tracked<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// bb8 manager that delegates to a driver manager and discards tainted connections
pub struct TrackedManager<M> {
    inner: M,
}

impl<M> TrackedManager<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<M: ManageConnection> ManageConnection for TrackedManager<M> {
    type Connection = Tracked<M::Connection>;
    type Error = M::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.inner.connect().await.map(Tracked::new)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        self.inner.is_valid(&mut conn.conn).await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_tainted() || self.inner.has_broken(&mut conn.conn)
    }
}

/// Connection failures reported by bb8, held until a waiting checkout claims one.
///
/// bb8 opens connections on a background task and only forwards their errors to
/// its error sink; without this a refused connection surfaces as a checkout timeout.
struct ConnectFailures<E> {
    last: Mutex<Option<E>>,
    notify: Notify,
}

impl<E> ConnectFailures<E> {
    fn new() -> Self {
        Self {
            last: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<E>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, err: E) {
        *self.slot() = Some(err);
        self.notify.notify_waiters();
    }

    fn take(&self) -> Option<E> {
        self.slot().take()
    }

    async fn next(&self) -> E {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(err) = self.take() {
                return err;
            }
            notified.await;
        }
    }
}

struct FailureSink<E>(Arc<ConnectFailures<E>>);

impl<E> fmt::Debug for FailureSink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureSink")
    }
}

impl<E: Send + 'static> ErrorSink<E> for FailureSink<E> {
    fn sink(&self, error: E) {
        self.0.push(error);
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<E>> {
        Box::new(FailureSink(Arc::clone(&self.0)))
    }
}

/// bb8 pool over a [`TrackedManager`].
///
/// Connection attempts are not retried: a checkout that triggers a failed
/// connect returns the driver's error instead of waiting out the pool timeout.
pub struct TrackedPool<M: ManageConnection> {
    pool: Pool<TrackedManager<M>>,
    failures: Arc<ConnectFailures<M::Error>>,
}

impl<M: ManageConnection> TrackedPool<M> {
    /// Build the pool without opening any connection
    pub fn new(manager: M, max_size: u32) -> Result<Self, DatabaseError> {
        if max_size == 0 {
            return Err(DatabaseError::Configuration(
                "pool_size must be greater than zero".to_string(),
            ));
        }

        let failures = Arc::new(ConnectFailures::new());
        let pool = Pool::builder()
            .max_size(max_size)
            .retry_connection(false)
            .error_sink(Box::new(FailureSink(Arc::clone(&failures))))
            .build_unchecked(TrackedManager::new(manager));

        Ok(Self { pool, failures })
    }

    pub fn state(&self) -> State {
        self.pool.state()
    }

    /// Check out a connection, opening one if none is idle
    pub async fn get(
        &self,
    ) -> Result<PooledConnection<'static, TrackedManager<M>>, RunError<M::Error>> {
        // A failure nobody was waiting for belongs to an earlier checkout
        self.failures.take();

        tokio::select! {
            conn = self.pool.get_owned() => conn,
            err = self.failures.next() => Err(RunError::User(err)),
        }
    }
}
