//! The database client.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::backend::{Backend, BackendKind};
use crate::config::ConfigError;
use crate::database::driver::Pool;
use crate::database::params::{Params, Statement};
use crate::database::row::Row;
use crate::database::session::{QueryLog, Session};
use crate::error::DatabaseError;
use crate::retry::RetryPolicy;

/// Default maximum connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default time to wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Retry policy for `execute` and `execute_many`.
    pub retry: RetryPolicy,
    /// Log SQL text before execution (default: true).
    pub log_queries: bool,
    /// Also log parameter values (default: false).
    pub log_params: bool,
    /// Maximum pooled connections (default: 5).
    pub max_connections: u32,
    /// Maximum wait for a pooled connection (default: 30s).
    pub acquire_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            log_queries: true,
            log_params: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl ClientOptions {
    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable query logging.
    pub fn with_log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    /// Enable or disable parameter logging.
    pub fn with_log_params(mut self, enabled: bool) -> Self {
        self.log_params = enabled;
        self
    }

    /// Set the pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the pool acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Validate the settings.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for an empty pool, a zero
    /// acquire timeout or an invalid retry policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be positive".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "acquire_timeout must be positive".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Result of [`AsyncDatabase::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Fetched rows, in result order.
    Rows(Vec<Row>),
    /// Number of rows affected by a committed statement.
    RowsAffected(u64),
}

impl QueryOutput {
    /// Fetched rows; empty for a row count.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::RowsAffected(_) => Vec::new(),
        }
    }

    /// Affected row count, if this is one.
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::Rows(_) => None,
            Self::RowsAffected(n) => Some(*n),
        }
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, idle or in use.
    pub size: u32,
    /// Idle connections.
    pub idle: usize,
}

/// Async database client.
///
/// Owns one connection pool for its lifetime. `execute` and `execute_many`
/// run in their own session under the retry policy; `transaction` hands a
/// session to the caller and is never retried. All failures are
/// [`DatabaseError`]s classified by the backend.
///
/// Using the client after [`close`](Self::close) is a contract violation;
/// operations then fail with a generic error.
pub struct AsyncDatabase {
    backend: Box<dyn Backend>,
    pool: Pool,
    retry: RetryPolicy,
    log: QueryLog,
}

impl fmt::Debug for AsyncDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDatabase")
            .field("backend", &self.backend)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AsyncDatabase {
    /// Create a client for `backend`.
    ///
    /// No connection is made here; the pool connects on first use. Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `ConfigError` if the options are invalid or the backend's
    /// connection descriptor cannot be parsed.
    pub fn new(backend: impl Backend, options: ClientOptions) -> Result<Self, ConfigError> {
        Self::from_boxed(Box::new(backend), options)
    }

    /// Create a client for an already boxed backend.
    pub fn from_boxed(backend: Box<dyn Backend>, options: ClientOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let pool = Pool::open(backend.as_ref(), &options)?;

        tracing::info!(
            "Created {} client (max_retries={}, log_queries={}, log_params={})",
            backend.kind(),
            options.retry.max_retries(),
            options.log_queries,
            options.log_params
        );

        Ok(Self {
            backend,
            pool,
            retry: options.retry,
            log: QueryLog {
                queries: options.log_queries,
                params: options.log_params,
            },
        })
    }

    /// Engine behind this client.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Retry policy applied to `execute` and `execute_many`.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn session(&self) -> Result<Session<'_>, DatabaseError> {
        let conn = self
            .pool
            .begin()
            .await
            .map_err(|e| self.backend.classify(e))?;
        Ok(Session::new(conn, self.backend.as_ref(), self.log))
    }

    /// Execute a statement in its own session.
    ///
    /// With `fetch` the result rows are returned, otherwise the affected row
    /// count. Retried according to the client's [`RetryPolicy`].
    ///
    /// The session is committed on success in both modes, so a fetch through
    /// `INSERT ... RETURNING` or a data-modifying CTE persists its writes.
    /// Read-only callers are unaffected: committing a read changes nothing.
    /// Any failure rolls the session back.
    pub async fn execute(
        &self,
        query: &str,
        params: impl Into<Params>,
        fetch: bool,
    ) -> Result<QueryOutput, DatabaseError> {
        let statement = Statement::prepare(query, params.into(), self.backend.placeholder())?;
        let statement = &statement;

        self.retry
            .run("execute", move || async move {
                let mut session = self.session().await?;
                let outcome = if fetch {
                    session.fetch_statement(statement).await.map(QueryOutput::Rows)
                } else {
                    session
                        .execute_statement(statement)
                        .await
                        .map(QueryOutput::RowsAffected)
                };
                session.finish(outcome).await
            })
            .await
    }

    /// Execute one statement per parameter set, in one session and one commit.
    ///
    /// Any failure rolls back the whole batch; retries repeat the whole batch.
    /// Returns the total affected row count. An empty batch does nothing.
    pub async fn execute_many<P, I>(&self, query: &str, params_list: I) -> Result<u64, DatabaseError>
    where
        P: Into<Params>,
        I: IntoIterator<Item = P>,
    {
        let placeholder = self.backend.placeholder();
        let statements = params_list
            .into_iter()
            .map(|params| Statement::prepare(query, params.into(), placeholder))
            .collect::<Result<Vec<_>, _>>()?;
        if statements.is_empty() {
            return Ok(0);
        }
        let statements = statements.as_slice();

        self.retry
            .run("execute_many", move || async move {
                let mut session = self.session().await?;
                let outcome = session.execute_batch(statements).await;
                session.finish(outcome).await
            })
            .await
    }

    /// Fetch all rows of a query.
    pub async fn fetch_all(
        &self,
        query: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<Row>, DatabaseError> {
        Ok(self.execute(query, params, true).await?.into_rows())
    }

    /// Fetch the first row of a query; `None` when there are no rows.
    pub async fn fetch_one(
        &self,
        query: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Row>, DatabaseError> {
        Ok(self.fetch_all(query, params).await?.into_iter().next())
    }

    /// Run `scope` inside a transaction.
    ///
    /// Commits when `scope` returns `Ok`; rolls back and returns the error
    /// unchanged when it returns `Err`. Not retried. Calling `execute` or
    /// `execute_many` from inside the scope uses a separate session and is
    /// not part of the transaction.
    ///
    /// ```rust,ignore
    /// db.transaction(|session| {
    ///     Box::pin(async move {
    ///         session.execute("UPDATE accounts SET balance = balance - 10 WHERE id = :id", json!({"id": 1})).await?;
    ///         session.execute("UPDATE accounts SET balance = balance + 10 WHERE id = :id", json!({"id": 2})).await?;
    ///         Ok::<_, DatabaseError>(())
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn transaction<T, E, F>(&self, scope: F) -> Result<T, E>
    where
        for<'c> F: FnOnce(&'c mut Session<'_>) -> BoxFuture<'c, Result<T, E>>,
        E: From<DatabaseError> + fmt::Display,
    {
        let mut session = self.session().await?;

        match scope(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::error!("Transaction rolled back: {}", err);
                if let Err(rollback_err) = session.rollback().await {
                    tracing::error!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Check connectivity with a trivial query (`SELECT 1`, or
    /// `SELECT 1 FROM DUAL` on Oracle).
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        self.fetch_one(self.backend.ping_query(), Params::None)
            .await
            .map(|_| ())
    }

    /// Current pool occupancy.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool. On `sqlx` backends this waits for checked-out
    /// connections to return; Oracle connections close as they come back.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Closed {} client", self.backend.kind());
    }
}
