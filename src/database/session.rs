//! Unit-of-work sessions.
//!
//! A [`Session`] is one pooled connection inside an open transaction. It is
//! consumed by commit or rollback, so it is released exactly once; dropping
//! an unfinished session (e.g. on cancellation) rolls back and returns the
//! connection to the pool.

use serde_json::Value;

use crate::backend::Backend;
use crate::database::driver::Connection;
use crate::database::params::{Params, Statement};
use crate::database::row::Row;
use crate::error::DatabaseError;

/// Query logging switches.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueryLog {
    pub(crate) queries: bool,
    pub(crate) params: bool,
}

impl QueryLog {
    fn record(&self, statement: &Statement) {
        if !self.queries {
            return;
        }

        if self.params && !statement.values().is_empty() {
            let params = Value::Array(statement.values().to_vec());
            tracing::debug!("Executing query:\n{}\nParameters: {}", statement.sql(), params);
        } else {
            tracing::debug!("Executing query:\n{}", statement.sql());
        }
    }
}

/// Transaction-scoped session handed to
/// [`AsyncDatabase::transaction`](crate::AsyncDatabase::transaction).
pub struct Session<'a> {
    conn: Connection,
    backend: &'a dyn Backend,
    log: QueryLog,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    pub(crate) fn new(conn: Connection, backend: &'a dyn Backend, log: QueryLog) -> Self {
        Self { conn, backend, log }
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(
        &mut self,
        query: &str,
        params: impl Into<Params>,
    ) -> Result<u64, DatabaseError> {
        let statement = Statement::prepare(query, params.into(), self.backend.placeholder())?;
        self.execute_statement(&statement).await
    }

    /// Run a query and return all rows in order.
    pub async fn fetch_all(
        &mut self,
        query: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<Row>, DatabaseError> {
        let statement = Statement::prepare(query, params.into(), self.backend.placeholder())?;
        self.fetch_statement(&statement).await
    }

    /// Run a query and return its first row, if any.
    pub async fn fetch_one(
        &mut self,
        query: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Row>, DatabaseError> {
        Ok(self.fetch_all(query, params).await?.into_iter().next())
    }

    pub(crate) async fn execute_statement(
        &mut self,
        statement: &Statement,
    ) -> Result<u64, DatabaseError> {
        self.log.record(statement);
        self.conn
            .execute(statement)
            .await
            .map_err(|e| self.backend.classify(e))
    }

    pub(crate) async fn fetch_statement(
        &mut self,
        statement: &Statement,
    ) -> Result<Vec<Row>, DatabaseError> {
        self.log.record(statement);
        self.conn
            .fetch_all(statement)
            .await
            .map_err(|e| self.backend.classify(e))
    }

    /// Execute every statement in order; stops at the first failure.
    pub(crate) async fn execute_batch(
        &mut self,
        statements: &[Statement],
    ) -> Result<u64, DatabaseError> {
        let mut affected = 0;
        for statement in statements {
            affected += self.execute_statement(statement).await?;
        }
        Ok(affected)
    }

    /// Commit on success, roll back on failure, and hand back the outcome.
    pub(crate) async fn finish<T>(
        self,
        outcome: Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::error!("Rollback failed after '{}': {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Commit failures are reported as generic errors and never retried.
    pub(crate) async fn commit(self) -> Result<(), DatabaseError> {
        let backend = self.backend;
        self.conn
            .commit()
            .await
            .map_err(|e| backend.classify(e).into_generic())
    }

    pub(crate) async fn rollback(self) -> Result<(), DatabaseError> {
        let backend = self.backend;
        self.conn
            .rollback()
            .await
            .map_err(|e| backend.classify(e).into_generic())
    }
}
