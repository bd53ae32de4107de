//! Driver dispatch.
//!
//! [`Pool`] and [`Connection`] hide whether a backend runs on `sqlx` or on
//! the blocking Oracle client. Every error leaves here as an unclassified
//! [`NativeError`]; the session classifies it.

mod oracle;
mod postgres;

use std::str::FromStr;


use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{Any, AnyPool, ConnectOptions, Transaction};

use crate::backend::{Backend, Connector, NativeError};
use crate::config::ConfigError;
use crate::database::client::{ClientOptions, PoolStats};
use crate::database::params::{Statement, bind_query};
use crate::database::row::{Row, decode_row};

use self::oracle::{OraclePool, OracleSession};

/// Connection pool of either driver.
pub(crate) enum Pool {
    Sqlx { pool: AnyPool, cast_untyped: bool },
    Oracle(OraclePool),
}

impl Pool {
    /// Create a lazy pool; nothing connects until first use.
    pub(crate) fn open(backend: &dyn Backend, options: &ClientOptions) -> Result<Self, ConfigError> {
        match backend.connector() {
            Connector::Url(url) => {
                sqlx::any::install_default_drivers();
                let connect_options = AnyConnectOptions::from_str(&url)
                    .map_err(|e| {
                        ConfigError::ValidationError(format!(
                            "{}: invalid connection descriptor: {}",
                            backend.kind(),
                            e
                        ))
                    })?
                    // Statement logging is handled by the session, honoring `log_queries`.
                    .disable_statement_logging();

                let pool_options = backend.tune_pool(
                    AnyPoolOptions::new()
                        .max_connections(options.max_connections)
                        .acquire_timeout(options.acquire_timeout),
                );
                Ok(Self::Sqlx {
                    pool: pool_options.connect_lazy_with(connect_options),
                    cast_untyped: backend.casts_untyped_params(),
                })
            }
            Connector::Oracle(connector) => Ok(Self::Oracle(OraclePool::new(
                connector,
                options.max_connections,
                options.acquire_timeout,
            ))),
        }
    }

    /// Check out a connection and open a transaction on it.
    pub(crate) async fn begin(&self) -> Result<Connection, NativeError> {
        match self {
            Self::Sqlx { pool, cast_untyped } => Ok(Connection::Sqlx {
                tx: pool.begin().await?,
                cast_untyped: *cast_untyped,
            }),
            Self::Oracle(pool) => Ok(Connection::Oracle(pool.begin().await?)),
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        match self {
            Self::Sqlx { pool, .. } => PoolStats {
                size: pool.size(),
                idle: pool.num_idle(),
            },
            Self::Oracle(pool) => pool.stats(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Self::Sqlx { pool, .. } => pool.is_closed(),
            Self::Oracle(pool) => pool.is_closed(),
        }
    }

    pub(crate) async fn close(&self) {
        match self {
            Self::Sqlx { pool, .. } => pool.close().await,
            Self::Oracle(pool) => pool.close(),
        }
    }
}

/// One pooled connection inside an open transaction.
///
/// Dropping it without `commit` or `rollback` rolls back.
pub(crate) enum Connection {
    Sqlx {
        tx: Transaction<'static, Any>,
        cast_untyped: bool,
    },
    Oracle(OracleSession),
}

impl Connection {
    pub(crate) async fn execute(&mut self, statement: &Statement) -> Result<u64, NativeError> {
        match self {
            Self::Sqlx { tx, cast_untyped } => {
                let typed = if *cast_untyped {
                    postgres::typed_sql(&mut **tx, statement).await
                } else {
                    None
                };
                let sql = typed.as_deref().unwrap_or(statement.sql());
                let result = bind_query(sql, statement.values()).execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }
            Self::Oracle(session) => session.execute(statement).await,
        }
    }

    pub(crate) async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>, NativeError> {
        match self {
            Self::Sqlx { tx, cast_untyped } => {
                let typed = if *cast_untyped {
                    postgres::typed_sql(&mut **tx, statement).await
                } else {
                    None
                };
                let sql = typed.as_deref().unwrap_or(statement.sql());
                let rows = bind_query(sql, statement.values()).fetch_all(&mut **tx).await?;
                Ok(rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?)
            }
            Self::Oracle(session) => session.fetch_all(statement).await,
        }
    }

    pub(crate) async fn commit(self) -> Result<(), NativeError> {
        match self {
            Self::Sqlx { tx, .. } => Ok(tx.commit().await?),
            Self::Oracle(session) => session.commit().await,
        }
    }

    pub(crate) async fn rollback(self) -> Result<(), NativeError> {
        match self {
            Self::Sqlx { tx, .. } => Ok(tx.rollback().await?),
            Self::Oracle(session) => session.rollback().await,
        }
    }
}
