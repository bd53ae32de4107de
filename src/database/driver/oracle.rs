//! Oracle sessions on the blocking client.
//!
//! Every call runs on Tokio's blocking pool with the connection moved in and
//! handed back. The connection travels inside [`OracleSession`], whose drop
//! rolls back, so a cancelled call never returns uncommitted work to the pool.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use oracle::sql_type::{OracleType, ToSql};
use oracle::{Connection, ResultSet};
use r2d2::PooledConnection;
use serde_json::{Map, Number, Value};

use crate::backend::{NativeError, OracleConnector};
use crate::database::client::PoolStats;
use crate::database::params::Statement;
use crate::database::row::Row;

/// `r2d2` pool of Oracle connections; `None` once closed.
pub(crate) struct OraclePool {
    pool: Mutex<Option<r2d2::Pool<OracleConnector>>>,
}

impl OraclePool {
    pub(crate) fn new(connector: OracleConnector, max_size: u32, acquire_timeout: Duration) -> Self {
        let pool = r2d2::Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .connection_timeout(acquire_timeout)
            .build_unchecked(connector);
        Self {
            pool: Mutex::new(Some(pool)),
        }
    }

    fn current(&self) -> Option<r2d2::Pool<OracleConnector>> {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn begin(&self) -> Result<OracleSession, NativeError> {
        let pool = self.current().ok_or(NativeError::Closed)?;
        let conn = tokio::task::spawn_blocking(move || pool.get()).await??;
        Ok(OracleSession { conn: Some(conn) })
    }

    pub(crate) fn stats(&self) -> PoolStats {
        self.current().map_or(PoolStats { size: 0, idle: 0 }, |pool| {
            let state = pool.state();
            PoolStats {
                size: state.connections,
                idle: state.idle_connections as usize,
            }
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.current().is_none()
    }

    /// Stop handing out connections; idle ones close once every checked-out
    /// connection is back.
    pub(crate) fn close(&self) {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// A checked-out connection with an implicit open transaction.
pub(crate) struct OracleSession {
    conn: Option<PooledConnection<OracleConnector>>,
}

impl Drop for OracleSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = conn.rollback() {
                tracing::warn!("Rollback of abandoned Oracle session failed: {}", err);
            }
        }
    }
}

impl OracleSession {
    /// Run `call` on the blocking pool and take the connection back.
    async fn run<T, F>(&mut self, call: F) -> Result<T, NativeError>
    where
        F: FnOnce(&Connection) -> Result<T, oracle::Error> + Send + 'static,
        T: Send + 'static,
    {
        let mut held = OracleSession {
            conn: self.conn.take(),
        };
        let (mut held, result) = tokio::task::spawn_blocking(move || {
            let result = match held.conn.as_deref() {
                Some(conn) => call(conn).map_err(NativeError::from),
                None => Err(NativeError::Closed),
            };
            (held, result)
        })
        .await?;
        self.conn = held.conn.take();
        result
    }

    pub(crate) async fn execute(&mut self, statement: &Statement) -> Result<u64, NativeError> {
        let sql = statement.sql().to_string();
        let values = bind_values(statement.values());
        self.run(move |conn| {
            let params = as_params(&values);
            let executed = conn.execute(&sql, &params)?;
            executed.row_count()
        })
        .await
    }

    pub(crate) async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>, NativeError> {
        let sql = statement.sql().to_string();
        let values = bind_values(statement.values());
        self.run(move |conn| {
            let params = as_params(&values);
            let rows = conn.query(&sql, &params)?;
            decode_rows(rows)
        })
        .await
    }

    pub(crate) async fn commit(mut self) -> Result<(), NativeError> {
        self.run(|conn| conn.commit()).await?;
        // Committed; nothing left for drop to undo.
        self.conn.take();
        Ok(())
    }

    pub(crate) async fn rollback(mut self) -> Result<(), NativeError> {
        self.run(|conn| conn.rollback()).await?;
        self.conn.take();
        Ok(())
    }
}

/// Owned bind value; JSON has no Oracle type of its own.
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Int(i64),
    Float(f64),
    Text(Option<String>),
}

fn bind_values(values: &[Value]) -> Vec<Bind> {
    values
        .iter()
        .map(|value| match value {
            Value::Null => Bind::Text(None),
            // Oracle SQL has no boolean before 23ai; bind the conventional 1/0.
            Value::Bool(b) => Bind::Int(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Bind::Int(i),
                None => Bind::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Bind::Text(Some(s.clone())),
            other => Bind::Text(Some(other.to_string())),
        })
        .collect()
}

fn as_params(values: &[Bind]) -> Vec<&dyn ToSql> {
    values
        .iter()
        .map(|value| -> &dyn ToSql {
            match value {
                Bind::Int(i) => i,
                Bind::Float(f) => f,
                Bind::Text(s) => s,
            }
        })
        .collect()
}

fn decode_rows(rows: ResultSet<'_, oracle::Row>) -> Result<Vec<Row>, oracle::Error> {
    let columns: Vec<(String, OracleType)> = rows
        .column_info()
        .iter()
        .map(|info| (info.name().to_string(), info.oracle_type().clone()))
        .collect();

    let mut decoded = Vec::new();
    for row in rows {
        let row = row?;
        let mut fields = Map::new();
        for (index, (name, oracle_type)) in columns.iter().enumerate() {
            fields.insert(name.clone(), decode_value(&row, index, oracle_type)?);
        }
        decoded.push(fields);
    }
    Ok(decoded)
}

fn decode_value(row: &oracle::Row, index: usize, oracle_type: &OracleType) -> Result<Value, oracle::Error> {
    let float = |row: &oracle::Row| -> Result<Value, oracle::Error> {
        Ok(row
            .get::<usize, Option<f64>>(index)?
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number))
    };

    match oracle_type {
        // Scale zero or below (including unconstrained NUMBER) may still
        // hold a fraction; fall back to a float when it does.
        OracleType::Number(_, scale) if *scale <= 0 => {
            match row.get::<usize, Option<i64>>(index) {
                Ok(value) => Ok(value.map_or(Value::Null, Value::from)),
                Err(_) => float(row),
            }
        }
        OracleType::Int64 => Ok(row
            .get::<usize, Option<i64>>(index)?
            .map_or(Value::Null, Value::from)),
        OracleType::Number(..)
        | OracleType::Float(_)
        | OracleType::BinaryFloat
        | OracleType::BinaryDouble => float(row),
        OracleType::Boolean => Ok(row
            .get::<usize, Option<bool>>(index)?
            .map_or(Value::Null, Value::Bool)),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => Ok(row
            .get::<usize, Option<Vec<u8>>>(index)?
            .map_or(Value::Null, |bytes| {
                Value::Array(bytes.into_iter().map(Value::from).collect())
            })),
        _ => Ok(row
            .get::<usize, Option<String>>(index)?
            .map_or(Value::Null, Value::String)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Connector, OracleBackend, OracleOptions};
    use serde_json::json;

    #[test]
    fn test_bind_values() {
        let binds = bind_values(&[
            Value::Null,
            json!(true),
            json!(42),
            json!(2.5),
            json!("text"),
            json!({"k": 1}),
        ]);
        assert_eq!(
            binds,
            vec![
                Bind::Text(None),
                Bind::Int(1),
                Bind::Int(42),
                Bind::Float(2.5),
                Bind::Text(Some("text".to_string())),
                Bind::Text(Some(r#"{"k":1}"#.to_string())),
            ]
        );
        assert_eq!(as_params(&binds).len(), 6);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_sessions() {
        let backend = OracleBackend::new(&OracleOptions::service(
            "scott", "tiger", "127.0.0.1", "SALES",
        ))
        .unwrap();
        let Connector::Oracle(connector) = backend.connector() else {
            panic!("oracle backend must use the oracle connector");
        };

        let pool = OraclePool::new(connector, 2, Duration::from_millis(10));
        assert!(!pool.is_closed());
        assert_eq!(pool.stats(), PoolStats { size: 0, idle: 0 });

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.begin().await, Err(NativeError::Closed)));
    }
}
