//! asyncdb - Async Database Access Layer
//!
//! A uniform async client over PostgreSQL, MySQL, SQLite and Oracle with classified
//! errors, bounded exponential-backoff retry and scoped transactions. It can
//! be used as a library or through the `asyncdb` executable.
//!
//! # Architecture
//!
//! - **Errors**: one [`DatabaseError`] taxonomy shared by every backend
//! - **Retry**: [`RetryPolicy`] wraps single-shot operations
//! - **Client**: [`AsyncDatabase`] owns the pool and hands out [`Session`]s
//! - **Backends**: one [`Backend`] adapter per engine builds the connection
//!   descriptor and classifies native errors
//! - **Config**: YAML configuration with environment expansion
//!
//! # Example
//!
//! ```rust,ignore
//! use asyncdb::{AsyncDatabase, ClientOptions, Credentials, PostgresBackend};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new("app", "secret", "localhost").with_database("orders");
//!     let db = AsyncDatabase::new(PostgresBackend::new(&credentials)?, ClientOptions::default())?;
//!
//!     let rows = db
//!         .fetch_all("SELECT id, total FROM orders WHERE customer = :customer", json!({"customer": 42}))
//!         .await?;
//!     println!("{} orders", rows.len());
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod database;
pub mod error;
pub mod retry;

pub use backend::{
    Backend, BackendKind, Connector, Credentials, MySqlBackend, NativeError, OracleBackend,
    OracleOptions, Placeholder, PostgresBackend, SqliteBackend, SqliteOptions,
};
pub use config::{AppConfig, ConfigError};
pub use database::{AsyncDatabase, ClientOptions, Params, PoolStats, QueryOutput, Row, Session};
pub use error::{DatabaseError, ErrorCategory, Failure};
pub use retry::{RetryOn, RetryPolicy};
