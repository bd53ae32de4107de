//! Configuration for the `asyncdb` client.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Backend selection and connection settings
//! - Client settings (retry policy, query logging, pool sizing)

mod app;
mod validation;

pub use app::{AppConfig, BackendConfig, ClientConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
