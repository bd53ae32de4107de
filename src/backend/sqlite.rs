//! SQLite adapter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;

use crate::backend::{Backend, BackendKind, Connector, NativeError, classify_native};
use crate::config::ConfigError;
use crate::error::DatabaseError;

/// Primary result codes for a busy, locked or unopenable database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CANTOPEN: i32 = 14;

/// Whether an (extended) SQLite result code denotes a transient
/// connection-level failure.
pub fn is_connection_loss(code: i32) -> bool {
    matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED | SQLITE_CANTOPEN)
}

fn default_create_if_missing() -> bool {
    true
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteOptions {
    /// Database file path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Use a private in-memory database.
    #[serde(default)]
    pub in_memory: bool,
    /// Create the file when it does not exist (default: true).
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            create_if_missing: true,
        }
    }
}

/// SQLite backend.
#[derive(Debug)]
pub struct SqliteBackend {
    url: String,
    in_memory: bool,
}

impl SqliteBackend {
    /// Build the adapter from options.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` unless exactly one of `path`
    /// and `in_memory` is set.
    pub fn new(options: &SqliteOptions) -> Result<Self, ConfigError> {
        match (&options.path, options.in_memory) {
            (None, false) => Err(ConfigError::ValidationError(
                "sqlite: either path or in_memory must be provided".to_string(),
            )),
            (Some(_), true) => Err(ConfigError::ValidationError(
                "sqlite: path and in_memory are mutually exclusive".to_string(),
            )),
            (None, true) => Ok(Self {
                url: "sqlite::memory:".to_string(),
                in_memory: true,
            }),
            (Some(path), false) => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "sqlite: path cannot be empty".to_string(),
                    ));
                }
                let mode = if options.create_if_missing { "?mode=rwc" } else { "" };
                Ok(Self {
                    url: format!("sqlite://{}{}", path.display(), mode),
                    in_memory: false,
                })
            }
        }
    }

    /// Database file, created if missing.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::new(&SqliteOptions {
            path: Some(path.as_ref().to_path_buf()),
            ..SqliteOptions::default()
        })
    }

    /// Private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            in_memory: true,
        }
    }

    /// Connection URL passed to `sqlx`.
    pub fn connection_url(&self) -> &str {
        &self.url
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connector(&self) -> Connector {
        Connector::Url(self.url.clone())
    }

    fn tune_pool(&self, options: AnyPoolOptions) -> AnyPoolOptions {
        if !self.in_memory {
            return options;
        }
        // Each new connection would open a fresh empty database; keep exactly one alive.
        options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    }

    fn classify(&self, err: NativeError) -> DatabaseError {
        classify_native(BackendKind::Sqlite, err, |db_err| {
            db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(is_connection_loss)
        })
    }
}
