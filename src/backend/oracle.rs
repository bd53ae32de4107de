//! Oracle adapter.
//!
//! Oracle is not reachable through `sqlx`; connections come from the
//! `oracle` crate and are pooled with `r2d2`. [`OracleConnector`] is the pool's
//! connection manager.

use std::fmt;

use oracle::{ConnStatus, Connection};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendKind, Connector, NativeError, Placeholder, classify_native};
use crate::config::ConfigError;
use crate::error::{DatabaseError, Failure};

/// Default Oracle listener port.
pub const DEFAULT_PORT: u16 = 1521;

/// ORA- error numbers reported when the session is lost or refused.
const CONNECTION_LOSS_CODES: &[i32] = &[
    28,   // your session has been killed
    1013, // user requested cancel of current operation
    1033, // initialization or shutdown in progress
    1034, // ORACLE not available
    1089, // immediate shutdown in progress
    3113, // end-of-file on communication channel
    3114, // not connected to ORACLE
    3135, // connection lost contact
];

/// Whether an ORA- error number denotes connection loss.
pub fn is_connection_loss(code: i32) -> bool {
    CONNECTION_LOSS_CODES.contains(&code)
}

/// Oracle connection settings.
///
/// One of `service_name` and `sid` is required; `service_name` wins when
/// both are set.
#[derive(Clone, Serialize, Deserialize)]
pub struct OracleOptions {
    /// Login user.
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
    /// Listener host.
    pub host: String,
    /// Listener port (default: 1521).
    #[serde(default)]
    pub port: Option<u16>,
    /// Service name registered with the listener.
    #[serde(default)]
    pub service_name: Option<String>,
    /// Instance SID.
    #[serde(default)]
    pub sid: Option<String>,
}

impl fmt::Debug for OracleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleOptions")
            .field("username", &self.username)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service_name", &self.service_name)
            .field("sid", &self.sid)
            .finish()
    }
}

impl OracleOptions {
    /// Options for a service name on the default port.
    pub fn service(
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            host: host.into(),
            port: None,
            service_name: Some(service_name.into()),
            sid: None,
        }
    }

    /// Set the listener port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Login and connect descriptor; the `r2d2` manager for Oracle connections.
#[derive(Clone)]
pub struct OracleConnector {
    username: String,
    password: String,
    connect_string: String,
}

impl fmt::Debug for OracleConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConnector")
            .field("username", &self.username)
            .field("connect_string", &self.connect_string)
            .finish_non_exhaustive()
    }
}

impl OracleConnector {
    /// Connect descriptor handed to the Oracle client.
    pub fn connect_string(&self) -> &str {
        &self.connect_string
    }
}

impl r2d2::ManageConnection for OracleConnector {
    type Connection = Connection;
    type Error = oracle::Error;

    fn connect(&self) -> Result<Connection, oracle::Error> {
        Connection::connect(&self.username, &self.password, &self.connect_string)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), oracle::Error> {
        conn.ping()
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        !matches!(conn.status(), Ok(ConnStatus::Normal))
    }
}

/// Oracle Database backend.
#[derive(Debug)]
pub struct OracleBackend {
    connector: OracleConnector,
}

impl OracleBackend {
    /// Build the adapter from options.
    ///
    /// A service name becomes an Easy Connect string `host:port/service`; a
    /// SID becomes a full connect descriptor, since Easy Connect cannot name
    /// one.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the host is blank or neither
    /// `service_name` nor `sid` is provided.
    pub fn new(options: &OracleOptions) -> Result<Self, ConfigError> {
        if options.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "oracle: host must be provided".to_string(),
            ));
        }

        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let port = options.port.unwrap_or(DEFAULT_PORT);
        let connect_string = match (non_blank(&options.service_name), non_blank(&options.sid)) {
            (Some(service), _) => format!("{}:{}/{}", options.host, port, service),
            (None, Some(sid)) => format!(
                "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={})(PORT={}))(CONNECT_DATA=(SID={})))",
                options.host, port, sid
            ),
            (None, None) => {
                return Err(ConfigError::ValidationError(
                    "oracle: either service_name or sid must be provided".to_string(),
                ));
            }
        };

        Ok(Self {
            connector: OracleConnector {
                username: options.username.clone(),
                password: options.password.clone(),
                connect_string,
            },
        })
    }

    /// Connect descriptor handed to the Oracle client.
    pub fn connect_string(&self) -> &str {
        self.connector.connect_string()
    }
}

impl Backend for OracleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oracle
    }

    fn connector(&self) -> Connector {
        Connector::Oracle(self.connector.clone())
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::Colon
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1 FROM DUAL"
    }

    fn classify(&self, err: NativeError) -> DatabaseError {
        match err {
            NativeError::Oracle(err) => classify_oracle(err),
            other => classify_native(BackendKind::Oracle, other, |_| false),
        }
    }
}

fn classify_oracle(err: oracle::Error) -> DatabaseError {
    let db_error = match &err {
        oracle::Error::OciError(db) | oracle::Error::DpiError(db) => {
            Some((db.code(), db.message().to_string()))
        }
        _ => None,
    };

    match db_error {
        Some((code, message)) => {
            tracing::error!("Oracle error: {} - {}", code, message);
            let failure = Failure::new(message)
                .with_code(format!("ORA-{code:05}"))
                .with_source(err);
            if is_connection_loss(code) {
                DatabaseError::Connection(failure)
            } else {
                DatabaseError::QueryExecution(failure)
            }
        }
        None => {
            tracing::error!("Unexpected error during query execution: {}", err);
            DatabaseError::Generic(Failure::new(err.to_string()).with_source(err))
        }
    }
}
