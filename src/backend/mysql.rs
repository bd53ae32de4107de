//! MySQL / MariaDB adapter.

use std::fmt;

use sqlx::mysql::MySqlDatabaseError;

use crate::backend::{
    Backend, BackendKind, Connector, Credentials, NativeError, classify_native, network_url,
    require_host,
};
use crate::config::ConfigError;
use crate::error::DatabaseError;

/// Default MySQL port.
pub const DEFAULT_PORT: u16 = 3306;

/// Server error numbers reported when the connection is refused, dropped or killed.
const CONNECTION_LOSS_ERRORS: &[u16] = &[
    1040, // ER_CON_COUNT_ERROR
    1042, // ER_BAD_HOST_ERROR
    1043, // ER_HANDSHAKE_ERROR
    1053, // ER_SERVER_SHUTDOWN
    1077, // ER_NORMAL_SHUTDOWN
    1078, // ER_GOT_SIGNAL
    1079, // ER_SHUTDOWN_COMPLETE
    1152, // ER_ABORTING_CONNECTION
    1158, // ER_NET_READ_ERROR
    1159, // ER_NET_READ_INTERRUPTED
    1160, // ER_NET_ERROR_ON_WRITE
    1161, // ER_NET_WRITE_INTERRUPTED
    1927, // ER_CONNECTION_KILLED
];

/// Whether a server error number denotes connection loss.
pub fn is_connection_loss_number(number: u16) -> bool {
    CONNECTION_LOSS_ERRORS.contains(&number)
}

/// Whether a SQLSTATE denotes connection loss (class 08).
pub fn is_connection_loss_state(sqlstate: &str) -> bool {
    sqlstate.starts_with("08")
}

/// MySQL backend.
pub struct MySqlBackend {
    url: String,
    host: String,
    port: u16,
    database: String,
}

impl fmt::Debug for MySqlBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlBackend")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl MySqlBackend {
    /// Build the adapter from credentials.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the host or database name is missing.
    pub fn new(credentials: &Credentials) -> Result<Self, ConfigError> {
        require_host(BackendKind::MySql, credentials)?;

        let database = match credentials.database.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(ConfigError::ValidationError(
                    "mysql: database name must be provided".to_string(),
                ));
            }
        };

        let port = credentials.port.unwrap_or(DEFAULT_PORT);
        let url = network_url("mysql", credentials, port, &database)?;

        Ok(Self {
            url,
            host: credentials.host.clone(),
            port,
            database,
        })
    }

    /// Connection URL passed to `sqlx`.
    pub fn connection_url(&self) -> &str {
        &self.url
    }
}

impl Backend for MySqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn connector(&self) -> Connector {
        Connector::Url(self.url.clone())
    }

    fn classify(&self, err: NativeError) -> DatabaseError {
        classify_native(BackendKind::MySql, err, |db_err| {
            db_err
                .code()
                .is_some_and(|state| is_connection_loss_state(&state))
                || db_err
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .is_some_and(|e| is_connection_loss_number(e.number()))
        })
    }
}
