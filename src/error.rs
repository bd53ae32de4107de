//! Classified database errors.
//!
//! Every operation on [`AsyncDatabase`](crate::AsyncDatabase) fails with a
//! [`DatabaseError`]. Native driver errors never leave the crate as-is: the
//! active [`Backend`](crate::backend::Backend) translates them into one of the
//! four [`ErrorCategory`] members, keeping the native error as the
//! [`source`](std::error::Error::source) for diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Boxed native cause attached to a [`Failure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure category shared by all backends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ErrorCategory {
    /// Backend unreachable or link dropped. Transient.
    Connection,
    /// Statement rejected by the backend.
    QueryExecution,
    /// A retryable failure persisted through every allowed attempt.
    RetryExhausted,
    /// Anything not recognized, including commit and rollback failures.
    Generic,
}

/// Details of a single classified failure.
#[derive(Debug)]
pub struct Failure {
    code: Option<String>,
    message: String,
    source: Option<BoxError>,
}

impl Failure {
    /// Create a failure with a message and no native code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the backend-native error code (SQLSTATE, server error number, ...).
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the native error this failure was classified from.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Native error code, if the backend reported one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors returned by the database client.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(#[source] Failure),

    /// The backend rejected the statement.
    #[error("query execution error: {0}")]
    QueryExecution(#[source] Failure),

    /// All retry attempts failed; `last` is the final classified failure.
    #[error("retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Last failure observed.
        #[source]
        last: Box<DatabaseError>,
    },

    /// Unclassified database error.
    #[error("database error: {0}")]
    Generic(#[source] Failure),
}

impl DatabaseError {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::Connection,
            Self::QueryExecution(_) => ErrorCategory::QueryExecution,
            Self::RetryExhausted { .. } => ErrorCategory::RetryExhausted,
            Self::Generic(_) => ErrorCategory::Generic,
        }
    }

    /// Native error code of the underlying failure.
    ///
    /// For [`DatabaseError::RetryExhausted`] this is the code of the last cause.
    pub fn native_code(&self) -> Option<&str> {
        self.failure().code()
    }

    /// Message of the underlying failure.
    pub fn message(&self) -> &str {
        self.failure().message()
    }

    /// Last failure that caused retry exhaustion.
    pub fn last_cause(&self) -> Option<&DatabaseError> {
        match self {
            Self::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Attempts made before giving up, for exhausted retries.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Re-tag as [`DatabaseError::Generic`], keeping code, message and cause.
    ///
    /// Used for commit and rollback failures, which must never be retried.
    pub(crate) fn into_generic(self) -> Self {
        match self {
            Self::Connection(failure) | Self::QueryExecution(failure) => Self::Generic(failure),
            other => other,
        }
    }

    fn failure(&self) -> &Failure {
        match self {
            Self::Connection(f) | Self::QueryExecution(f) | Self::Generic(f) => f,
            Self::RetryExhausted { last, .. } => last.failure(),
        }
    }
}
