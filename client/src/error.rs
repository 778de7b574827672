//! Unified error handling for the client.

use crate::config::ConfigError;
use crate::remote::RemoteError;
use serde::Serialize;
use std::sync::Arc;

/// Message shown for any error that is not safe to display verbatim.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Client error type.
///
/// Cheap to clone: non-cloneable sources are shared, so callers that join a
/// sync pass receive the same error the running caller saw.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("The local database is not available. Please sign in again.")]
    DatabaseNotInitialized,

    #[error("Could not open the local database. Check available storage and try again.")]
    DatabaseConnection(#[source] Arc<sqlx::Error>),

    #[error("Database error: {0}")]
    Database(#[source] Arc<sqlx::Error>),

    #[error("Migration error: {0}")]
    Migration(#[source] Arc<sqlx::migrate::MigrateError>),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("A sync pass is already running")]
    SyncInProgress,

    #[error("Search index is not ready")]
    IndexNotReady,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Engine error: {0}")]
    Engine(#[from] lexicon_engine::Error),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("Entry not found: {0}")]
    RecordNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // A pool closed by reset() is the same as no pool at all
            sqlx::Error::PoolClosed => Error::DatabaseNotInitialized,
            other => Error::Database(Arc::new(other)),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Migration(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

/// Classification used at the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Safe to show to the user as-is
    Displayable,
    /// Worth retrying later
    Transient,
    /// Rejected because of concurrent work
    Conflict,
    Cancelled,
    /// Anything else; logged and replaced by the generic message
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DatabaseNotInitialized | Error::DatabaseConnection(_) => ErrorKind::Displayable,
            Error::Remote(_) => ErrorKind::Transient,
            Error::SyncInProgress => ErrorKind::Conflict,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Database(_)
            | Error::Migration(_)
            | Error::IndexNotReady
            | Error::Engine(_)
            | Error::Io(_)
            | Error::RecordNotFound(_)
            | Error::Config(_) => ErrorKind::Internal,
        }
    }

    pub fn is_displayable(&self) -> bool {
        self.kind() == ErrorKind::Displayable
    }

    /// Convert into what the UI may show.
    pub fn to_user_facing(&self) -> UserFacingError {
        if self.is_displayable() {
            UserFacingError {
                message: self.to_string(),
                displayable: true,
            }
        } else {
            tracing::error!(kind = ?self.kind(), "Internal error: {:?}", self);
            UserFacingError {
                message: GENERIC_FAILURE_MESSAGE.to_string(),
                displayable: false,
            }
        }
    }
}

/// Error as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct UserFacingError {
    pub message: String,
    /// Whether `message` came from the underlying error
    pub displayable: bool,
}

impl From<Error> for UserFacingError {
    fn from(err: Error) -> Self {
        err.to_user_facing()
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
