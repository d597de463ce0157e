//! Error types for focal-core

use thiserror::Error;

/// Result type alias using focal-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in focal-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote sync call failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// Circuit breaker refused the call
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),
}

impl Error {
    /// Whether this error matches one of the known permanent-failure markers.
    ///
    /// Permanent failures (missing schema relation, permission denied,
    /// malformed UUID, missing server credential, dependency not yet
    /// uploaded) can never succeed on retry; the queue marks such items
    /// failed after a single attempt.
    pub fn is_permanent_sync_error(&self) -> bool {
        is_permanent_sync_error(&self.to_string())
    }
}

/// Markers that identify errors retrying cannot fix.
const PERMANENT_ERROR_MARKERS: &[&str] = &[
    "does not exist",
    "relation",
    "schema cache",
    "permission denied",
    "invalid input syntax for type uuid",
    "service_role",
    "not yet uploaded",
];

/// Check an error message against the permanent-failure markers.
pub fn is_permanent_sync_error(message: &str) -> bool {
    let message = message.to_lowercase();
    PERMANENT_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
