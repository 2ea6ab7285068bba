//! Error types for the driver adapter.

use thiserror::Error;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors surfaced by a [`DatabaseDriver`](crate::DatabaseDriver).
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("failed to connect to database: {0}")]
    Connect(String),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("database does not exist: {0}")]
    NotFound(String),

    #[error("database already exists: {0}")]
    AlreadyExists(String),
}
