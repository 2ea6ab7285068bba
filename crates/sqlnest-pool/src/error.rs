//! Error types for the broker core.

use thiserror::Error;

use sqlnest_driver::DriverError;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by [`DbPool`](crate::DbPool).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no test database pool exists for this hash")]
    UnknownHash,

    #[error("test database pool is full")]
    PoolFull,

    #[error("test database is not checked out from the pool")]
    UnknownId,

    #[error("invalid test database index")]
    InvalidIndex,

    #[error("no test database is currently ready")]
    NoDbReady,

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Result type alias for template lifecycle operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors surfaced by [`TemplateRegistry`](crate::TemplateRegistry).
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template exists for this hash")]
    NotFound,

    #[error("template has been discarded")]
    Discarded,

    #[error("timed out waiting for template to finalize")]
    FinalizeTimeout,
}

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors surfaced by the [`Manager`](crate::Manager) facade. Lifecycle
/// errors pass through unchanged; background worker errors never reach
/// callers.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("template is already initialized")]
    TemplateAlreadyInitialized,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}
