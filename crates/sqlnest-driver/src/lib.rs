//! sqlnest-driver — database driver adapter for the sqlnest broker.
//!
//! The broker core never writes SQL; it consumes the [`DatabaseDriver`]
//! capability to create, clone, and drop databases. Two implementations
//! are provided:
//!
//! - [`PgDriver`] — the production driver, issuing `CREATE DATABASE … TEMPLATE …`
//!   and `DROP DATABASE` through an sqlx connection pool to the
//!   maintenance database.
//! - [`MemoryDriver`] — an in-memory driver that tracks database names in a
//!   set. Like an in-memory state store it backs unit and integration tests
//!   without an external PostgreSQL, and records drop order and supports
//!   failure injection.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

pub use error::{DriverError, DriverResult};
pub use memory::MemoryDriver;
pub use postgres::PgDriver;

/// Capability consumed by the broker core for all database lifecycle work.
///
/// Names are supplied by the caller; uniqueness is guaranteed by the
/// broker's naming scheme. Implementations must be safe to call from many
/// tasks concurrently.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Drop `name` if it exists, then create it from the driver's root
    /// template, owned by `owner`. Used to (re)provision template databases.
    async fn initialize_template(&self, name: &str, owner: &str) -> DriverResult<()>;

    /// Create `name` as a clone of `template`, owned by `owner`.
    async fn create_from_template(&self, name: &str, owner: &str, template: &str)
        -> DriverResult<()>;

    /// Drop `name` if it exists.
    async fn drop_database(&self, name: &str) -> DriverResult<()>;

    /// Whether `name` currently exists.
    async fn database_exists(&self, name: &str) -> DriverResult<bool>;
}
