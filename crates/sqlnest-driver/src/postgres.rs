//! PostgreSQL driver backed by sqlx.
//!
//! All statements run through a small connection pool against the
//! maintenance database. `CREATE DATABASE` / `DROP DATABASE` cannot run
//! inside a transaction, so every operation is a single standalone
//! statement.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use nest_core::DatabaseConfig;

use crate::error::{DriverError, DriverResult};
use crate::DatabaseDriver;

/// Production driver issuing administrative SQL over sqlx.
pub struct PgDriver {
    pool: PgPool,
    /// Source template for `initialize_template` (typically `template0`).
    root_template: String,
}

impl PgDriver {
    /// Connect to the maintenance database.
    pub async fn connect(config: &DatabaseConfig, root_template: &str) -> DriverResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.connection_string())
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        Ok(Self {
            pool,
            root_template: root_template.to_string(),
        })
    }

    /// Wrap an existing pool (the caller owns connection setup).
    pub fn with_pool(pool: PgPool, root_template: &str) -> Self {
        Self {
            pool,
            root_template: root_template.to_string(),
        }
    }

    async fn execute(&self, sql: &str) -> DriverResult<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Statement(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseDriver for PgDriver {
    async fn initialize_template(&self, name: &str, owner: &str) -> DriverResult<()> {
        debug!(database = %name, "initializing template database");
        self.execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
            .await?;
        self.execute(&format!(
            "CREATE DATABASE {} OWNER {} TEMPLATE {}",
            quote_ident(name),
            quote_ident(owner),
            quote_ident(&self.root_template),
        ))
        .await
    }

    async fn create_from_template(
        &self,
        name: &str,
        owner: &str,
        template: &str,
    ) -> DriverResult<()> {
        debug!(database = %name, %template, "cloning database from template");
        self.execute(&format!(
            "CREATE DATABASE {} OWNER {} TEMPLATE {}",
            quote_ident(name),
            quote_ident(owner),
            quote_ident(template),
        ))
        .await
    }

    async fn drop_database(&self, name: &str) -> DriverResult<()> {
        debug!(database = %name, "dropping database");
        self.execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
            .await
    }

    async fn database_exists(&self, name: &str) -> DriverResult<bool> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DriverError::Statement(e.to_string()))?;
        Ok(exists.is_some())
    }
}

/// Quote a PostgreSQL identifier. Database names are derived from opaque
/// hashes, so this guards against malformed input rather than injection
/// by trusted callers.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
