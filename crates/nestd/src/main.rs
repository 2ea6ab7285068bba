//! nestd — the sqlnest broker daemon.
//!
//! Serves the REST API backed by a PostgreSQL server. Configuration is
//! environment-driven (`SQLNEST_*` with libpq fallbacks); the flags
//! below override the listen address for convenience.
//!
//! # Usage
//!
//! ```text
//! nestd serve --port 5000
//! nestd serve --in-memory        # no PostgreSQL, for local experiments
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use nest_core::BrokerConfig;
use sqlnest_driver::{DatabaseDriver, MemoryDriver, PgDriver};
use sqlnest_pool::Manager;

#[derive(Parser)]
#[command(name = "nestd", about = "sqlnest test-database broker daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker.
    Serve {
        /// Port to listen on (overrides SQLNEST_PORT).
        #[arg(long)]
        port: Option<u16>,

        /// Use the in-memory driver instead of PostgreSQL.
        #[arg(long)]
        in_memory: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nestd=debug,sqlnest_pool=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, in_memory } => serve(port, in_memory).await,
    }
}

async fn serve(port: Option<u16>, in_memory: bool) -> anyhow::Result<()> {
    let mut config = BrokerConfig::from_env();
    if let Some(port) = port {
        config.listen_port = port;
    }

    let driver: Arc<dyn DatabaseDriver> = if in_memory {
        info!("using in-memory driver");
        Arc::new(MemoryDriver::new())
    } else {
        let driver = PgDriver::connect(&config.connection, &config.root_template).await?;
        info!(
            host = %config.connection.host,
            port = config.connection.port,
            database = %config.connection.database,
            "connected to maintenance database"
        );
        Arc::new(driver)
    };

    let manager = Manager::new(config.clone(), driver);
    let router = sqlnest_api::build_router(manager.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    info!(%addr, "broker listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    // Stop the workers and drop every managed database before exiting.
    manager.shutdown().await;
    info!("broker stopped");
    Ok(())
}
