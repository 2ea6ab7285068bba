//! nest-core — shared configuration and domain types for sqlnest.
//!
//! Home of [`BrokerConfig`] (environment-driven settings with layered
//! fallbacks) and the database payload types exchanged between the pool,
//! the driver, and the REST surface. Database names are derived here so
//! every component agrees on the naming scheme:
//!
//! ```text
//! {db_prefix}_{template_db_prefix}_{hash}        template databases
//! {db_prefix}_{test_db_prefix}_{hash}_{id:03}    test databases
//! ```

pub mod config;
pub mod types;

pub use config::BrokerConfig;
pub use types::{Database, DatabaseConfig, TemplateHash, TestDatabase};
