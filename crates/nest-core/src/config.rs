//! Environment-driven broker configuration.
//!
//! Every key is optional and falls back through `SQLNEST_*` → standard
//! libpq variables (`PGHOST`, `PGUSER`, …) → a literal default, so the
//! broker boots against a stock local PostgreSQL with no configuration
//! at all.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::types::DatabaseConfig;

/// Broker settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Connection to the maintenance database. This database is never
    /// dropped or recreated; all administrative statements run through it.
    pub connection: DatabaseConfig,
    /// Source template for freshly initialized template databases.
    pub root_template: String,
    /// Prefix shared by every database the broker manages.
    pub db_prefix: String,
    /// Infix for template databases.
    pub template_db_prefix: String,
    /// Infix for test databases.
    pub test_db_prefix: String,
    /// Role owning template and test databases.
    pub test_db_owner: String,
    pub test_db_owner_password: String,
    /// Number of test databases prepared in the background at finalize time.
    pub initial_pool_size: usize,
    /// Hard ceiling of slots per template hash.
    pub max_pool_size: usize,
    /// How long a consumer waits for a template to reach `finalized`.
    pub template_finalize_timeout: Duration,
    /// How long a consumer waits for a ready test database.
    pub test_db_get_timeout: Duration,
    /// Fixed number of background recycling workers.
    pub cleaning_workers: usize,
    /// When true, dirty slots are never handed out without recycling first.
    pub force_return: bool,
    /// REST listen port.
    pub listen_port: u16,
}

impl BrokerConfig {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Self {
        let username = env_str(
            &["SQLNEST_PGUSER", "PGUSER", "USER"],
            "postgres",
        );
        let password = env_str(&["SQLNEST_PGPASSWORD", "PGPASSWORD"], "");

        Self {
            connection: DatabaseConfig {
                host: env_str(&["SQLNEST_PGHOST", "PGHOST"], "127.0.0.1"),
                port: env_parse(&["SQLNEST_PGPORT", "PGPORT"], 5432),
                username: username.clone(),
                password: password.clone(),
                // The maintenance connection must not target a template or
                // test database, those get dropped and recreated.
                database: env_str(&["SQLNEST_PGDATABASE"], "postgres"),
            },
            root_template: env_str(&["SQLNEST_ROOT_TEMPLATE"], "template0"),
            db_prefix: env_str(&["SQLNEST_DB_PREFIX"], "sqlnest"),
            template_db_prefix: env_str(&["SQLNEST_TEMPLATE_DB_PREFIX"], "template"),
            test_db_prefix: env_str(&["SQLNEST_TEST_DB_PREFIX"], "test"),
            test_db_owner: env_str(&["SQLNEST_TEST_PGUSER", "SQLNEST_PGUSER", "PGUSER"], &username),
            test_db_owner_password: env_str(
                &["SQLNEST_TEST_PGPASSWORD", "SQLNEST_PGPASSWORD", "PGPASSWORD"],
                &password,
            ),
            initial_pool_size: env_parse(&["SQLNEST_TEST_INITIAL_POOL_SIZE"], 10),
            max_pool_size: env_parse(&["SQLNEST_TEST_MAX_POOL_SIZE"], 500),
            template_finalize_timeout: Duration::from_millis(env_parse(
                &["SQLNEST_TEMPLATE_FINALIZE_TIMEOUT_MS"],
                2000,
            )),
            test_db_get_timeout: Duration::from_millis(env_parse(
                &["SQLNEST_TEST_DB_GET_TIMEOUT_MS"],
                500,
            )),
            cleaning_workers: env_parse(&["SQLNEST_NUM_OF_CLEANING_WORKERS"], 3),
            force_return: env_parse(&["SQLNEST_TEST_DB_FORCE_RETURN"], false),
            listen_port: env_parse(&["SQLNEST_PORT"], 5000),
        }
    }

    /// Name of the template database for `hash`.
    pub fn template_database_name(&self, hash: &str) -> String {
        format!("{}_{}_{}", self.db_prefix, self.template_db_prefix, hash)
    }

    /// Name of test database slot `id` under `hash`. The id is width-3
    /// zero-padded and stable for the slot's lifetime.
    pub fn test_database_name(&self, hash: &str, id: usize) -> String {
        format!("{}_{}_{}_{:03}", self.db_prefix, self.test_db_prefix, hash, id)
    }

    /// Connection parameters for the template database of `hash`.
    pub fn template_config(&self, hash: &str) -> DatabaseConfig {
        DatabaseConfig {
            database: self.template_database_name(hash),
            ..self.connection.clone()
        }
    }

    /// Connection parameters for test database slot `id` under `hash`,
    /// owned by the test role.
    pub fn test_config(&self, hash: &str, id: usize) -> DatabaseConfig {
        DatabaseConfig {
            username: self.test_db_owner.clone(),
            password: self.test_db_owner_password.clone(),
            database: self.test_database_name(hash, id),
            ..self.connection.clone()
        }
    }
}

/// First set key from `keys`, else `default`.
fn env_str(keys: &[&str], default: &str) -> String {
    keys.iter()
        .find_map(|k| env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

/// First set and parseable key from `keys`, else `default`. A set but
/// unparseable value is ignored with a warning rather than failing boot.
fn env_parse<T: FromStr + Copy>(keys: &[&str], default: T) -> T {
    for key in keys {
        if let Ok(raw) = env::var(key) {
            match raw.parse() {
                Ok(v) => return v,
                Err(_) => {
                    tracing::warn!(%key, value = %raw, "ignoring unparseable environment value");
                }
            }
        }
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            connection: DatabaseConfig {
                host: "127.0.0.1".to_string(),
                port: 5432,
                username: "postgres".to_string(),
                password: "".to_string(),
                database: "postgres".to_string(),
            },
            root_template: "template0".to_string(),
            db_prefix: "sqlnest".to_string(),
            template_db_prefix: "template".to_string(),
            test_db_prefix: "test".to_string(),
            test_db_owner: "tester".to_string(),
            test_db_owner_password: "tester".to_string(),
            initial_pool_size: 10,
            max_pool_size: 500,
            template_finalize_timeout: Duration::from_millis(2000),
            test_db_get_timeout: Duration::from_millis(500),
            cleaning_workers: 3,
            force_return: false,
            listen_port: 5000,
        }
    }

    #[test]
    fn template_name_derivation() {
        let config = test_config();
        assert_eq!(
            config.template_database_name("abcdef"),
            "sqlnest_template_abcdef"
        );
    }

    #[test]
    fn test_name_derivation_zero_pads() {
        let config = test_config();
        assert_eq!(config.test_database_name("abcdef", 0), "sqlnest_test_abcdef_000");
        assert_eq!(config.test_database_name("abcdef", 42), "sqlnest_test_abcdef_042");
        assert_eq!(config.test_database_name("abcdef", 1234), "sqlnest_test_abcdef_1234");
    }

    #[test]
    fn test_config_uses_test_owner() {
        let config = test_config();
        let db = config.test_config("h", 7);
        assert_eq!(db.username, "tester");
        assert_eq!(db.database, "sqlnest_test_h_007");
        assert_eq!(db.host, config.connection.host);
    }

    #[test]
    fn template_config_uses_maintenance_credentials() {
        let config = test_config();
        let db = config.template_config("h");
        assert_eq!(db.username, "postgres");
        assert_eq!(db.database, "sqlnest_template_h");
    }

    #[test]
    fn defaults_without_environment() {
        // from_env falls back to defaults for everything not set; the
        // numeric and boolean keys are exercised through their defaults.
        let config = BrokerConfig::from_env();
        assert_eq!(config.initial_pool_size, 10);
        assert_eq!(config.max_pool_size, 500);
        assert_eq!(config.cleaning_workers, 3);
        assert!(!config.force_return);
        assert_eq!(config.template_finalize_timeout, Duration::from_millis(2000));
        assert_eq!(config.test_db_get_timeout, Duration::from_millis(500));
    }
}
