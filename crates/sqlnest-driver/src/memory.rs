//! In-memory driver for tests and local experiments.
//!
//! Keeps the set of "existing" databases in a `BTreeSet` and records every
//! drop in order. `fail_creates` poisons the next N create calls so worker
//! retry paths can be exercised deterministically.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{DriverError, DriverResult};
use crate::DatabaseDriver;

#[derive(Default)]
struct MemoryState {
    databases: BTreeSet<String>,
    drop_log: Vec<String>,
    fail_creates: usize,
}

/// Driver whose databases exist only as names in memory.
#[derive(Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all currently existing databases, sorted.
    pub fn databases(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.databases.iter().cloned().collect()
    }

    /// Every dropped database name, in drop order. `DROP IF EXISTS` on a
    /// missing database is not recorded.
    pub fn dropped(&self) -> Vec<String> {
        self.state.lock().unwrap().drop_log.clone()
    }

    /// Make the next `n` `create_from_template` calls fail.
    pub fn fail_creates(&self, n: usize) {
        self.state.lock().unwrap().fail_creates = n;
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    async fn initialize_template(&self, name: &str, _owner: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.databases.insert(name.to_string());
        Ok(())
    }

    async fn create_from_template(
        &self,
        name: &str,
        _owner: &str,
        template: &str,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(DriverError::Statement("injected create failure".to_string()));
        }
        if !state.databases.contains(template) {
            return Err(DriverError::NotFound(template.to_string()));
        }
        if !state.databases.insert(name.to_string()) {
            return Err(DriverError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.databases.remove(name) {
            state.drop_log.push(name.to_string());
        }
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> DriverResult<bool> {
        Ok(self.state.lock().unwrap().databases.contains(name))
    }
}
