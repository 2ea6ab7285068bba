//! Manager — orchestrates templates, pools, and workers.
//!
//! The manager owns the [`TemplateRegistry`] and the [`DbPool`] and
//! sequences every cross-component state change: provision template →
//! finalize → pre-warm → hand out → return → discard. It also owns the
//! cleaning-worker group and tears everything down on shutdown.

use std::sync::Arc;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nest_core::{BrokerConfig, TestDatabase};
use sqlnest_driver::DatabaseDriver;

use crate::error::{ManagerError, ManagerResult, PoolError, TemplateError};
use crate::pool::{DbPool, PoolStats};
use crate::registry::{Template, TemplateRegistry};
use crate::worker;

pub struct Manager {
    config: Arc<BrokerConfig>,
    driver: Arc<dyn DatabaseDriver>,
    templates: TemplateRegistry,
    pool: Arc<DbPool>,
    shutdown_tx: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    /// Build the manager and start the cleaning-worker group.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: BrokerConfig, driver: Arc<dyn DatabaseDriver>) -> Arc<Self> {
        let config = Arc::new(config);
        let (pool, recycle_rx) = DbPool::new(config.clone(), driver.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks: worker::SharedTasks = Arc::new(AsyncMutex::new(recycle_rx));
        let mut workers = Vec::with_capacity(config.cleaning_workers);
        for worker_id in 0..config.cleaning_workers {
            workers.push(tokio::spawn(worker::run_cleaning_worker(
                worker_id,
                pool.clone(),
                tasks.clone(),
                shutdown_rx.clone(),
            )));
        }
        info!(workers = config.cleaning_workers, "cleaning workers started");

        Arc::new(Self {
            config,
            driver,
            templates: TemplateRegistry::new(),
            pool,
            shutdown_tx,
            workers: std::sync::Mutex::new(workers),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Register `hash` and provision its template database.
    ///
    /// Callers that get `TemplateAlreadyInitialized` skip their schema
    /// setup and wait for the first initializer to finalize. A driver
    /// failure discards the registration so the hash can be retried.
    pub async fn initialize_template(&self, hash: &str) -> ManagerResult<Template> {
        let (template, already_exists) = self
            .templates
            .initialize(hash, self.config.template_config(hash));
        if already_exists {
            return Err(ManagerError::TemplateAlreadyInitialized);
        }

        let name = self.config.template_database_name(hash);
        match self
            .driver
            .initialize_template(&name, &self.config.test_db_owner)
            .await
        {
            Ok(()) => {
                info!(%hash, database = %name, "template database initialized");
                Ok(template)
            }
            Err(e) => {
                // Roll the registration back; the hash may be re-registered.
                if let Err(discard_err) = self.templates.discard(hash) {
                    warn!(%hash, error = %discard_err, "failed to roll back template registration");
                }
                Err(ManagerError::Driver(e))
            }
        }
    }

    /// Mark `hash` finalized, wake its waiters, and pre-warm the pool in
    /// the background up to the configured initial size.
    pub async fn finalize_template(&self, hash: &str) -> ManagerResult<()> {
        let template = self.templates.get(hash).ok_or(TemplateError::NotFound)?;

        // The hash pool must exist before waiters wake, or a consumer
        // blocked on the finalize broadcast could race ahead of it.
        self.pool.initialize(&template).await;
        if let Err(e) = self.templates.finalize(hash) {
            // Discarded while we were setting up; drop the pool again.
            let _ = self.pool.remove_all_with_hash(hash).await;
            return Err(e.into());
        }

        let pool = self.pool.clone();
        let initial = self.config.initial_pool_size;
        let hash = hash.to_string();

        info!(%hash, "template finalized");

        tokio::spawn(async move {
            match pool.warm_up(&hash, initial).await {
                Ok(warmed) => debug!(%hash, warmed, "pool pre-warmed"),
                // Failures are not fatal; consumers can still extend the
                // pool on demand.
                Err(e) => warn!(%hash, error = %e, "pre-warming stopped early"),
            }
        });

        Ok(())
    }

    /// Discard `hash` and tear down its pool.
    pub async fn discard_template(&self, hash: &str) -> ManagerResult<()> {
        self.templates.discard(hash)?;
        match self.pool.remove_all_with_hash(hash).await {
            // Discarded before finalize: no pool was ever created.
            Ok(()) | Err(PoolError::UnknownHash) => {}
            Err(e) => return Err(e.into()),
        }

        // The template database itself goes last, once no clone refers
        // to it.
        self.driver
            .drop_database(&self.config.template_database_name(hash))
            .await?;
        info!(%hash, "template discarded");
        Ok(())
    }

    /// Hand out a test database for `hash`, waiting for the template to
    /// finalize first if it is still initializing.
    ///
    /// The flag reports whether the database is dirty, in which case the
    /// caller is responsible for re-initializing its content.
    pub async fn get_test_database(&self, hash: &str) -> ManagerResult<(TestDatabase, bool)> {
        self.templates
            .wait_until_finalized(hash, self.config.template_finalize_timeout)
            .await?;
        let (db, is_dirty) = self
            .pool
            .get(hash, self.config.test_db_get_timeout)
            .await?;
        debug!(%hash, id = db.id, is_dirty, "test database handed out");
        Ok((db, is_dirty))
    }

    /// Return a test database so it can be recycled.
    pub async fn return_test_database(&self, hash: &str, id: usize) -> ManagerResult<()> {
        self.pool.return_db(hash, id).await?;
        debug!(%hash, id, "test database returned");
        Ok(())
    }

    /// Slot counters per hash.
    pub async fn pool_stats(&self) -> Vec<PoolStats> {
        self.pool.stats().await
    }

    /// Stop the workers and drop every managed database.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain(..).collect()
        };
        for handle in workers {
            let _ = handle.await;
        }

        if let Err(e) = self.pool.remove_all().await {
            warn!(error = %e, "failed to drain pools during shutdown");
        }
        info!("manager stopped");
    }
}
