//! Per-template test-database pool.
//!
//! [`DbPool`] maps each finalized template hash to a [`HashPool`] holding
//! the slice of test-database slots and four disjoint id sets: `ready`,
//! `in_use`, `dirty`, `recycling`. The sets partition the slot space at
//! all times.
//!
//! Locking protocol: the registry lock guards only the hash → pool map
//! and is released before any per-slot work; each `HashPool` has its own
//! lock. Per-hash work therefore never serializes across unrelated
//! hashes. The per-hash lock is held across slot initialization (so a
//! failed extension cannot consume an id) and across teardown, but never
//! across the recycling I/O performed by the cleaning workers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, warn};

use nest_core::{BrokerConfig, Database, TestDatabase};
use sqlnest_driver::DatabaseDriver;

use crate::error::{PoolError, PoolResult};
use crate::registry::Template;

/// A dirty slot queued for background recycling.
#[derive(Debug, Clone)]
pub(crate) struct RecycleTask {
    pub hash: String,
    pub id: usize,
    pub attempt: u32,
}

/// Receiving end of the recycling queue, shared by the worker group.
pub(crate) type RecycleReceiver = mpsc::Receiver<RecycleTask>;

#[derive(Default)]
struct HashPoolInner {
    /// Slots ordered by id; a slot's id equals its position here.
    dbs: Vec<TestDatabase>,
    ready: BTreeSet<usize>,
    in_use: BTreeSet<usize>,
    dirty: BTreeSet<usize>,
    recycling: BTreeSet<usize>,
    /// Set on teardown; operations racing with teardown observe it and
    /// report the hash as unknown.
    closed: bool,
}

impl HashPoolInner {
    fn clear_slot(&mut self, id: usize) {
        self.ready.remove(&id);
        self.in_use.remove(&id);
        self.dirty.remove(&id);
        self.recycling.remove(&id);
    }
}

/// Pool of test-database slots for a single template hash.
struct HashPool {
    /// The template these slots are cloned from.
    template: Database,
    inner: Mutex<HashPoolInner>,
    /// Signalled when a slot becomes claimable; blocked `get` calls wait
    /// here.
    available: Notify,
}

impl HashPool {
    fn new(template: Database) -> Self {
        Self {
            template,
            inner: Mutex::new(HashPoolInner::default()),
            available: Notify::new(),
        }
    }
}

/// Slot counters for one hash, used by the stats surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub template_hash: String,
    pub total: usize,
    pub ready: usize,
    pub in_use: usize,
    pub dirty: usize,
    pub recycling: usize,
}

/// Snapshot handed to a cleaning worker when a slot enters `recycling`.
pub(crate) struct RecycleJob {
    pub test_database: String,
    pub template_database: String,
}

/// Outcome of completing a recycle, as seen by the pool.
pub(crate) enum RecycleOutcome {
    /// Slot state was updated.
    Completed,
    /// The pool was torn down while the worker was off recycling; the
    /// worker owns cleanup of anything it created.
    PoolGone,
}

/// The top-level pool: template hash → [`HashPool`].
pub struct DbPool {
    pools: Mutex<HashMap<String, Arc<HashPool>>>,
    pub(crate) config: Arc<BrokerConfig>,
    pub(crate) driver: Arc<dyn DatabaseDriver>,
    recycle_tx: mpsc::Sender<RecycleTask>,
}

impl DbPool {
    /// Build the pool and hand back the recycling queue consumed by the
    /// cleaning workers.
    pub(crate) fn new(
        config: Arc<BrokerConfig>,
        driver: Arc<dyn DatabaseDriver>,
    ) -> (Arc<Self>, RecycleReceiver) {
        let (recycle_tx, recycle_rx) = mpsc::channel(config.max_pool_size.max(1));
        let pool = Arc::new(Self {
            pools: Mutex::new(HashMap::new()),
            config,
            driver,
            recycle_tx,
        });
        (pool, recycle_rx)
    }

    /// Create an empty hash pool for `template` if none exists.
    ///
    /// Waiter structures are created fresh here, so a hash re-registered
    /// after a discard never observes stale wakeups.
    pub async fn initialize(&self, template: &Template) {
        let mut pools = self.pools.lock().await;
        pools
            .entry(template.hash.clone())
            .or_insert_with(|| {
                Arc::new(HashPool::new(Database {
                    template_hash: template.hash.clone(),
                    config: template.config.clone(),
                }))
            });
    }

    /// Hand out a test database for `hash`.
    ///
    /// Preference order: a `ready` slot, then extending the pool by one
    /// slot, then (unless force-return is set) reusing a `dirty` slot with
    /// `is_dirty = true`, then blocking until a slot becomes claimable.
    /// Returns `PoolFull` when nothing became claimable within `timeout`.
    pub async fn get(&self, hash: &str, timeout: Duration) -> PoolResult<(TestDatabase, bool)> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let pool = self.lookup(hash).await?;

            // Register interest before inspecting state so a wakeup
            // between the check and the wait is not lost.
            let notified = pool.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = pool.inner.lock().await;
                match self.claim_locked(&pool, &mut inner).await {
                    Ok(claimed) => return Ok(claimed),
                    // Nothing claimable right now; fall through to wait.
                    Err(PoolError::NoDbReady) => {}
                    Err(e) => return Err(e),
                }
            }

            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                return Err(PoolError::PoolFull);
            }
        }
    }

    /// One claim attempt under the per-hash lock, in preference order.
    /// `NoDbReady` means the caller should wait and retry.
    async fn claim_locked(
        &self,
        pool: &HashPool,
        inner: &mut HashPoolInner,
    ) -> PoolResult<(TestDatabase, bool)> {
        if inner.closed {
            return Err(PoolError::UnknownHash);
        }

        // Lowest eligible id; callers must not rely on which one.
        if let Some(&id) = inner.ready.iter().next() {
            inner.ready.remove(&id);
            inner.in_use.insert(id);
            return Ok((inner.dbs[id].clone(), false));
        }

        if inner.dbs.len() < self.config.max_pool_size {
            let db = self.extend_locked(pool, inner).await?;
            inner.in_use.insert(db.id);
            return Ok((db, false));
        }

        if !self.config.force_return {
            if let Some(&id) = inner.dirty.iter().next() {
                inner.dirty.remove(&id);
                inner.in_use.insert(id);
                return Ok((inner.dbs[id].clone(), true));
            }
        }

        Err(PoolError::NoDbReady)
    }

    /// Extend the pool for `hash` by one `ready` slot.
    ///
    /// Used to seed the pool at finalize time. Fails with `PoolFull` at
    /// the capacity ceiling.
    pub async fn add(&self, hash: &str) -> PoolResult<TestDatabase> {
        let pool = self.lookup(hash).await?;
        let mut inner = pool.inner.lock().await;
        if inner.closed {
            return Err(PoolError::UnknownHash);
        }
        if inner.dbs.len() >= self.config.max_pool_size {
            return Err(PoolError::PoolFull);
        }

        let db = self.extend_locked(&pool, &mut inner).await?;
        inner.ready.insert(db.id);
        pool.available.notify_one();
        Ok(db)
    }

    /// Extend the pool for `hash` until it holds `target` slots, all new
    /// ones `ready`. Returns how many slots were added; calling again at
    /// or above the target adds none. The per-hash lock is re-acquired
    /// per slot so concurrent getters are not starved while warming.
    pub async fn warm_up(&self, hash: &str, target: usize) -> PoolResult<usize> {
        let target = target.min(self.config.max_pool_size);
        let mut warmed = 0;
        loop {
            let pool = self.lookup(hash).await?;
            let mut inner = pool.inner.lock().await;
            if inner.closed {
                return Err(PoolError::UnknownHash);
            }
            if inner.dbs.len() >= target {
                return Ok(warmed);
            }
            let db = self.extend_locked(&pool, &mut inner).await?;
            inner.ready.insert(db.id);
            pool.available.notify_one();
            warmed += 1;
        }
    }

    /// Return a checked-out test database.
    ///
    /// The slot must be `in_use`: a double return (or a return of an id
    /// that was never handed out) yields `UnknownId`. On success the slot
    /// moves to `dirty`, a recycling task is queued, and one waiter wakes.
    pub async fn return_db(&self, hash: &str, id: usize) -> PoolResult<()> {
        let pool = {
            let pools = self.pools.lock().await;
            // Index bound is checked against the capacity ceiling while
            // the registry lock is held.
            if id >= self.config.max_pool_size {
                return Err(PoolError::InvalidIndex);
            }
            pools.get(hash).cloned().ok_or(PoolError::UnknownHash)?
        };

        {
            let mut inner = pool.inner.lock().await;
            if inner.closed {
                return Err(PoolError::UnknownHash);
            }
            if !inner.in_use.remove(&id) {
                return Err(PoolError::UnknownId);
            }
            inner.dirty.insert(id);
        }

        // Queue outside the lock. A full queue is not fatal: the slot
        // stays dirty and remains claimable under the reuse policy.
        let task = RecycleTask {
            hash: hash.to_string(),
            id,
            attempt: 0,
        };
        if self.recycle_tx.try_send(task).is_err() {
            warn!(%hash, id, "recycling queue unavailable, slot left dirty");
        }
        pool.available.notify_one();
        Ok(())
    }

    /// Tear down the pool for `hash`, dropping every slot's database from
    /// highest id to lowest. On a driver error the already-removed suffix
    /// stays removed and the call may be retried; the map entry is deleted
    /// only after every slot is gone.
    pub async fn remove_all_with_hash(&self, hash: &str) -> PoolResult<()> {
        let pool = self.lookup(hash).await?;

        {
            let mut inner = pool.inner.lock().await;
            while let Some(db) = inner.dbs.last().cloned() {
                self.driver
                    .drop_database(&db.database.config.database)
                    .await?;
                inner.dbs.pop();
                inner.clear_slot(db.id);
            }
            inner.closed = true;
            pool.available.notify_waiters();
        }

        let mut pools = self.pools.lock().await;
        pools.remove(hash);
        debug!(%hash, "hash pool removed");
        Ok(())
    }

    /// Tear down every hash pool. Stops at the first driver error,
    /// leaving the remaining pools intact for a retry.
    pub async fn remove_all(&self) -> PoolResult<()> {
        let hashes: Vec<String> = {
            let pools = self.pools.lock().await;
            pools.keys().cloned().collect()
        };

        for hash in hashes {
            match self.remove_all_with_hash(&hash).await {
                // Discarded concurrently; nothing left to do.
                Ok(()) | Err(PoolError::UnknownHash) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Slot counters per hash, sorted by hash.
    pub async fn stats(&self) -> Vec<PoolStats> {
        let pools: Vec<(String, Arc<HashPool>)> = {
            let pools = self.pools.lock().await;
            pools
                .iter()
                .map(|(hash, pool)| (hash.clone(), pool.clone()))
                .collect()
        };

        let mut stats = Vec::with_capacity(pools.len());
        for (hash, pool) in pools {
            let inner = pool.inner.lock().await;
            stats.push(PoolStats {
                template_hash: hash,
                total: inner.dbs.len(),
                ready: inner.ready.len(),
                in_use: inner.in_use.len(),
                dirty: inner.dirty.len(),
                recycling: inner.recycling.len(),
            });
        }
        stats.sort_by(|a, b| a.template_hash.cmp(&b.template_hash));
        stats
    }

    // ── Recycling (called by cleaning workers) ─────────────────────

    /// Move `dirty → recycling` and snapshot what the worker needs.
    ///
    /// Returns `None` when there is nothing to do: the hash was torn
    /// down, or the slot was claimed under the dirty-reuse policy before
    /// the worker got to it.
    pub(crate) async fn begin_recycle(&self, hash: &str, id: usize) -> Option<RecycleJob> {
        let pool = {
            let pools = self.pools.lock().await;
            pools.get(hash).cloned()?
        };

        let mut inner = pool.inner.lock().await;
        if inner.closed || !inner.dirty.remove(&id) {
            return None;
        }
        inner.recycling.insert(id);
        Some(RecycleJob {
            test_database: inner.dbs[id].database.config.database.clone(),
            template_database: pool.template.config.database.clone(),
        })
    }

    /// Complete a recycle: `recycling → ready` on success (waking one
    /// waiter), `recycling → dirty` on failure.
    pub(crate) async fn finish_recycle(
        &self,
        hash: &str,
        id: usize,
        success: bool,
    ) -> RecycleOutcome {
        let pool = {
            let pools = self.pools.lock().await;
            match pools.get(hash).cloned() {
                Some(pool) => pool,
                None => return RecycleOutcome::PoolGone,
            }
        };

        let mut inner = pool.inner.lock().await;
        if inner.closed || !inner.recycling.remove(&id) {
            return RecycleOutcome::PoolGone;
        }

        if success {
            inner.ready.insert(id);
            pool.available.notify_one();
        } else {
            inner.dirty.insert(id);
            if !self.config.force_return {
                // Still claimable under the reuse policy.
                pool.available.notify_one();
            }
        }
        RecycleOutcome::Completed
    }

    /// Re-queue a failed recycle attempt. Returns false when the queue is
    /// full and the slot is left dirty.
    pub(crate) fn requeue(&self, task: RecycleTask) -> bool {
        self.recycle_tx.try_send(task).is_ok()
    }

    // ── Internal helpers ───────────────────────────────────────────

    async fn lookup(&self, hash: &str) -> PoolResult<Arc<HashPool>> {
        let pools = self.pools.lock().await;
        pools.get(hash).cloned().ok_or(PoolError::UnknownHash)
    }

    /// Allocate the next slot id and clone its database from the
    /// template. Runs under the per-hash lock: the id is consumed only if
    /// the clone succeeds, and no concurrent call can claim the same id.
    async fn extend_locked(
        &self,
        pool: &HashPool,
        inner: &mut HashPoolInner,
    ) -> PoolResult<TestDatabase> {
        let hash = &pool.template.template_hash;
        let id = inner.dbs.len();
        let db = TestDatabase {
            id,
            database: Database {
                template_hash: hash.clone(),
                config: self.config.test_config(hash, id),
            },
        };

        self.driver
            .create_from_template(
                &db.database.config.database,
                &self.config.test_db_owner,
                &pool.template.config.database,
            )
            .await?;

        inner.dbs.push(db.clone());
        debug!(%hash, id, database = %db.database.config.database, "pool extended");
        Ok(db)
    }
}
