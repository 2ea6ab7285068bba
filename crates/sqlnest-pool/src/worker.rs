//! Cleaning workers — background recycling of returned test databases.
//!
//! A fixed group of long-lived workers shares one bounded task queue;
//! returns enqueue `(hash, id)` and a worker drops and re-clones the
//! database, then moves the slot back to `ready`. Queue consumption is
//! serialized through a mutex over the receiver, the recycling I/O is
//! not. Failed recycles are retried with exponential backoff; after the
//! retry cap the slot is left `dirty` and reported through logging only,
//! never to the caller that returned it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::pool::{DbPool, RecycleOutcome, RecycleReceiver, RecycleTask};

/// Recycle attempts per slot before giving up on it.
const MAX_RECYCLE_ATTEMPTS: u32 = 3;

/// Backoff before retry `attempt`, doubling from 100ms and capped at 5s.
fn retry_backoff(attempt: u32) -> Duration {
    let millis = 100u64.saturating_mul(1 << attempt.min(16));
    Duration::from_millis(millis).min(Duration::from_secs(5))
}

/// Shared handle to the recycling queue.
pub(crate) type SharedTasks = Arc<Mutex<RecycleReceiver>>;

/// Run one cleaning worker until shutdown or queue closure.
pub(crate) async fn run_cleaning_worker(
    worker_id: usize,
    pool: Arc<DbPool>,
    tasks: SharedTasks,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "cleaning worker started");
    loop {
        let task = tokio::select! {
            _ = shutdown.changed() => break,
            task = async {
                let mut tasks = tasks.lock().await;
                tasks.recv().await
            } => match task {
                Some(task) => task,
                None => break,
            },
        };
        recycle(&pool, task).await;
    }
    debug!(worker_id, "cleaning worker stopped");
}

/// Recycle one slot: `dirty → recycling`, drop and re-clone off-lock,
/// then `recycling → ready` (or back to `dirty` and retry on failure).
async fn recycle(pool: &Arc<DbPool>, task: RecycleTask) {
    let Some(job) = pool.begin_recycle(&task.hash, task.id).await else {
        // Torn down, or claimed under the dirty-reuse policy.
        return;
    };

    let result = async {
        pool.driver.drop_database(&job.test_database).await?;
        pool.driver
            .create_from_template(
                &job.test_database,
                &pool.config.test_db_owner,
                &job.template_database,
            )
            .await
    }
    .await;

    let outcome = pool
        .finish_recycle(&task.hash, task.id, result.is_ok())
        .await;

    if let RecycleOutcome::PoolGone = outcome {
        // The pool was torn down while we were recycling; drop the clone
        // we just made so it does not outlive its template.
        if result.is_ok() {
            if let Err(e) = pool.driver.drop_database(&job.test_database).await {
                warn!(hash = %task.hash, id = task.id, error = %e,
                    "failed to drop orphaned test database");
            }
        }
        return;
    }

    match result {
        Ok(()) => {
            debug!(hash = %task.hash, id = task.id, "test database recycled");
        }
        Err(e) => {
            let attempt = task.attempt + 1;
            if attempt < MAX_RECYCLE_ATTEMPTS {
                debug!(hash = %task.hash, id = task.id, attempt, error = %e,
                    "recycle failed, retrying");
                tokio::time::sleep(retry_backoff(attempt)).await;
                let requeued = pool.requeue(RecycleTask {
                    hash: task.hash.clone(),
                    id: task.id,
                    attempt,
                });
                if !requeued {
                    warn!(hash = %task.hash, id = task.id,
                        "recycling queue full, slot left dirty");
                }
            } else {
                warn!(hash = %task.hash, id = task.id, error = %e,
                    "recycle failed after {MAX_RECYCLE_ATTEMPTS} attempts, slot left dirty");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(0), Duration::from_millis(100));
        assert_eq!(retry_backoff(1), Duration::from_millis(200));
        assert_eq!(retry_backoff(2), Duration::from_millis(400));
        assert_eq!(retry_backoff(10), Duration::from_secs(5));
        assert_eq!(retry_backoff(32), Duration::from_secs(5));
    }
}
