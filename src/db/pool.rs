//! Fixed-size pool of persistent SQLite connections.
//!
//! Every slot is an `Arc<Mutex<PooledConnection>>`; a successful
//! `try_lock_owned` is the test-and-set of the slot's in-use flag and the
//! owned guard is the exclusive checkout. Selection among free slots is
//! first-found: waiters get no FIFO or fairness guarantee.

use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::handle::ConnectionHandle;
use crate::config::DatabaseConfig;
use crate::error::KeyturnError;

pub struct PooledConnection {
    pub(crate) conn: SqliteConnection,
    /// Set when a handle went away mid-transaction and nobody has issued the
    /// `ROLLBACK` yet. Cleared by [`PooledConnection::rollback_pending`].
    pub(crate) needs_rollback: bool,
}

impl PooledConnection {
    pub(crate) async fn rollback_pending(&mut self) {
        if !self.needs_rollback {
            return;
        }
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut self.conn).await {
            warn!(error = %e, "implicit rollback failed");
        }
        self.needs_rollback = false;
    }
}

/// State shared between the pool and every outstanding slot.
pub(crate) struct PoolShared {
    released: Notify,
    checked_out: AtomicUsize,
}

/// Exclusive hold on one slot. Dropping it frees the slot, decrements the
/// checked-out count and wakes one waiter, whoever ends up dropping it:
/// a handle, a rollback task, or a runtime discarding that task unrun.
pub(crate) struct SlotGuard {
    guard: Option<OwnedMutexGuard<PooledConnection>>,
    shared: Arc<PoolShared>,
}

impl SlotGuard {
    fn new(guard: OwnedMutexGuard<PooledConnection>, shared: Arc<PoolShared>) -> Self {
        shared.checked_out.fetch_add(1, Ordering::SeqCst);
        Self {
            guard: Some(guard),
            shared,
        }
    }
}

impl Deref for SlotGuard {
    type Target = PooledConnection;

    fn deref(&self) -> &PooledConnection {
        self.guard.as_deref().expect("slot already released")
    }
}

impl DerefMut for SlotGuard {
    fn deref_mut(&mut self) -> &mut PooledConnection {
        self.guard.as_deref_mut().expect("slot already released")
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Unlock before notifying so the woken waiter finds the slot free.
        drop(self.guard.take());
        self.shared.checked_out.fetch_sub(1, Ordering::SeqCst);
        self.shared.released.notify_one();
    }
}

pub struct ConnectionPool {
    slots: Vec<Arc<Mutex<PooledConnection>>>,
    shared: Arc<PoolShared>,
    poll_interval: Duration,
}

impl ConnectionPool {
    /// Opens all `pool_size` connections up front. Any failure fails the
    /// whole pool; callers are expected to abort startup on `Err`.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, KeyturnError> {
        if cfg.pool_size == 0 {
            return Err(KeyturnError::EmptyPool);
        }
        let opts = SqliteConnectOptions::from_str(&cfg.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(cfg.busy_timeout());

        let mut slots = Vec::with_capacity(cfg.pool_size);
        for slot in 0..cfg.pool_size {
            let conn = opts.connect().await.inspect_err(|e| {
                error!(slot, url = %cfg.url, error = %e, "failed to open database connection");
            })?;
            slots.push(Arc::new(Mutex::new(PooledConnection {
                conn,
                needs_rollback: false,
            })));
        }
        info!(url = %cfg.url, size = slots.len(), "database connection pool ready");

        Ok(Self {
            slots,
            shared: Arc::new(PoolShared {
                released: Notify::new(),
                checked_out: AtomicUsize::new(0),
            }),
            poll_interval: cfg.acquire_poll(),
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots not currently checked out.
    pub fn idle(&self) -> usize {
        self.size()
            .saturating_sub(self.shared.checked_out.load(Ordering::SeqCst))
    }

    /// Non-blocking checkout. `None` when no slot can be handed out without
    /// waiting: every slot is checked out, or the unlocked ones still owe the
    /// `ROLLBACK` of a handle dropped outside the runtime. Only
    /// [`acquire`](Self::acquire) runs that rollback.
    pub fn try_acquire(&self) -> Option<ConnectionHandle> {
        self.slots.iter().find_map(|slot| {
            let guard = slot.clone().try_lock_owned().ok()?;
            (!guard.needs_rollback)
                .then(|| ConnectionHandle::new(SlotGuard::new(guard, self.shared.clone())))
        })
    }

    /// Waits until a slot frees up. Between scans the caller sleeps on the
    /// release notification, bounded by the configured poll interval so a
    /// missed wakeup costs at most one interval.
    pub async fn acquire(&self) -> ConnectionHandle {
        loop {
            for slot in &self.slots {
                let Ok(mut guard) = slot.clone().try_lock_owned() else {
                    continue;
                };
                guard.rollback_pending().await;
                return ConnectionHandle::new(SlotGuard::new(guard, self.shared.clone()));
            }
            debug!(size = self.size(), "all connections busy; waiting for a release");
            let _ = tokio::time::timeout(self.poll_interval, self.shared.released.notified()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{temp_config, temp_pool};

    #[tokio::test]
    async fn at_most_n_handles_are_out() {
        let (_dir, pool) = temp_pool(2).await;
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle(), 2);

        let a = pool.try_acquire().expect("first slot");
        let b = pool.try_acquire().expect("second slot");
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.idle(), 0);

        drop(a);
        assert_eq!(pool.idle(), 1);
        let c = pool.try_acquire().expect("slot freed by drop");
        drop((b, c));
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn acquire_blocks_until_a_release() {
        let (_dir, pool) = temp_pool(1).await;
        let pool = Arc::new(pool);
        let held = pool.acquire().await;

        let p = pool.clone();
        let waiter = tokio::spawn(async move {
            let _h = p.acquire().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter was never serviced")
            .expect("waiter panicked");
    }

    #[tokio::test]
    async fn concurrent_holders_never_exceed_pool_size() {
        let (_dir, pool) = temp_pool(3).await;
        let pool = Arc::new(pool);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let (pool, active, peak) = (pool.clone(), active.clone(), peak.clone());
                tokio::spawn(async move {
                    let _h = pool.acquire().await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for t in tasks {
            tokio::time::timeout(Duration::from_secs(10), t)
                .await
                .expect("request starved")
                .expect("task panicked");
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.idle(), 3);
    }

    #[tokio::test]
    async fn open_transaction_is_rolled_back_on_drop() {
        let (_dir, pool) = temp_pool(1).await;
        let mut h = pool.acquire().await;
        h.execute("CREATE TABLE t (v INTEGER)").await.unwrap();
        h.begin().await.unwrap();
        h.execute("INSERT INTO t (v) VALUES (1)").await.unwrap();
        assert!(h.in_transaction());
        drop(h);

        let mut h = pool.acquire().await;
        assert!(!h.in_transaction());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *h)
            .await
            .unwrap();
        assert_eq!(count, 0);
        // Would fail with "cannot start a transaction within a transaction".
        h.begin().await.unwrap();
        h.commit().await.unwrap();
    }

    #[tokio::test]
    async fn deferred_rollback_runs_on_next_acquire() {
        let (_dir, pool) = temp_pool(1).await;
        let mut h = pool.acquire().await;
        h.execute("CREATE TABLE t (v INTEGER)").await.unwrap();
        h.begin().await.unwrap();
        h.execute("INSERT INTO t (v) VALUES (1)").await.unwrap();
        // No tokio runtime on a plain thread, so the drop cannot schedule the rollback.
        std::thread::spawn(move || drop(h)).join().unwrap();

        assert_eq!(pool.idle(), 1);
        assert!(pool.try_acquire().is_none());
        let mut h = pool.acquire().await;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *h)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn try_acquire_skips_slots_owing_a_rollback() {
        let (_dir, pool) = temp_pool(2).await;
        let mut dirty = pool.acquire().await;
        dirty.begin().await.unwrap();
        std::thread::spawn(move || drop(dirty)).join().unwrap();
        assert_eq!(pool.idle(), 2);

        let clean = pool.try_acquire().expect("clean slot is still free");
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.idle(), 1);
        drop(clean);

        // First free slot is the dirty one; `acquire` rolls it back before use.
        let mut h = pool.acquire().await;
        h.begin().await.unwrap();
        h.commit().await.unwrap();
    }

    #[test]
    fn slot_is_released_when_rollback_task_never_runs() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (_dir, pool) = rt.block_on(temp_pool(1));
        let h = rt.block_on(async {
            let mut h = pool.acquire().await;
            h.execute("CREATE TABLE t (v INTEGER)").await.unwrap();
            h.begin().await.unwrap();
            h.execute("INSERT INTO t (v) VALUES (1)").await.unwrap();
            h
        });
        {
            // Queues the rollback task on a runtime that is never polled again.
            let _entered = rt.enter();
            drop(h);
        }
        assert_eq!(pool.idle(), 0);
        drop(rt);
        assert_eq!(pool.idle(), 1);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            assert!(pool.try_acquire().is_none());
            let mut h = pool.acquire().await;
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
                .fetch_one(&mut *h)
                .await
                .unwrap();
            assert_eq!(count, 0);
        });
    }

    #[tokio::test]
    async fn zero_sized_pool_is_rejected() {
        let (_dir, mut cfg) = temp_config();
        cfg.pool_size = 0;
        assert!(matches!(
            ConnectionPool::connect(&cfg).await,
            Err(KeyturnError::EmptyPool)
        ));
    }

    #[tokio::test]
    async fn unreachable_database_fails_construction() {
        let (_dir, mut cfg) = temp_config();
        cfg.url = "sqlite:/nonexistent-keyturn-dir/sub/db.sqlite".to_string();
        assert!(matches!(
            ConnectionPool::connect(&cfg).await,
            Err(KeyturnError::DatabaseError(_))
        ));
    }
}
