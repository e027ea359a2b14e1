use std::ops::{Deref, DerefMut};

use sqlx::sqlite::SqliteConnection;
use tokio::runtime::Handle;
use tracing::warn;

use super::pool::SlotGuard;

/// Exclusive checkout of one pooled connection.
///
/// Move-only. Dropping it on any path (normal return, early `?`, panic
/// unwind) rolls back a transaction left open through [`begin`](Self::begin)
/// and only then frees the slot and wakes one waiter.
///
/// Derefs to [`SqliteConnection`], so `&mut *handle` is an sqlx executor.
pub struct ConnectionHandle {
    slot: Option<SlotGuard>,
    in_transaction: bool,
}

impl ConnectionHandle {
    pub(crate) fn new(slot: SlotGuard) -> Self {
        Self {
            slot: Some(slot),
            in_transaction: false,
        }
    }

    fn connection(&mut self) -> &mut SqliteConnection {
        &mut self
            .slot
            .as_mut()
            .expect("connection handle used after release")
            .conn
    }

    /// Runs a command-only statement and returns the affected row count.
    pub async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let done = sqlx::query(sql).execute(self.connection()).await?;
        Ok(done.rows_affected())
    }

    pub async fn begin(&mut self) -> Result<(), sqlx::Error> {
        self.execute("BEGIN IMMEDIATE").await?;
        self.in_transaction = true;
        Ok(())
    }

    /// On failure the transaction is still considered open and will be
    /// rolled back later.
    pub async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.in_transaction = false;
        self.execute("ROLLBACK").await.map(|_| ())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Deref for ConnectionHandle {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self
            .slot
            .as_ref()
            .expect("connection handle used after release")
            .conn
    }
}

impl DerefMut for ConnectionHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };
        if !self.in_transaction {
            return;
        }
        // Stays set if the rollback task never gets to run.
        slot.needs_rollback = true;
        match Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    slot.rollback_pending().await;
                });
            }
            Err(_) => {
                warn!("handle dropped outside the runtime; rollback deferred to next checkout");
            }
        }
    }
}
