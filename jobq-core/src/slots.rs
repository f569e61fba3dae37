//! The cluster-global parallelism semaphore.
//!
//! Each of the `1..=max_parallel_jobs` slots is a session-level Postgres
//! advisory lock keyed by `(SLOT_LOCK_NAMESPACE, slot_id)`. Session locks die
//! with the session, so a crashed worker frees its slot as soon as its
//! connection is gone.

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::warn;

use crate::error::QueueError;

/// Fixed advisory-lock namespace shared by every process on the cluster.
pub const SLOT_LOCK_NAMESPACE: i32 = 0x6A6F_6271; // "jobq"

/// A held parallelism slot, bound to the dedicated connection whose session
/// owns the advisory lock. The slot id travels with the claimed job so the
/// runner releases exactly the slot it holds.
pub struct SlotGuard {
    conn: PoolConnection<Postgres>,
    namespace: i32,
    slot_id: i32,
    released: bool,
}

impl SlotGuard {
    /// Try each slot in ascending order with a non-blocking lock attempt and
    /// hold the first one that succeeds. Returns `None` when every slot is
    /// busy.
    pub async fn acquire(
        pool: &PgPool,
        namespace: i32,
        max_parallel_jobs: i32,
    ) -> Result<Option<Self>, QueueError> {
        let mut conn = pool.acquire().await?;

        for slot_id in 1..=max_parallel_jobs {
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, $2)")
                .bind(namespace)
                .bind(slot_id)
                .fetch_one(&mut *conn)
                .await?;

            if locked {
                return Ok(Some(Self {
                    conn,
                    namespace,
                    slot_id,
                    released: false,
                }));
            }
        }

        Ok(None)
    }

    pub fn slot_id(&self) -> i32 {
        self.slot_id
    }

    /// The connection whose session holds the slot. The claim and runner
    /// transactions run on it, so `pg_backend_pid()` recorded at claim time
    /// names a session that lives exactly as long as the slot is held.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Release the slot. Consuming `self` makes a double release
    /// unrepresentable; not calling this leaks the slot until the pooled
    /// session closes.
    pub async fn release(mut self) {
        self.released = true;
        let unlocked: Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock($1, $2)")
                .bind(self.namespace)
                .bind(self.slot_id)
                .fetch_one(&mut *self.conn)
                .await;

        match unlocked {
            Ok(true) => {}
            Ok(false) => warn!(
                slot_id = self.slot_id,
                "released a slot this session did not hold"
            ),
            Err(error) => warn!(
                slot_id = self.slot_id,
                %error,
                "failed to release slot lock; it will free when the session closes"
            ),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                slot_id = self.slot_id,
                "slot guard dropped without release; slot stays held until its pooled session closes"
            );
        }
    }
}
