//! # Distributed Lock
//!
//! Named mutual exclusion across coordinator replicas, backed by PostgreSQL
//! session-level advisory locks.
//!
//! The lock lives on one pooled connection that is checked out for as long
//! as the lock is held. A holder that crashes closes its session and the
//! server frees the lock with it. Dropping a held [`DistributedLock`] does the
//! same: the connection is detached from the pool and closed.

use crate::config::LockConfig;
use crate::constants::lock::DEFAULT_POLL_INTERVAL;
use crate::error::{ColoniesError, ColoniesResult};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

/// Stable 64-bit advisory lock key for a lock name (FNV-1a)
pub fn lock_key(name: &str) -> i64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = name.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    });
    i64::from_ne_bytes(hash.to_ne_bytes())
}

pub struct DistributedLock {
    pool: PgPool,
    name: String,
    key: i64,
    poll_interval: Duration,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl DistributedLock {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            pool,
            key: lock_key(&name),
            name,
            poll_interval: DEFAULT_POLL_INTERVAL,
            held: Mutex::new(None),
        }
    }

    /// Lock named and paced by configuration
    pub fn from_config(pool: PgPool, config: &LockConfig) -> Self {
        Self::new(pool, config.name.clone()).with_poll_interval(config.poll_interval())
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub async fn is_held(&self) -> bool {
        self.held.lock().await.is_some()
    }

    /// Block until the lock is acquired or `timeout` elapses.
    ///
    /// Not reentrant: acquiring a lock this instance already holds is a
    /// conflict.
    #[instrument(skip(self), fields(lock = %self.name))]
    pub async fn acquire(&self, timeout: Duration) -> ColoniesResult<()> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Err(ColoniesError::Conflict(format!(
                "lock {} is already held by this instance",
                self.name
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let deadline = Instant::now() + timeout;

        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(self.key)
                .fetch_one(&mut *conn)
                .await?;

            if acquired {
                *held = Some(conn);
                debug!(key = self.key, "Advisory lock acquired");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ColoniesError::Timeout {
                    operation: format!("acquire lock {}", self.name),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Release the lock and return its connection to the pool
    #[instrument(skip(self), fields(lock = %self.name))]
    pub async fn release(&self) -> ColoniesResult<()> {
        let mut held = self.held.lock().await;
        let Some(mut conn) = held.take() else {
            return Err(ColoniesError::LockNotHeld(self.name.clone()));
        };

        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match released {
            Ok(true) => {
                info!("Advisory lock released");
                Ok(())
            }
            Ok(false) => {
                warn!(key = self.key, "Advisory lock was not held by the session");
                close_session(conn).await;
                Err(ColoniesError::LockNotHeld(self.name.clone()))
            }
            Err(err) => {
                warn!(key = self.key, error = %err, "Advisory unlock failed, closing the session");
                close_session(conn).await;
                Err(err.into())
            }
        }
    }
}

/// Close a session that may still hold the lock so the server frees it
async fn close_session(conn: PoolConnection<Postgres>) {
    if let Err(err) = conn.detach().close().await {
        debug!(error = %err, "Closing lock session failed, dropping it");
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if let Some(conn) = self.held.get_mut().take() {
            // Closing the session frees the advisory lock server-side
            drop(conn.detach());
        }
    }
}
