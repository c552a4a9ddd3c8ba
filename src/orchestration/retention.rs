//! # Retention Sweeper
//!
//! Age and state based reclamation of terminal-successful data.
//!
//! A sweep computes `cutoff = now - period` and deletes, in order:
//!
//! 1. attributes whose mirrored state is SUCCESS, added before the cutoff
//! 2. logs added before the cutoff
//! 3. SUCCESS processes submitted before the cutoff
//! 4. SUCCESS process graphs submitted before the cutoff, with their members
//!
//! The steps are independent statements. Every one is idempotent, so a sweep
//! interrupted halfway is completed by simply running it again. FAILED,
//! RUNNING and WAITING data is never touched.

use crate::config::RetentionConfig;
use crate::constants::lock::RETENTION_LOCK_NAME;
use crate::database::server_now;
use crate::error::{ColoniesError, ColoniesResult};
use crate::logging::log_retention_sweep;
use crate::models::{Attribute, Process, ProcessGraph, ProcessLog};
use crate::orchestration::distributed_lock::DistributedLock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Rows removed per sweep step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub attributes: u64,
    pub logs: u64,
    pub processes: u64,
    pub process_graphs: u64,
    /// Member processes removed together with their graphs
    pub graph_processes: u64,
}

impl RetentionReport {
    pub fn total(&self) -> u64 {
        self.attributes + self.logs + self.processes + self.process_graphs + self.graph_processes
    }
}

#[derive(Debug)]
pub struct RetentionSweeper {
    pool: PgPool,
    lock: DistributedLock,
    lock_timeout: Duration,
}

impl RetentionSweeper {
    pub fn new(pool: PgPool) -> Self {
        Self::from_config(pool, &RetentionConfig::default())
    }

    pub fn from_config(pool: PgPool, config: &RetentionConfig) -> Self {
        let lock = DistributedLock::new(pool.clone(), RETENTION_LOCK_NAME)
            .with_poll_interval(Duration::from_millis(config.lock_poll_interval_ms));
        Self {
            pool,
            lock,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        }
    }

    pub fn cutoff(period_seconds: i64, now: DateTime<Utc>) -> ColoniesResult<DateTime<Utc>> {
        if period_seconds < 0 {
            return Err(ColoniesError::Validation(format!(
                "retention period must not be negative, got {period_seconds}"
            )));
        }
        ChronoDuration::try_seconds(period_seconds)
            .and_then(|period| now.checked_sub_signed(period))
            .ok_or_else(|| {
                ColoniesError::Validation(format!("retention period {period_seconds}s is out of range"))
            })
    }

    /// Run one sweep with the given retention period
    #[instrument(skip(self))]
    pub async fn apply(&self, period_seconds: i64) -> ColoniesResult<RetentionReport> {
        let cutoff = Self::cutoff(period_seconds, server_now(&self.pool).await?)?;
        debug!(%cutoff, "Starting retention sweep");

        let attributes = Attribute::delete_successful_older_than(&self.pool, cutoff).await?;
        let logs = ProcessLog::delete_older_than(&self.pool, cutoff).await?;
        let processes = Process::delete_successful_older_than(&self.pool, cutoff).await?;
        let graphs = ProcessGraph::delete_successful_older_than(&self.pool, cutoff).await?;

        let report = RetentionReport {
            attributes,
            logs,
            processes,
            process_graphs: graphs.graphs,
            graph_processes: graphs.processes,
        };
        log_retention_sweep(period_seconds, &report);
        Ok(report)
    }

    /// Sweep under the retention lock; `None` when another replica holds it
    pub async fn apply_exclusive(&self, period_seconds: i64) -> ColoniesResult<Option<RetentionReport>> {
        match self.lock.acquire(self.lock_timeout).await {
            Ok(()) => {}
            Err(err) if err.is_timeout() => {
                debug!("Retention lock busy, another replica is sweeping");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let result = self.apply(period_seconds).await;
        self.lock.release().await?;
        result.map(Some)
    }

    /// Sweep every `interval` until `shutdown` flips to true
    pub async fn run_periodically(
        &self,
        interval: Duration,
        period_seconds: i64,
        mut shutdown: watch::Receiver<bool>,
    ) -> ColoniesResult<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), period_seconds, "Retention sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.apply_exclusive(period_seconds).await {
                        warn!(error = %err, "Retention sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
        Ok(())
    }
}
