//! # Process Log Model
//!
//! Free-text log lines written by executors while a process runs. Only what
//! the retention sweep and process deletion need is provided here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProcessLog {
    pub log_id: i64,
    pub process_id: String,
    pub colony_name: String,
    pub executor_name: String,
    /// Executor-side timestamp in nanoseconds since the epoch
    pub timestamp: i64,
    pub message: String,
    pub added: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcessLog {
    pub process_id: String,
    pub colony_name: String,
    pub executor_name: String,
    pub timestamp: i64,
    pub message: String,
}

impl ProcessLog {
    pub async fn create(pool: &PgPool, new_log: NewProcessLog) -> Result<ProcessLog, sqlx::Error> {
        sqlx::query_as::<_, ProcessLog>(
            r#"
            INSERT INTO colonies_logs (process_id, colony_name, executor_name, timestamp, message, added)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING log_id, process_id, colony_name, executor_name, timestamp, message, added
            "#,
        )
        .bind(&new_log.process_id)
        .bind(&new_log.colony_name)
        .bind(&new_log.executor_name)
        .bind(new_log.timestamp)
        .bind(&new_log.message)
        .fetch_one(pool)
        .await
    }

    /// Log lines of one process in executor timestamp order
    pub async fn list_by_process(
        pool: &PgPool,
        process_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessLog>, sqlx::Error> {
        sqlx::query_as::<_, ProcessLog>(
            r#"
            SELECT log_id, process_id, colony_name, executor_name, timestamp, message, added
            FROM colonies_logs
            WHERE process_id = $1
            ORDER BY timestamp ASC
            LIMIT $2
            "#,
        )
        .bind(process_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn delete_older_than(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_logs WHERE added < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_process(pool: &PgPool, process_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_logs WHERE process_id = $1")
            .bind(process_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
