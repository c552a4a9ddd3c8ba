//! # Database Migration System
//!
//! The schema in `migrations/` is embedded at build time. `sqlx` records
//! applied versions in `_sqlx_migrations` and serialises concurrent runs with
//! a PostgreSQL advisory lock, so several replicas may call
//! [`DatabaseMigrations::run_all`] on startup.
//!
//! Integration tests use the same [`MIGRATOR`] through
//! `#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]`.

use crate::constants::tables;
use crate::error::ColoniesResult;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Manages database schema migrations.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every outstanding migration
    pub async fn run_all(pool: &PgPool) -> ColoniesResult<()> {
        MIGRATOR.run(pool).await?;
        info!(migrations = MIGRATOR.iter().count(), "Database schema up to date");
        Ok(())
    }

    /// Whether every store table exists
    pub async fn is_schema_ready(pool: &PgPool) -> Result<bool, sqlx::Error> {
        let expected = [
            tables::PROCESSES,
            tables::PROCESS_GRAPHS,
            tables::ATTRIBUTES,
            tables::LOGS,
        ];
        let found: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ANY($1)",
        )
        .bind(expected.iter().map(|t| t.to_string()).collect::<Vec<_>>())
        .fetch_one(pool)
        .await?;
        Ok(found == expected.len() as i64)
    }
}
