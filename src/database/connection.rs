use crate::config::DatabaseConfig;
use crate::error::ColoniesResult;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool};
use tracing::info;

/// Build a connection pool from configuration
pub async fn connect(config: &DatabaseConfig) -> ColoniesResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool connected"
    );
    Ok(pool)
}

/// Current time on the database server.
///
/// Inside a transaction this is the transaction's start time, the same value
/// every `NOW()` in that transaction sees.
pub async fn server_now<'e, E: PgExecutor<'e>>(executor: E) -> Result<DateTime<Utc>, sqlx::Error> {
    sqlx::query_scalar("SELECT NOW()").fetch_one(executor).await
}

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Connect and, if configured, bring the schema up to date
    pub async fn new(config: &DatabaseConfig) -> ColoniesResult<Self> {
        let pool = connect(config).await?;
        if config.run_migrations {
            super::migrator::DatabaseMigrations::run_all(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let health: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
