//! Distributed Lock Tests
//!
//! Two lock instances on the same name stand in for two coordinator replicas.

use colonies_core::orchestration::DistributedLock;
use colonies_core::{ColoniesError, ColoniesResult, LockConfig};
use sqlx::PgPool;
use std::time::Duration;

const LOCK: &str = "colonies_test_lock";

fn replica(pool: &PgPool) -> DistributedLock {
    DistributedLock::new(pool.clone(), LOCK).with_poll_interval(Duration::from_millis(10))
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_acquire_excludes_other_holders(pool: PgPool) -> ColoniesResult<()> {
    let first = replica(&pool);
    let second = replica(&pool);

    first.acquire(Duration::from_millis(200)).await?;
    assert!(first.is_held().await);

    let err = second.acquire(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!second.is_held().await);

    first.release().await?;
    second.acquire(Duration::from_millis(200)).await?;
    second.release().await?;
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_waiter_gets_lock_after_release(pool: PgPool) -> ColoniesResult<()> {
    let first = replica(&pool);
    let second = replica(&pool);
    first.acquire(Duration::from_millis(200)).await?;

    let (waited, released) = tokio::join!(second.acquire(Duration::from_secs(5)), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.release().await
    });
    released?;
    waited?;
    assert!(second.is_held().await);
    second.release().await?;
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_lock_is_not_reentrant(pool: PgPool) -> ColoniesResult<()> {
    let lock = replica(&pool);
    lock.acquire(Duration::from_millis(200)).await?;

    let err = lock.acquire(Duration::from_millis(50)).await.unwrap_err();
    assert!(err.is_conflict());

    lock.release().await?;
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_release_without_holding_is_an_error(pool: PgPool) -> ColoniesResult<()> {
    let lock = replica(&pool);
    let err = lock.release().await.unwrap_err();
    assert!(matches!(err, ColoniesError::LockNotHeld(name) if name == LOCK));
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_dropped_holder_frees_the_lock(pool: PgPool) -> ColoniesResult<()> {
    let holder = replica(&pool);
    holder.acquire(Duration::from_millis(200)).await?;
    drop(holder);

    // The session closes asynchronously; poll until the server notices
    let successor = replica(&pool);
    successor.acquire(Duration::from_secs(5)).await?;
    successor.release().await?;
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_configured_lock_uses_configured_name(pool: PgPool) -> ColoniesResult<()> {
    let config = LockConfig {
        name: LOCK.to_string(),
        ..LockConfig::default()
    };
    let configured = DistributedLock::from_config(pool.clone(), &config);
    assert_eq!(configured.key(), replica(&pool).key());

    configured.acquire(config.acquire_timeout()).await?;
    let err = replica(&pool).acquire(Duration::from_millis(50)).await.unwrap_err();
    assert!(err.is_timeout());
    configured.release().await?;
    Ok(())
}

/// A release whose unlock fails must not hand a locked session back to the pool.
#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_failed_release_does_not_leak_the_lock(pool: PgPool) -> ColoniesResult<()> {
    let holder = replica(&pool);
    holder.acquire(Duration::from_millis(200)).await?;

    // Kill the holder's session behind its back
    let terminated: Vec<bool> = sqlx::query_scalar(
        "SELECT pg_terminate_backend(pid) FROM pg_locks \
         WHERE locktype = 'advisory' AND objsubid = 1 \
           AND ((classid::BIGINT << 32) | objid::BIGINT) = $1",
    )
    .bind(holder.key())
    .fetch_all(&pool)
    .await?;
    assert_eq!(terminated, vec![true]);

    assert!(holder.release().await.is_err());
    assert!(!holder.is_held().await);

    let successor = replica(&pool);
    successor.acquire(Duration::from_secs(5)).await?;
    successor.release().await?;
    Ok(())
}
