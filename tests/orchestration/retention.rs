//! Retention Sweeper Tests

use crate::common::*;
use colonies_core::config::RetentionConfig;
use colonies_core::models::{Attribute, NewProcessLog, Process, ProcessGraph, ProcessLog};
use colonies_core::orchestration::{RetentionReport, RetentionSweeper};
use colonies_core::{ColoniesResult, ProcessState};
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;

/// Only the successful process is swept; failed and waiting ones stay.
#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_sweep_removes_only_successful_data(pool: PgPool) -> ColoniesResult<()> {
    let failed = submit(&pool, spec().with_env("K", "failed")).await?;
    let succeeded = submit(&pool, spec().with_env("K", "done")).await?;
    let waiting = submit(&pool, spec().with_env("K", "waiting")).await?;

    Process::mark_failed(&pool, &failed.process_id, vec![]).await?;
    let mut running = Process::find_by_id(&pool, &succeeded.process_id).await?.expect("process");
    running.assign(&pool, "executor_1").await?;
    Process::mark_successful(&pool, &succeeded.process_id).await?;

    let sweeper = RetentionSweeper::new(pool.clone());
    let report = sweeper.apply(0).await?;
    assert_eq!(report.processes, 1);
    assert_eq!(report.attributes, 1);

    assert!(Process::find_by_id(&pool, &succeeded.process_id).await?.is_none());
    assert!(Attribute::find_by_target(&pool, &succeeded.process_id).await?.is_empty());
    for kept in [&failed, &waiting] {
        assert!(Process::find_by_id(&pool, &kept.process_id).await?.is_some());
        assert_eq!(Attribute::find_by_target(&pool, &kept.process_id).await?.len(), 1);
    }
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_sweep_is_idempotent(pool: PgPool) -> ColoniesResult<()> {
    for _ in 0..3 {
        let process = submit_running(&pool, "executor_1").await?;
        Process::mark_successful(&pool, &process.process_id).await?;
    }
    submit_default(&pool).await?;

    let sweeper = RetentionSweeper::new(pool.clone());
    let first = sweeper.apply(0).await?;
    assert_eq!(first.processes, 3);
    let remaining = Process::count(&pool).await?;

    let second = sweeper.apply(0).await?;
    assert_eq!(second, RetentionReport::default());
    assert_eq!(Process::count(&pool).await?, remaining);
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_sweep_respects_the_period(pool: PgPool) -> ColoniesResult<()> {
    let process = submit_running(&pool, "executor_1").await?;
    Process::mark_successful(&pool, &process.process_id).await?;

    let sweeper = RetentionSweeper::new(pool.clone());
    let report = sweeper.apply(3600).await?;
    assert_eq!(report.total(), 0);
    assert!(Process::find_by_id(&pool, &process.process_id).await?.is_some());

    assert!(sweeper.apply(-1).await.is_err());
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_sweep_removes_graphs_logs_and_members(pool: PgPool) -> ColoniesResult<()> {
    let (graph, members) = ProcessGraph::submit(
        &pool,
        COLONY,
        vec![spec().with_node("only", &[]).with_env("K", "V")],
    )
    .await?;
    ProcessGraph::set_state(&pool, &graph.process_graph_id, ProcessState::Success).await?;
    ProcessLog::create(
        &pool,
        NewProcessLog {
            process_id: members[0].process_id.clone(),
            colony_name: COLONY.to_string(),
            executor_name: "executor_1".to_string(),
            timestamp: 1,
            message: "hello".to_string(),
        },
    )
    .await?;

    let report = RetentionSweeper::new(pool.clone()).apply(0).await?;
    assert_eq!(report.logs, 1);
    assert_eq!(report.process_graphs, 1);
    assert_eq!(report.graph_processes, 1);
    assert!(ProcessGraph::find_by_id(&pool, &graph.process_graph_id).await?.is_none());
    assert!(Attribute::find_by_target(&pool, &members[0].process_id).await?.is_empty());
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_exclusive_sweep_and_background_loop(pool: PgPool) -> ColoniesResult<()> {
    let process = submit_running(&pool, "executor_1").await?;
    Process::mark_successful(&pool, &process.process_id).await?;

    let config = RetentionConfig {
        lock_timeout_ms: 100,
        lock_poll_interval_ms: 10,
        ..RetentionConfig::default()
    };
    let sweeper = RetentionSweeper::from_config(pool.clone(), &config);

    let report = sweeper.apply_exclusive(0).await?.expect("lock should be free");
    assert_eq!(report.processes, 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (stopped, _) = tokio::join!(
        sweeper.run_periodically(Duration::from_millis(20), 0, shutdown_rx),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown_tx.send(true);
        }
    );
    stopped?;
    Ok(())
}
