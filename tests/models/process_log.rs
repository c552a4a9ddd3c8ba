use crate::common::*;
use chrono::{Duration, Utc};
use colonies_core::models::{NewProcessLog, ProcessLog};
use colonies_core::ColoniesResult;
use sqlx::PgPool;

fn log_line(process_id: &str, timestamp: i64, message: &str) -> NewProcessLog {
    NewProcessLog {
        process_id: process_id.to_string(),
        colony_name: COLONY.to_string(),
        executor_name: "executor_1".to_string(),
        timestamp,
        message: message.to_string(),
    }
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_process_log_lifecycle(pool: PgPool) -> ColoniesResult<()> {
    let process = submit_default(&pool).await?;
    let id = &process.process_id;

    ProcessLog::create(&pool, log_line(id, 2, "second")).await?;
    ProcessLog::create(&pool, log_line(id, 1, "first")).await?;
    ProcessLog::create(&pool, log_line("other", 1, "elsewhere")).await?;

    let lines = ProcessLog::list_by_process(&pool, id, 10).await?;
    let messages: Vec<&str> = lines.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);

    assert_eq!(ProcessLog::list_by_process(&pool, id, 1).await?.len(), 1);

    // Nothing is older than an hour ago
    assert_eq!(ProcessLog::delete_older_than(&pool, Utc::now() - Duration::hours(1)).await?, 0);
    assert_eq!(ProcessLog::delete_by_process(&pool, id).await?, 2);
    assert_eq!(ProcessLog::delete_older_than(&pool, Utc::now() + Duration::seconds(1)).await?, 1);
    Ok(())
}
