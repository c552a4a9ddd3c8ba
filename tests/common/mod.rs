//! Shared fixtures for integration tests

#![allow(dead_code)]

use colonies_core::models::{FunctionSpec, NewProcess, Process};
use colonies_core::ColoniesResult;
use sqlx::PgPool;

pub const COLONY: &str = "test_colony";
pub const EXECUTOR_TYPE: &str = "test_executor_type";

pub fn spec() -> FunctionSpec {
    FunctionSpec::new("say", COLONY, EXECUTOR_TYPE)
}

pub async fn submit(pool: &PgPool, spec: FunctionSpec) -> ColoniesResult<Process> {
    Process::create(pool, NewProcess::new(spec)).await
}

pub async fn submit_default(pool: &PgPool) -> ColoniesResult<Process> {
    submit(pool, spec()).await
}

/// Submit a process and claim it for `executor_id`
pub async fn submit_running(pool: &PgPool, executor_id: &str) -> ColoniesResult<Process> {
    let mut process = submit_default(pool).await?;
    process.assign(pool, executor_id).await?;
    Ok(process)
}
