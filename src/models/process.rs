//! # Process Model
//!
//! One schedulable unit of work submitted to a colony.
//!
//! ## Overview
//!
//! A process pairs an immutable [`FunctionSpec`] with mutable lifecycle state.
//! Lifecycle mutations (assign, unassign, complete, fail, reset) each run in
//! one transaction that:
//!
//! 1. locks and reads the stored row (`SELECT ... FOR UPDATE`)
//! 2. runs the state guard against the stored copy
//! 3. writes the new state with a conditional `UPDATE`
//! 4. mirrors the new state onto every attribute owned by the process
//!
//! ## Database Schema
//!
//! Maps to `colonies_processes`. The resource columns (`cpu_millis`,
//! `memory_bytes`, ...) are written at submission from the normalised
//! conditions and only read by the candidate matcher, so they are not part of
//! the [`Process`] struct.

use crate::constants::NO_PROCESS_GRAPH;
use crate::database::server_now;
use crate::error::{ColoniesError, ColoniesResult};
use crate::logging::log_process_operation;
use crate::models::attribute::{Attribute, NewAttribute};
use crate::models::function_spec::FunctionSpec;
use crate::models::generate_id;
use crate::orchestration::priority::{PriorityStrategy, PriorityWeightedFifo};
use crate::scopes::ScopeBuilder;
use crate::state_machine::{
    AttributeType, CanFailGuard, CanSucceedGuard, GuardError, NotAssignedGuard, ProcessState,
    StateGuard, StoredProcess,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, instrument};

pub(crate) const PROCESS_COLUMNS: &str = "process_id, initiator_id, initiator_name, \
    colony_name, executor_names, executor_type, label, priority, priority_time, spec, state, \
    is_assigned, assigned_executor_id, submission_time, start_time, end_time, wait_deadline, \
    exec_deadline, retries, errors, input, output, parents, children, wait_for_parents, \
    process_graph_id";

/// A process row together with its reconstructed env map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Process {
    pub process_id: String,
    pub initiator_id: String,
    pub initiator_name: String,
    pub colony_name: String,
    /// Target executors; `["*"]` when any executor may run the process
    pub executor_names: Vec<String>,
    pub executor_type: String,
    pub label: String,
    pub priority: i32,
    /// Dispatch ordering key, lower runs sooner
    pub priority_time: i64,
    #[sqlx(json)]
    pub spec: FunctionSpec,
    pub state: ProcessState,
    pub is_assigned: bool,
    pub assigned_executor_id: Option<String>,
    pub submission_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub wait_deadline: Option<DateTime<Utc>>,
    pub exec_deadline: Option<DateTime<Utc>>,
    pub retries: i32,
    pub errors: Vec<String>,
    #[sqlx(json)]
    pub input: Vec<Value>,
    #[sqlx(json)]
    pub output: Vec<Value>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub wait_for_parents: bool,
    /// Owning process graph, empty for stand-alone processes
    pub process_graph_id: String,
}

/// New Process for submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcess {
    /// Generated up front so graph members can reference each other
    pub process_id: String,
    pub spec: FunctionSpec,
    pub initiator_id: String,
    pub initiator_name: String,
    pub process_graph_id: String,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub wait_for_parents: bool,
}

impl NewProcess {
    pub fn new(spec: FunctionSpec) -> Self {
        Self {
            process_id: generate_id(),
            spec,
            initiator_id: String::new(),
            initiator_name: String::new(),
            process_graph_id: NO_PROCESS_GRAPH.to_string(),
            parents: Vec::new(),
            children: Vec::new(),
            wait_for_parents: false,
        }
    }

    pub fn with_initiator(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.initiator_id = id.into();
        self.initiator_name = name.into();
        self
    }
}

/// Time a completed process spent queued and running
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessTimings {
    /// Start time minus submission time, in seconds
    pub waiting_time: f64,
    /// End time minus start time, in seconds
    pub processing_time: f64,
}

fn seconds_between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> f64 {
    match (from, to) {
        (Some(from), Some(to)) => (to - from).num_microseconds().unwrap_or(0) as f64 / 1e6,
        _ => 0.0,
    }
}

impl Process {
    /// Submit a process using the default dispatch priority strategy
    pub async fn create(pool: &PgPool, new_process: NewProcess) -> ColoniesResult<Process> {
        Self::create_with_strategy(pool, new_process, &PriorityWeightedFifo::default()).await
    }

    pub async fn create_with_strategy(
        pool: &PgPool,
        new_process: NewProcess,
        strategy: &dyn PriorityStrategy,
    ) -> ColoniesResult<Process> {
        let mut tx = pool.begin().await?;
        let process = Self::create_with_transaction(&mut tx, new_process, strategy).await?;
        tx.commit().await?;
        Ok(process)
    }

    /// Persist a process and one ENV attribute per env entry.
    ///
    /// Fails with a validation error when the conditions are malformed. The
    /// env map is not stored on the process row; it is rebuilt from the ENV
    /// attributes on every read.
    #[instrument(skip(tx, new_process, strategy), fields(process_id = %new_process.process_id))]
    pub async fn create_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        new_process: NewProcess,
        strategy: &dyn PriorityStrategy,
    ) -> ColoniesResult<Process> {
        let requirements = new_process.spec.validate()?;
        let spec = &new_process.spec;

        let submitted_at = server_now(&mut **tx).await?;
        let priority_time = strategy.priority_time(spec.priority, submitted_at);
        let wait_deadline = if spec.has_wait_budget() {
            let deadline = Duration::try_seconds(spec.max_wait_time)
                .and_then(|budget| submitted_at.checked_add_signed(budget))
                .ok_or_else(|| {
                    ColoniesError::Validation(format!(
                        "max_wait_time of {}s is out of range",
                        spec.max_wait_time
                    ))
                })?;
            Some(deadline)
        } else {
            None
        };

        let sql = format!(
            r#"
            INSERT INTO colonies_processes (
                process_id, initiator_id, initiator_name, colony_name, executor_names,
                executor_type, label, priority, priority_time, spec, state, is_assigned,
                submission_time, wait_deadline, retries, errors, input, output,
                parents, children, wait_for_parents, process_graph_id,
                cpu_millis, memory_bytes, storage_bytes, gpu_count, gpu_memory_bytes,
                nodes, processes, processes_per_node
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE,
                $12, $13, 0, '{{}}', '[]', '[]',
                $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23, $24, $25
            )
            RETURNING {PROCESS_COLUMNS}
            "#
        );

        let mut process = sqlx::query_as::<_, Process>(&sql)
            .bind(&new_process.process_id)
            .bind(&new_process.initiator_id)
            .bind(&new_process.initiator_name)
            .bind(&spec.conditions.colony_name)
            .bind(spec.target_executor_names())
            .bind(&spec.conditions.executor_type)
            .bind(&spec.label)
            .bind(spec.priority)
            .bind(priority_time)
            .bind(Json(spec.without_env()))
            .bind(ProcessState::Waiting)
            .bind(submitted_at)
            .bind(wait_deadline)
            .bind(&new_process.parents)
            .bind(&new_process.children)
            .bind(new_process.wait_for_parents)
            .bind(&new_process.process_graph_id)
            .bind(requirements.cpu_millis)
            .bind(requirements.memory_bytes)
            .bind(requirements.storage_bytes)
            .bind(requirements.gpu_count)
            .bind(requirements.gpu_memory_bytes)
            .bind(requirements.nodes)
            .bind(requirements.processes)
            .bind(requirements.processes_per_node)
            .fetch_one(&mut **tx)
            .await?;

        for (key, value) in &spec.env {
            Attribute::create_with_transaction(
                tx,
                NewAttribute::new(
                    &process.process_id,
                    &process.colony_name,
                    &process.process_graph_id,
                    AttributeType::Env,
                    key,
                    value,
                ),
            )
            .await?;
        }
        process.spec.env = spec.env.clone();

        debug!(
            colony = %process.colony_name,
            executor_type = %process.executor_type,
            priority_time = process.priority_time,
            "Process submitted"
        );

        Ok(process)
    }

    /// Find a process by ID
    pub async fn find_by_id(pool: &PgPool, process_id: &str) -> Result<Option<Process>, sqlx::Error> {
        let sql = format!("SELECT {PROCESS_COLUMNS} FROM colonies_processes WHERE process_id = $1");
        let process = sqlx::query_as::<_, Process>(&sql)
            .bind(process_id)
            .fetch_optional(pool)
            .await?;

        match process {
            Some(process) => Ok(Self::with_env(pool, vec![process]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Find several processes by ID, in no particular order
    pub async fn find_by_ids(pool: &PgPool, process_ids: &[String]) -> Result<Vec<Process>, sqlx::Error> {
        let sql = format!("SELECT {PROCESS_COLUMNS} FROM colonies_processes WHERE process_id = ANY($1)");
        let processes = sqlx::query_as::<_, Process>(&sql)
            .bind(process_ids)
            .fetch_all(pool)
            .await?;
        Self::with_env(pool, processes).await
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<Process>, sqlx::Error> {
        let sql = format!("SELECT {PROCESS_COLUMNS} FROM colonies_processes ORDER BY submission_time");
        let processes = sqlx::query_as::<_, Process>(&sql).fetch_all(pool).await?;
        Self::with_env(pool, processes).await
    }

    /// Every process of a process graph
    pub async fn list_by_process_graph(
        pool: &PgPool,
        process_graph_id: &str,
    ) -> Result<Vec<Process>, sqlx::Error> {
        let sql = format!(
            "SELECT {PROCESS_COLUMNS} FROM colonies_processes WHERE process_graph_id = $1 ORDER BY submission_time"
        );
        let processes = sqlx::query_as::<_, Process>(&sql)
            .bind(process_graph_id)
            .fetch_all(pool)
            .await?;
        Self::with_env(pool, processes).await
    }

    /// Running processes across all colonies, oldest start first
    pub async fn find_all_running(pool: &PgPool) -> Result<Vec<Process>, sqlx::Error> {
        Self::scope()
            .with_state(ProcessState::Running)
            .order_by_start_time()
            .all(pool)
            .await
    }

    /// Waiting processes across all colonies in dispatch order
    pub async fn find_all_waiting(pool: &PgPool) -> Result<Vec<Process>, sqlx::Error> {
        Self::scope()
            .with_state(ProcessState::Waiting)
            .order_by_priority()
            .all(pool)
            .await
    }

    /// Processes an executor was assigned, in one state, submitted within the last `seconds`
    pub async fn find_by_executor(
        pool: &PgPool,
        executor_id: &str,
        state: ProcessState,
        seconds: i64,
        count: i64,
    ) -> Result<Vec<Process>, sqlx::Error> {
        Self::scope()
            .assigned_to(executor_id)
            .with_state(state)
            .submitted_within(seconds)
            .order_by_submission_time(true)
            .limit(count)
            .all(pool)
            .await
    }

    /// Rebuild the env map of each process from its ENV attributes
    pub(crate) async fn with_env(
        pool: &PgPool,
        mut processes: Vec<Process>,
    ) -> Result<Vec<Process>, sqlx::Error> {
        let ids: Vec<String> = processes.iter().map(|p| p.process_id.clone()).collect();
        let env_attributes = Attribute::find_by_targets_and_type(pool, &ids, AttributeType::Env).await?;

        let mut by_target: HashMap<String, Vec<Attribute>> = HashMap::new();
        for attribute in env_attributes {
            by_target
                .entry(attribute.target_id.clone())
                .or_default()
                .push(attribute);
        }

        for process in &mut processes {
            process.spec.env = by_target
                .remove(&process.process_id)
                .unwrap_or_default()
                .into_iter()
                .map(|attribute| (attribute.key, attribute.value))
                .collect();
        }

        Ok(processes)
    }

    /// Lock the stored row and return the fields guards decide on
    async fn lock_stored(
        tx: &mut Transaction<'_, Postgres>,
        process_id: &str,
    ) -> ColoniesResult<(ProcessState, bool)> {
        let row: Option<(ProcessState, bool)> = sqlx::query_as(
            "SELECT state, is_assigned FROM colonies_processes WHERE process_id = $1 FOR UPDATE",
        )
        .bind(process_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.ok_or_else(|| ColoniesError::not_found("process", process_id))
    }

    /// Replace the lifecycle fields with a freshly returned row, keeping the env map
    fn refresh_from(&mut self, mut stored: Process) {
        stored.spec.env = std::mem::take(&mut self.spec.env);
        *self = stored;
    }

    // ============================================================================
    // LIFECYCLE TRANSITIONS
    // ============================================================================

    /// Claim the process for an executor.
    ///
    /// Fails with a conflict if the stored copy is already assigned or has
    /// already finished. The `is_assigned = FALSE` predicate on the update
    /// keeps the claim exclusive even if two callers passed the read.
    #[instrument(skip(self, pool), fields(process_id = %self.process_id))]
    pub async fn assign(&mut self, pool: &PgPool, executor_id: &str) -> ColoniesResult<()> {
        let mut tx = pool.begin().await?;
        let (state, is_assigned) = Self::lock_stored(&mut tx, &self.process_id).await?;
        NotAssignedGuard.check(&StoredProcess {
            process_id: &self.process_id,
            state,
            is_assigned,
        })?;

        let sql = format!(
            r#"
            UPDATE colonies_processes
            SET is_assigned = TRUE,
                start_time = NOW(),
                assigned_executor_id = $2,
                state = $3,
                exec_deadline = CASE
                    WHEN $4 > 0 THEN NOW() + make_interval(secs => $4::DOUBLE PRECISION)
                    ELSE exec_deadline
                END
            WHERE process_id = $1 AND is_assigned = FALSE
            RETURNING {PROCESS_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, Process>(&sql)
            .bind(&self.process_id)
            .bind(executor_id)
            .bind(ProcessState::Running)
            .bind(self.spec.max_exec_time)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GuardError::AlreadyAssigned {
                process_id: self.process_id.clone(),
            })?;

        Attribute::set_state_with_transaction(&mut tx, &self.process_id, ProcessState::Running).await?;
        tx.commit().await?;

        self.refresh_from(stored);
        log_process_operation(
            "assign",
            &self.process_id,
            Some(&self.colony_name),
            Some(executor_id),
            "RUNNING",
            None,
        );
        Ok(())
    }

    /// Release the process back to the queue and count a retry
    #[instrument(skip(self, pool), fields(process_id = %self.process_id))]
    pub async fn unassign(&mut self, pool: &PgPool) -> ColoniesResult<()> {
        let sql = format!(
            r#"
            UPDATE colonies_processes
            SET is_assigned = FALSE,
                end_time = NOW(),
                state = $2,
                retries = retries + 1,
                assigned_executor_id = NULL,
                wait_deadline = CASE
                    WHEN $3 > 0 THEN NOW() + make_interval(secs => $3::DOUBLE PRECISION)
                    ELSE wait_deadline
                END
            WHERE process_id = $1
            RETURNING {PROCESS_COLUMNS}
            "#
        );
        self.rewrite_lifecycle(pool, &sql, ProcessState::Waiting).await?;
        debug!(retries = self.retries, "Process unassigned");
        Ok(())
    }

    /// Requeue the process as if it had just been submitted
    #[instrument(skip(self, pool), fields(process_id = %self.process_id))]
    pub async fn reset(&mut self, pool: &PgPool) -> ColoniesResult<()> {
        let sql = format!(
            r#"
            UPDATE colonies_processes
            SET is_assigned = FALSE,
                assigned_executor_id = NULL,
                start_time = NULL,
                end_time = NULL,
                state = $2,
                submission_time = NOW(),
                wait_deadline = CASE
                    WHEN $3 > 0 THEN NOW() + make_interval(secs => $3::DOUBLE PRECISION)
                    ELSE NULL
                END
            WHERE process_id = $1
            RETURNING {PROCESS_COLUMNS}
            "#
        );
        self.rewrite_lifecycle(pool, &sql, ProcessState::Waiting).await?;
        debug!("Process reset");
        Ok(())
    }

    /// Run an unguarded lifecycle update taking ($1 id, $2 state, $3 wait budget)
    async fn rewrite_lifecycle(
        &mut self,
        pool: &PgPool,
        sql: &str,
        state: ProcessState,
    ) -> ColoniesResult<()> {
        let mut tx = pool.begin().await?;
        let stored = sqlx::query_as::<_, Process>(sql)
            .bind(&self.process_id)
            .bind(state)
            .bind(self.spec.max_wait_time)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ColoniesError::not_found("process", &self.process_id))?;

        Attribute::set_state_with_transaction(&mut tx, &self.process_id, state).await?;
        tx.commit().await?;

        self.refresh_from(stored);
        Ok(())
    }

    /// Complete a running process and report how long it waited and ran
    #[instrument(skip(pool))]
    pub async fn mark_successful(pool: &PgPool, process_id: &str) -> ColoniesResult<ProcessTimings> {
        let mut tx = pool.begin().await?;
        let (state, is_assigned) = Self::lock_stored(&mut tx, process_id).await?;
        CanSucceedGuard.check(&StoredProcess {
            process_id,
            state,
            is_assigned,
        })?;

        let (submission_time, start_time, end_time): (
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            r#"
            UPDATE colonies_processes
            SET end_time = NOW(), state = $2, is_assigned = FALSE
            WHERE process_id = $1
            RETURNING submission_time, start_time, end_time
            "#,
        )
        .bind(process_id)
        .bind(ProcessState::Success)
        .fetch_one(&mut *tx)
        .await?;

        Attribute::set_state_with_transaction(&mut tx, process_id, ProcessState::Success).await?;
        tx.commit().await?;

        let timings = ProcessTimings {
            waiting_time: seconds_between(Some(submission_time), start_time),
            processing_time: seconds_between(start_time, end_time),
        };
        debug!(
            waiting_time = timings.waiting_time,
            processing_time = timings.processing_time,
            "Process successful"
        );
        log_process_operation("complete", process_id, None, None, "SUCCESS", None);
        Ok(timings)
    }

    /// Fail a process that has not finished yet and record its errors
    #[instrument(skip(pool, errors))]
    pub async fn mark_failed(pool: &PgPool, process_id: &str, errors: Vec<String>) -> ColoniesResult<()> {
        let mut tx = pool.begin().await?;
        let (state, is_assigned) = Self::lock_stored(&mut tx, process_id).await?;
        CanFailGuard.check(&StoredProcess {
            process_id,
            state,
            is_assigned,
        })?;

        sqlx::query(
            r#"
            UPDATE colonies_processes
            SET end_time = NOW(), state = $2, is_assigned = FALSE, errors = $3
            WHERE process_id = $1
            "#,
        )
        .bind(process_id)
        .bind(ProcessState::Failed)
        .bind(&errors)
        .execute(&mut *tx)
        .await?;

        Attribute::set_state_with_transaction(&mut tx, process_id, ProcessState::Failed).await?;
        tx.commit().await?;

        log_process_operation(
            "fail",
            process_id,
            None,
            None,
            "FAILED",
            errors.first().map(String::as_str),
        );
        Ok(())
    }

    /// Overwrite the state without guards, mirroring it onto the attributes
    pub async fn set_state(pool: &PgPool, process_id: &str, state: ProcessState) -> ColoniesResult<()> {
        let mut tx = pool.begin().await?;
        let result = sqlx::query("UPDATE colonies_processes SET state = $2 WHERE process_id = $1")
            .bind(process_id)
            .bind(state)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ColoniesError::not_found("process", process_id));
        }
        Attribute::set_state_with_transaction(&mut tx, process_id, state).await?;
        tx.commit().await?;
        Ok(())
    }

    // ============================================================================
    // STRUCTURAL AND PAYLOAD EDITS
    // ============================================================================

    async fn update_column<T>(
        pool: &PgPool,
        process_id: &str,
        column: &'static str,
        value: T,
    ) -> ColoniesResult<()>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let sql = format!("UPDATE colonies_processes SET {column} = $2 WHERE process_id = $1");
        let result = sqlx::query(&sql)
            .bind(process_id)
            .bind(value)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ColoniesError::not_found("process", process_id));
        }
        Ok(())
    }

    pub async fn set_wait_for_parents(pool: &PgPool, process_id: &str, wait_for_parents: bool) -> ColoniesResult<()> {
        Self::update_column(pool, process_id, "wait_for_parents", wait_for_parents).await
    }

    pub async fn set_parents(pool: &PgPool, process_id: &str, parents: Vec<String>) -> ColoniesResult<()> {
        Self::update_column(pool, process_id, "parents", parents).await
    }

    pub async fn set_children(pool: &PgPool, process_id: &str, children: Vec<String>) -> ColoniesResult<()> {
        Self::update_column(pool, process_id, "children", children).await
    }

    pub async fn set_input(pool: &PgPool, process_id: &str, input: Vec<Value>) -> ColoniesResult<()> {
        crate::validation::validate_json_payload("input", &Value::Array(input.clone()))?;
        Self::update_column(pool, process_id, "input", Json(input)).await
    }

    pub async fn set_output(pool: &PgPool, process_id: &str, output: Vec<Value>) -> ColoniesResult<()> {
        crate::validation::validate_json_payload("output", &Value::Array(output.clone()))?;
        Self::update_column(pool, process_id, "output", Json(output)).await
    }

    pub async fn set_errors(pool: &PgPool, process_id: &str, errors: Vec<String>) -> ColoniesResult<()> {
        Self::update_column(pool, process_id, "errors", errors).await
    }

    pub async fn set_exec_deadline(pool: &PgPool, process_id: &str, deadline: DateTime<Utc>) -> ColoniesResult<()> {
        Self::update_column(pool, process_id, "exec_deadline", deadline).await
    }

    pub async fn set_wait_deadline(pool: &PgPool, process_id: &str, deadline: DateTime<Utc>) -> ColoniesResult<()> {
        Self::update_column(pool, process_id, "wait_deadline", deadline).await
    }

    // ============================================================================
    // DELETION
    // ============================================================================

    /// Delete a process and its attributes
    pub async fn delete(pool: &PgPool, process_id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;
        Attribute::delete_by_target_with_transaction(&mut tx, process_id).await?;
        let result = sqlx::query("DELETE FROM colonies_processes WHERE process_id = $1")
            .bind(process_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_all(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM colonies_attributes WHERE target_id IN (SELECT process_id FROM colonies_processes)")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM colonies_processes")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Delete the stand-alone processes of a colony, optionally only those in one state
    pub async fn delete_all_by_colony(
        pool: &PgPool,
        colony_name: &str,
        state: Option<ProcessState>,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM colonies_attributes
            WHERE target_colony_name = $1
              AND target_process_graph_id = ''
              AND ($2::INTEGER IS NULL OR state = $2)
            "#,
        )
        .bind(colony_name)
        .bind(state)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            DELETE FROM colonies_processes
            WHERE colony_name = $1
              AND process_graph_id = ''
              AND ($2::INTEGER IS NULL OR state = $2)
            "#,
        )
        .bind(colony_name)
        .bind(state)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_by_colony_with_state(
        pool: &PgPool,
        colony_name: &str,
        state: ProcessState,
    ) -> Result<u64, sqlx::Error> {
        Self::delete_all_by_colony(pool, colony_name, Some(state)).await
    }

    /// Delete every member process of a graph together with their attributes
    pub async fn delete_all_by_process_graph_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        process_graph_id: &str,
    ) -> Result<u64, sqlx::Error> {
        Attribute::delete_by_process_graph_with_transaction(tx, process_graph_id).await?;
        let result = sqlx::query("DELETE FROM colonies_processes WHERE process_graph_id = $1")
            .bind(process_graph_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_by_process_graph(pool: &PgPool, process_graph_id: &str) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let deleted = Self::delete_all_by_process_graph_with_transaction(&mut tx, process_graph_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Delete in-graph processes of a colony, optionally only those in one state
    pub async fn delete_all_in_process_graphs_by_colony_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        colony_name: &str,
        state: Option<ProcessState>,
    ) -> Result<u64, sqlx::Error> {
        Attribute::delete_all_in_process_graphs_by_colony_with_transaction(tx, colony_name, state).await?;
        let result = sqlx::query(
            r#"
            DELETE FROM colonies_processes
            WHERE colony_name = $1
              AND process_graph_id <> ''
              AND ($2::INTEGER IS NULL OR state = $2)
            "#,
        )
        .bind(colony_name)
        .bind(state)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_in_process_graphs_by_colony(
        pool: &PgPool,
        colony_name: &str,
        state: Option<ProcessState>,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let deleted =
            Self::delete_all_in_process_graphs_by_colony_with_transaction(&mut tx, colony_name, state).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Delete successful processes submitted before the cutoff
    pub async fn delete_successful_older_than(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM colonies_processes WHERE state = $1 AND submission_time < $2")
            .bind(ProcessState::Success)
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ============================================================================
    // COUNTS
    // ============================================================================

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM colonies_processes")
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_state(pool: &PgPool, state: ProcessState) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM colonies_processes WHERE state = $1")
            .bind(state)
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_colony_and_state(
        pool: &PgPool,
        colony_name: &str,
        state: ProcessState,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM colonies_processes WHERE colony_name = $1 AND state = $2")
            .bind(colony_name)
            .bind(state)
            .fetch_one(pool)
            .await
    }

    /// True when the process has passed its wait deadline without being claimed
    pub fn wait_deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.state == ProcessState::Waiting && self.wait_deadline.is_some_and(|deadline| deadline < now)
    }

    /// True when a running process has passed its exec deadline
    pub fn exec_deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.state == ProcessState::Running && self.exec_deadline.is_some_and(|deadline| deadline < now)
    }

    /// True when another unassign would exceed the retry budget
    pub fn retries_exhausted(&self) -> bool {
        self.spec.max_retries > 0 && self.retries >= self.spec.max_retries
    }
}
