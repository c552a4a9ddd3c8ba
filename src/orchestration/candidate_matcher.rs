//! # Candidate Matcher
//!
//! Admission filtering and dispatch ordering for idle executors.
//!
//! A candidate is a WAITING, unassigned process that is not waiting for its
//! parents, lives in the executor's colony, asks for the executor's type, and
//! either names the executor or accepts any executor. A query without an
//! executor name only sees processes that accept any executor. Candidates
//! are returned lowest priority time first. Finding a candidate never claims
//! it: callers claim with [`Process::assign`], which re-checks the assigned
//! flag, or use [`CandidateMatcher::select_and_assign`] to find and claim in
//! one statement.

use crate::config::SchedulingConfig;
use crate::constants::scheduling::MAX_CANDIDATE_COUNT;
use crate::error::ColoniesResult;
use crate::models::process::PROCESS_COLUMNS;
use crate::models::{Attribute, Process};
use crate::scopes::{ExecutorCapacity, ProcessScope, ScopeBuilder};
use crate::state_machine::ProcessState;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder};
use tracing::{debug, info, instrument};

/// Identity and filters of the executor asking for work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub colony_name: String,
    pub executor_type: String,
    /// Only processes naming this executor or the wildcard; `None` matches the wildcard only
    pub executor_name: Option<String>,
    pub label: Option<String>,
    pub initiator_name: Option<String>,
    /// Resource ceiling; `None` disables resource filtering
    pub capacity: Option<ExecutorCapacity>,
    pub limit: i64,
}

impl CandidateQuery {
    pub fn new(colony_name: impl Into<String>, executor_type: impl Into<String>) -> Self {
        Self {
            colony_name: colony_name.into(),
            executor_type: executor_type.into(),
            executor_name: None,
            label: None,
            initiator_name: None,
            capacity: None,
            limit: 1,
        }
    }

    pub fn for_executor(mut self, executor_name: impl Into<String>) -> Self {
        self.executor_name = Some(executor_name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_initiator(mut self, initiator_name: impl Into<String>) -> Self {
        self.initiator_name = Some(initiator_name.into());
        self
    }

    pub fn with_capacity(mut self, capacity: ExecutorCapacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Non-positive limits ask for as many candidates as the matcher allows
    fn scope(&self, max_candidates: i64) -> ProcessScope {
        let mut scope = Process::scope()
            .in_colony(&self.colony_name)
            .with_state(ProcessState::Waiting)
            .with_executor_type(&self.executor_type)
            .unassigned()
            .ready();
        scope = match &self.executor_name {
            Some(executor_name) => scope.targeting_executor(executor_name),
            None => scope.untargeted(),
        };
        if let Some(label) = &self.label {
            scope = scope.with_label(label);
        }
        if let Some(initiator_name) = &self.initiator_name {
            scope = scope.with_initiator(initiator_name);
        }
        if let Some(capacity) = self.capacity {
            scope = scope.within_capacity(capacity);
        }
        let limit = if self.limit <= 0 {
            max_candidates
        } else {
            self.limit.min(max_candidates)
        };
        scope.order_by_priority().limit(limit)
    }
}

/// Optional filters of the inspection queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFilter {
    pub executor_type: Option<String>,
    pub label: Option<String>,
    pub initiator_name: Option<String>,
}

impl StateFilter {
    fn apply(&self, mut scope: ProcessScope) -> ProcessScope {
        if let Some(executor_type) = &self.executor_type {
            scope = scope.with_executor_type(executor_type);
        }
        if let Some(label) = &self.label {
            scope = scope.with_label(label);
        }
        if let Some(initiator_name) = &self.initiator_name {
            scope = scope.with_initiator(initiator_name);
        }
        scope
    }
}

/// Read-only candidate and inspection queries over the process store
#[derive(Debug, Clone)]
pub struct CandidateMatcher {
    pool: PgPool,
    max_candidates: i64,
}

impl CandidateMatcher {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_candidates: MAX_CANDIDATE_COUNT,
        }
    }

    pub fn from_config(pool: PgPool, config: &SchedulingConfig) -> Self {
        Self {
            pool,
            max_candidates: config.max_candidate_count.max(1),
        }
    }

    /// Dispatch candidates for an executor, best first
    #[instrument(skip(self), fields(colony = %query.colony_name, executor_type = %query.executor_type))]
    pub async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<Process>, sqlx::Error> {
        let candidates = query.scope(self.max_candidates).all(&self.pool).await?;
        debug!(count = candidates.len(), "Candidates found");
        Ok(candidates)
    }

    /// Processes of a colony in one state.
    ///
    /// WAITING is ordered by priority time and RUNNING by start time, both
    /// oldest first; SUCCESS and FAILED are ordered most recently finished
    /// first.
    pub async fn find_by_state(
        &self,
        colony_name: &str,
        state: ProcessState,
        filter: &StateFilter,
        count: i64,
    ) -> Result<Vec<Process>, sqlx::Error> {
        let scope = filter.apply(Process::scope().in_colony(colony_name).with_state(state));
        let scope = match state {
            ProcessState::Waiting => scope.order_by_priority(),
            ProcessState::Running => scope.order_by_start_time(),
            ProcessState::Success | ProcessState::Failed => scope.order_by_end_time(),
        };
        scope.limit(count).all(&self.pool).await
    }

    /// Processes of a colony in one state submitted within the last `seconds`, oldest first
    pub async fn find_by_state_within(
        &self,
        colony_name: &str,
        state: ProcessState,
        seconds: i64,
        filter: &StateFilter,
    ) -> Result<Vec<Process>, sqlx::Error> {
        filter
            .apply(Process::scope().in_colony(colony_name).with_state(state))
            .submitted_within(seconds)
            .order_by_submission_time(true)
            .all(&self.pool)
            .await
    }

    /// Find the best candidate and claim it in a single statement.
    ///
    /// The candidate row is locked with `FOR UPDATE SKIP LOCKED`, so
    /// concurrent callers never receive the same process and never block on
    /// each other. Returns `None` when nothing is claimable.
    #[instrument(skip(self, query), fields(colony = %query.colony_name))]
    pub async fn select_and_assign(
        &self,
        executor_id: &str,
        query: &CandidateQuery,
    ) -> ColoniesResult<Option<Process>> {
        let mut builder = QueryBuilder::new(
            "UPDATE colonies_processes SET is_assigned = TRUE, start_time = NOW(), assigned_executor_id = ",
        );
        builder.push_bind(executor_id.to_string());
        builder.push(", state = ");
        builder.push_bind(ProcessState::Running);
        builder.push(
            ", exec_deadline = CASE \
                WHEN (spec->>'max_exec_time')::BIGINT > 0 \
                THEN NOW() + make_interval(secs => (spec->>'max_exec_time')::DOUBLE PRECISION) \
                ELSE exec_deadline END \
             WHERE process_id = (",
        );
        query.scope(1).push_select(&mut builder, "process_id");
        builder.push(" FOR UPDATE SKIP LOCKED) RETURNING ");
        builder.push(PROCESS_COLUMNS);

        let mut tx = self.pool.begin().await?;
        let claimed = builder
            .build_query_as::<Process>()
            .fetch_optional(&mut *tx)
            .await?;

        let Some(process) = claimed else {
            tx.rollback().await?;
            return Ok(None);
        };

        Attribute::set_state_with_transaction(&mut tx, &process.process_id, ProcessState::Running)
            .await?;
        tx.commit().await?;

        info!(process_id = %process.process_id, executor_id, "Process selected and assigned");
        Ok(Process::with_env(&self.pool, vec![process]).await?.pop())
    }
}
