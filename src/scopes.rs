//! # Query Scopes
//!
//! Chainable, composable process queries.
//!
//! A [`ProcessScope`] collects filters first and renders them into a
//! `sqlx::QueryBuilder` only when executed. The same filters can therefore
//! be rendered as a row query, a count, or the locking subquery used by the
//! atomic select-and-assign path, with every value bound as a parameter.
//!
//! ```rust,no_run
//! use colonies_core::models::Process;
//! use colonies_core::scopes::ScopeBuilder;
//! use colonies_core::state_machine::ProcessState;
//! # async fn example(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
//! let running = Process::scope()
//!     .in_colony("dev")
//!     .with_state(ProcessState::Running)
//!     .order_by_start_time()
//!     .limit(10)
//!     .all(pool)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::manual_async_fn)]

use crate::constants::WILDCARD_EXECUTOR;
use crate::models::process::PROCESS_COLUMNS;
use crate::models::Process;
use crate::state_machine::ProcessState;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Common trait for all scope builders
pub trait ScopeBuilder<T> {
    /// Build the final query and execute it
    fn all(
        self,
        pool: &PgPool,
    ) -> impl std::future::Future<Output = Result<Vec<T>, sqlx::Error>> + Send;

    /// Get a single result (first match)
    fn first(
        self,
        pool: &PgPool,
    ) -> impl std::future::Future<Output = Result<Option<T>, sqlx::Error>> + Send;

    /// Count the number of results
    fn count(
        self,
        pool: &PgPool,
    ) -> impl std::future::Future<Output = Result<i64, sqlx::Error>> + Send;

    /// Check if any results exist
    fn exists(
        self,
        pool: &PgPool,
    ) -> impl std::future::Future<Output = Result<bool, sqlx::Error>> + Send;
}

/// Resources an executor offers; a process asking for more is not a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorCapacity {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub storage_bytes: i64,
    pub gpu_count: i32,
    pub gpu_memory_bytes: i64,
    pub nodes: i32,
    pub processes: i32,
    pub processes_per_node: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GraphMembership {
    StandAlone,
    AnyGraph,
    Graph(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessOrder {
    PriorityTime,
    StartTimeAsc,
    EndTimeDesc,
    SubmissionTime { ascending: bool },
}

/// Query builder for Process scopes
#[derive(Debug, Clone, Default)]
pub struct ProcessScope {
    colony_name: Option<String>,
    state: Option<ProcessState>,
    executor_type: Option<String>,
    label: Option<String>,
    initiator_name: Option<String>,
    target_executor: Option<String>,
    untargeted: bool,
    unassigned: bool,
    ready: bool,
    submitted_within_seconds: Option<i64>,
    assigned_to: Option<String>,
    membership: Option<GraphMembership>,
    capacity: Option<ExecutorCapacity>,
    order: Option<ProcessOrder>,
    limit: Option<i64>,
}

impl Process {
    /// Start building a scoped query
    pub fn scope() -> ProcessScope {
        ProcessScope::default()
    }
}

impl ProcessScope {
    pub fn in_colony(mut self, colony_name: impl Into<String>) -> Self {
        self.colony_name = Some(colony_name.into());
        self
    }

    pub fn with_state(mut self, state: ProcessState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_executor_type(mut self, executor_type: impl Into<String>) -> Self {
        self.executor_type = Some(executor_type.into());
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

    /// Processes that name this executor, or accept any executor
    pub fn targeting_executor(mut self, executor_name: impl Into<String>) -> Self {
        self.target_executor = Some(executor_name.into());
        self
    }

    /// Processes that accept any executor and name none in particular
    pub fn untargeted(mut self) -> Self {
        self.untargeted = true;
        self
    }

    pub fn unassigned(mut self) -> Self {
        self.unassigned = true;
        self
    }

    /// Processes not waiting for their parents
    pub fn ready(mut self) -> Self {
        self.ready = true;
        self
    }

    /// Submitted within the last `seconds` seconds
    pub fn submitted_within(mut self, seconds: i64) -> Self {
        self.submitted_within_seconds = Some(seconds);
        self
    }

    pub fn assigned_to(mut self, executor_id: impl Into<String>) -> Self {
        self.assigned_to = Some(executor_id.into());
        self
    }

    pub fn in_process_graph(mut self, process_graph_id: impl Into<String>) -> Self {
        self.membership = Some(GraphMembership::Graph(process_graph_id.into()));
        self
    }

    pub fn stand_alone(mut self) -> Self {
        self.membership = Some(GraphMembership::StandAlone);
        self
    }

    pub fn in_any_process_graph(mut self) -> Self {
        self.membership = Some(GraphMembership::AnyGraph);
        self
    }

    pub fn within_capacity(mut self, capacity: ExecutorCapacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Dispatch order: lowest priority time first
    pub fn order_by_priority(mut self) -> Self {
        self.order = Some(ProcessOrder::PriorityTime);
        self
    }

    /// Oldest start first
    pub fn order_by_start_time(mut self) -> Self {
        self.order = Some(ProcessOrder::StartTimeAsc);
        self
    }

    /// Most recently finished first
    pub fn order_by_end_time(mut self) -> Self {
        self.order = Some(ProcessOrder::EndTimeDesc);
        self
    }

    pub fn order_by_submission_time(mut self, ascending: bool) -> Self {
        self.order = Some(ProcessOrder::SubmissionTime { ascending });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render `SELECT {projection} FROM colonies_processes` with all filters,
    /// ordering and limit applied
    pub(crate) fn push_select(&self, query: &mut QueryBuilder<'static, Postgres>, projection: &str) {
        query.push(format!("SELECT {projection} FROM colonies_processes"));
        self.push_conditions(query);
        self.push_order(query);
        if let Some(limit) = self.limit {
            query.push(" LIMIT ");
            query.push_bind(limit);
        }
    }

    fn push_conditions(&self, query: &mut QueryBuilder<'static, Postgres>) {
        let mut has_conditions = false;
        let mut add_condition = |query: &mut QueryBuilder<'static, Postgres>, condition: &str| {
            if has_conditions {
                query.push(" AND ");
            } else {
                query.push(" WHERE ");
                has_conditions = true;
            }
            query.push(condition);
        };

        if let Some(colony_name) = &self.colony_name {
            add_condition(query, "colony_name = ");
            query.push_bind(colony_name.clone());
        }
        if let Some(state) = self.state {
            add_condition(query, "state = ");
            query.push_bind(state);
        }
        if let Some(executor_type) = &self.executor_type {
            add_condition(query, "executor_type = ");
            query.push_bind(executor_type.clone());
        }
        if let Some(label) = &self.label {
            add_condition(query, "label = ");
            query.push_bind(label.clone());
        }
        if let Some(initiator_name) = &self.initiator_name {
            add_condition(query, "initiator_name = ");
            query.push_bind(initiator_name.clone());
        }
        if let Some(executor_name) = &self.target_executor {
            add_condition(query, "(");
            query.push_bind(executor_name.clone());
            query.push(" = ANY(executor_names) OR ");
            query.push_bind(WILDCARD_EXECUTOR);
            query.push(" = ANY(executor_names))");
        }
        if self.untargeted {
            add_condition(query, "");
            query.push_bind(WILDCARD_EXECUTOR);
            query.push(" = ANY(executor_names)");
        }
        if self.unassigned {
            add_condition(query, "is_assigned = FALSE");
        }
        if self.ready {
            add_condition(query, "wait_for_parents = FALSE");
        }
        if let Some(seconds) = self.submitted_within_seconds {
            add_condition(query, "submission_time >= NOW() - make_interval(secs => ");
            query.push_bind(seconds as f64);
            query.push(")");
        }
        if let Some(executor_id) = &self.assigned_to {
            add_condition(query, "assigned_executor_id = ");
            query.push_bind(executor_id.clone());
        }
        match &self.membership {
            Some(GraphMembership::StandAlone) => add_condition(query, "process_graph_id = ''"),
            Some(GraphMembership::AnyGraph) => add_condition(query, "process_graph_id <> ''"),
            Some(GraphMembership::Graph(process_graph_id)) => {
                add_condition(query, "process_graph_id = ");
                query.push_bind(process_graph_id.clone());
            }
            None => {}
        }
        if let Some(capacity) = self.capacity {
            add_condition(query, "cpu_millis <= ");
            query.push_bind(capacity.cpu_millis);
            query.push(" AND memory_bytes <= ");
            query.push_bind(capacity.memory_bytes);
            query.push(" AND storage_bytes <= ");
            query.push_bind(capacity.storage_bytes);
            query.push(" AND gpu_count <= ");
            query.push_bind(capacity.gpu_count);
            query.push(" AND gpu_memory_bytes <= ");
            query.push_bind(capacity.gpu_memory_bytes);
            query.push(" AND nodes <= ");
            query.push_bind(capacity.nodes);
            query.push(" AND processes <= ");
            query.push_bind(capacity.processes);
            query.push(" AND processes_per_node <= ");
            query.push_bind(capacity.processes_per_node);
        }
    }

    fn push_order(&self, query: &mut QueryBuilder<'static, Postgres>) {
        match self.order {
            Some(ProcessOrder::PriorityTime) => {
                query.push(" ORDER BY priority_time ASC, submission_time ASC, process_id ASC")
            }
            Some(ProcessOrder::StartTimeAsc) => query.push(" ORDER BY start_time ASC"),
            Some(ProcessOrder::EndTimeDesc) => query.push(" ORDER BY end_time DESC"),
            Some(ProcessOrder::SubmissionTime { ascending: true }) => {
                query.push(" ORDER BY submission_time ASC")
            }
            Some(ProcessOrder::SubmissionTime { ascending: false }) => {
                query.push(" ORDER BY submission_time DESC")
            }
            None => query,
        };
    }

    fn build_select(&self) -> QueryBuilder<'static, Postgres> {
        let mut query = QueryBuilder::new("");
        self.push_select(&mut query, PROCESS_COLUMNS);
        query
    }
}

impl ScopeBuilder<Process> for ProcessScope {
    async fn all(self, pool: &PgPool) -> Result<Vec<Process>, sqlx::Error> {
        let mut query = self.build_select();
        let processes = query.build_query_as::<Process>().fetch_all(pool).await?;
        Process::with_env(pool, processes).await
    }

    async fn first(self, pool: &PgPool) -> Result<Option<Process>, sqlx::Error> {
        let processes = self.limit(1).all(pool).await?;
        Ok(processes.into_iter().next())
    }

    async fn count(self, pool: &PgPool) -> Result<i64, sqlx::Error> {
        let mut query = QueryBuilder::new("");
        let unbounded = ProcessScope {
            order: None,
            limit: None,
            ..self
        };
        unbounded.push_select(&mut query, "COUNT(*)");
        query.build_query_scalar::<i64>().fetch_one(pool).await
    }

    async fn exists(self, pool: &PgPool) -> Result<bool, sqlx::Error> {
        let mut query = QueryBuilder::new("");
        self.limit(1).push_select(&mut query, "1");
        let row = query.build().fetch_optional(pool).await?;
        Ok(row.is_some())
    }
}
