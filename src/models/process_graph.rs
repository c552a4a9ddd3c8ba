//! # Process Graph Model
//!
//! A DAG of processes submitted and tracked as one workflow.
//!
//! ## Overview
//!
//! The graph row only stores the colony, the root process IDs and an
//! aggregated state. Membership is the other direction: every process whose
//! `process_graph_id` equals the graph's ID belongs to it. Deleting a graph
//! therefore deletes those processes and their attributes in the same
//! transaction.
//!
//! Graph state timestamps are side effects of specific transitions (see
//! [`graph_transition_stamp`]), never independent inputs.

use crate::error::{ColoniesError, ColoniesResult};
use crate::models::function_spec::FunctionSpec;
use crate::models::generate_id;
use crate::models::process::{NewProcess, Process};
use crate::orchestration::priority::{PriorityStrategy, PriorityWeightedFifo};
use crate::state_machine::{graph_transition_stamp, GraphStamp, ProcessState};
use crate::validation::validate_graph_structure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const GRAPH_COLUMNS: &str = "process_graph_id, colony_name, root_process_ids, state, \
    initiator_id, initiator_name, submission_time, start_time, end_time";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProcessGraph {
    pub process_graph_id: String,
    pub colony_name: String,
    pub root_process_ids: Vec<String>,
    pub state: ProcessState,
    pub initiator_id: String,
    pub initiator_name: String,
    pub submission_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// New ProcessGraph for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcessGraph {
    pub process_graph_id: String,
    pub colony_name: String,
    pub root_process_ids: Vec<String>,
    pub initiator_id: String,
    pub initiator_name: String,
}

impl NewProcessGraph {
    pub fn new(colony_name: impl Into<String>, root_process_ids: Vec<String>) -> Self {
        Self {
            process_graph_id: generate_id(),
            colony_name: colony_name.into(),
            root_process_ids,
            initiator_id: String::new(),
            initiator_name: String::new(),
        }
    }
}

/// Rows removed by a cascading graph deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeCounts {
    pub graphs: u64,
    pub processes: u64,
}

impl ProcessGraph {
    /// Persist the graph row only; member processes are added separately
    pub async fn create(pool: &PgPool, new_graph: NewProcessGraph) -> Result<ProcessGraph, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let graph = Self::create_with_transaction(&mut tx, new_graph).await?;
        tx.commit().await?;
        Ok(graph)
    }

    pub async fn create_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        new_graph: NewProcessGraph,
    ) -> Result<ProcessGraph, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO colonies_process_graphs (
                process_graph_id, colony_name, root_process_ids, state,
                initiator_id, initiator_name, submission_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {GRAPH_COLUMNS}
            "#
        );
        sqlx::query_as::<_, ProcessGraph>(&sql)
            .bind(&new_graph.process_graph_id)
            .bind(&new_graph.colony_name)
            .bind(&new_graph.root_process_ids)
            .bind(ProcessState::Waiting)
            .bind(&new_graph.initiator_id)
            .bind(&new_graph.initiator_name)
            .fetch_one(&mut **tx)
            .await
    }

    /// Submit a whole workflow with the default priority strategy
    pub async fn submit(
        pool: &PgPool,
        colony_name: &str,
        specs: Vec<FunctionSpec>,
    ) -> ColoniesResult<(ProcessGraph, Vec<Process>)> {
        Self::submit_with_strategy(pool, colony_name, specs, &PriorityWeightedFifo::default()).await
    }

    /// Submit a whole workflow in one transaction.
    ///
    /// Every spec is identified by its `node_name`, and its
    /// `conditions.dependencies` name the nodes it waits for. Roots are the
    /// nodes without dependencies; every other member starts with
    /// `wait_for_parents` set.
    #[instrument(skip(pool, specs, strategy), fields(colony = %colony_name, size = specs.len()))]
    pub async fn submit_with_strategy(
        pool: &PgPool,
        colony_name: &str,
        specs: Vec<FunctionSpec>,
        strategy: &dyn PriorityStrategy,
    ) -> ColoniesResult<(ProcessGraph, Vec<Process>)> {
        let mut members: HashMap<String, Vec<String>> = HashMap::with_capacity(specs.len());
        for spec in &specs {
            if spec.node_name.is_empty() {
                return Err(ColoniesError::Validation(
                    "Every process of a graph needs a node name".to_string(),
                ));
            }
            if !spec.conditions.colony_name.is_empty() && spec.conditions.colony_name != colony_name {
                return Err(ColoniesError::Validation(format!(
                    "Node {} targets colony {} but the graph belongs to {colony_name}",
                    spec.node_name, spec.conditions.colony_name
                )));
            }
            if members
                .insert(spec.node_name.clone(), spec.conditions.dependencies.clone())
                .is_some()
            {
                return Err(ColoniesError::Validation(format!(
                    "Duplicate node name {}",
                    spec.node_name
                )));
            }
        }

        let root_names: Vec<String> = specs
            .iter()
            .filter(|spec| spec.conditions.dependencies.is_empty())
            .map(|spec| spec.node_name.clone())
            .collect();
        validate_graph_structure(&root_names, &members)?;

        let mut new_graph = NewProcessGraph::new(colony_name, Vec::new());
        let mut new_processes: Vec<NewProcess> = specs
            .into_iter()
            .map(|mut spec| {
                spec.conditions.colony_name = colony_name.to_string();
                let mut new_process = NewProcess::new(spec);
                new_process.process_graph_id = new_graph.process_graph_id.clone();
                new_process
            })
            .collect();

        let ids: HashMap<String, String> = new_processes
            .iter()
            .map(|p| (p.spec.node_name.clone(), p.process_id.clone()))
            .collect();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for new_process in &mut new_processes {
            new_process.parents = new_process
                .spec
                .conditions
                .dependencies
                .iter()
                .filter_map(|name| ids.get(name).cloned())
                .collect();
            new_process.wait_for_parents = !new_process.parents.is_empty();
            for parent in &new_process.parents {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(new_process.process_id.clone());
            }
        }
        for new_process in &mut new_processes {
            new_process.children = children.remove(&new_process.process_id).unwrap_or_default();
        }

        new_graph.root_process_ids = root_names
            .iter()
            .filter_map(|name| ids.get(name).cloned())
            .collect();

        let mut tx = pool.begin().await?;
        let graph = Self::create_with_transaction(&mut tx, new_graph).await?;
        let mut processes = Vec::with_capacity(new_processes.len());
        for new_process in new_processes {
            processes.push(Process::create_with_transaction(&mut tx, new_process, strategy).await?);
        }
        tx.commit().await?;

        info!(
            process_graph_id = %graph.process_graph_id,
            roots = graph.root_process_ids.len(),
            "Process graph submitted"
        );
        Ok((graph, processes))
    }

    pub async fn find_by_id(pool: &PgPool, process_graph_id: &str) -> Result<Option<ProcessGraph>, sqlx::Error> {
        let sql = format!("SELECT {GRAPH_COLUMNS} FROM colonies_process_graphs WHERE process_graph_id = $1");
        sqlx::query_as::<_, ProcessGraph>(&sql)
            .bind(process_graph_id)
            .fetch_optional(pool)
            .await
    }

    /// Graphs of a colony in one state, most recent first
    pub async fn find_by_state(
        pool: &PgPool,
        colony_name: &str,
        state: ProcessState,
        count: i64,
    ) -> Result<Vec<ProcessGraph>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {GRAPH_COLUMNS} FROM colonies_process_graphs
            WHERE colony_name = $1 AND state = $2
            ORDER BY submission_time DESC
            LIMIT $3
            "#
        );
        sqlx::query_as::<_, ProcessGraph>(&sql)
            .bind(colony_name)
            .bind(state)
            .bind(count)
            .fetch_all(pool)
            .await
    }

    /// Move the graph to a new state, stamping start or end time as the transition requires
    #[instrument(skip(pool))]
    pub async fn set_state(pool: &PgPool, process_graph_id: &str, state: ProcessState) -> ColoniesResult<()> {
        let mut tx = pool.begin().await?;
        let current: ProcessState = sqlx::query_scalar(
            "SELECT state FROM colonies_process_graphs WHERE process_graph_id = $1 FOR UPDATE",
        )
        .bind(process_graph_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ColoniesError::not_found("process graph", process_graph_id))?;

        let sql = match graph_transition_stamp(current, state) {
            GraphStamp::StartTime => {
                "UPDATE colonies_process_graphs SET state = $2, start_time = NOW() WHERE process_graph_id = $1"
            }
            GraphStamp::EndTime => {
                "UPDATE colonies_process_graphs SET state = $2, end_time = NOW() WHERE process_graph_id = $1"
            }
            GraphStamp::StateOnly => {
                "UPDATE colonies_process_graphs SET state = $2 WHERE process_graph_id = $1"
            }
        };
        sqlx::query(sql)
            .bind(process_graph_id)
            .bind(state)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(from = %current, to = %state, "Process graph state changed");
        Ok(())
    }

    // ============================================================================
    // CASCADING DELETION
    // ============================================================================

    /// Delete a graph, its member processes and their attributes
    pub async fn delete(pool: &PgPool, process_graph_id: &str) -> Result<CascadeCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let counts = Self::delete_with_transaction(&mut tx, process_graph_id).await?;
        tx.commit().await?;
        Ok(counts)
    }

    pub async fn delete_with_transaction(
        tx: &mut Transaction<'_, Postgres>,
        process_graph_id: &str,
    ) -> Result<CascadeCounts, sqlx::Error> {
        let graphs = sqlx::query("DELETE FROM colonies_process_graphs WHERE process_graph_id = $1")
            .bind(process_graph_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        let processes = Process::delete_all_by_process_graph_with_transaction(tx, process_graph_id).await?;
        Ok(CascadeCounts { graphs, processes })
    }

    async fn delete_selected(pool: &PgPool, ids: Vec<String>) -> Result<CascadeCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut counts = CascadeCounts::default();
        for process_graph_id in ids {
            let deleted = Self::delete_with_transaction(&mut tx, &process_graph_id).await?;
            counts.graphs += deleted.graphs;
            counts.processes += deleted.processes;
        }
        tx.commit().await?;
        Ok(counts)
    }

    /// Delete all graphs of a colony, optionally only those in one state.
    ///
    /// Deleting RUNNING graphs can leave executors holding processes that no
    /// longer exist; callers decide whether that is acceptable.
    pub async fn delete_all_by_colony(
        pool: &PgPool,
        colony_name: &str,
        state: Option<ProcessState>,
    ) -> Result<CascadeCounts, sqlx::Error> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT process_graph_id FROM colonies_process_graphs
            WHERE colony_name = $1 AND ($2::INTEGER IS NULL OR state = $2)
            "#,
        )
        .bind(colony_name)
        .bind(state)
        .fetch_all(pool)
        .await?;
        Self::delete_selected(pool, ids).await
    }

    /// Delete successful graphs submitted before the cutoff, with their members
    pub async fn delete_successful_older_than(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<CascadeCounts, sqlx::Error> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT process_graph_id FROM colonies_process_graphs WHERE state = $1 AND submission_time < $2",
        )
        .bind(ProcessState::Success)
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
        Self::delete_selected(pool, ids).await
    }

    pub async fn delete_all(pool: &PgPool) -> Result<CascadeCounts, sqlx::Error> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT process_graph_id FROM colonies_process_graphs")
            .fetch_all(pool)
            .await?;
        Self::delete_selected(pool, ids).await
    }

    // ============================================================================
    // COUNTS
    // ============================================================================

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM colonies_process_graphs")
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_state(pool: &PgPool, state: ProcessState) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM colonies_process_graphs WHERE state = $1")
            .bind(state)
            .fetch_one(pool)
            .await
    }

    pub async fn count_by_colony_and_state(
        pool: &PgPool,
        colony_name: &str,
        state: ProcessState,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM colonies_process_graphs WHERE colony_name = $1 AND state = $2",
        )
        .bind(colony_name)
        .bind(state)
        .fetch_one(pool)
        .await
    }
}
