//! # Graph Resolver
//!
//! Evaluates a process graph from the states of its members.
//!
//! Members are loaded selectively into a [`ProcessArena`] keyed by process
//! ID. Parent and child lists are plain ID edges into the arena, so the DAG
//! is walked by lookup and never by embedding processes in each other.
//!
//! Resolution is split in two: [`ProcessArena::plan`] is a pure function of
//! the member states, and [`GraphResolver::resolve`] applies the plan through
//! a [`GraphStorage`] backend.

use crate::error::{ColoniesError, ColoniesResult};
use crate::models::{Process, ProcessGraph};
use crate::state_machine::{graph_progression, ProcessState};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

/// The DAG-relevant view of one member process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub process_id: String,
    pub state: ProcessState,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub wait_for_parents: bool,
}

impl From<&Process> for GraphNode {
    fn from(process: &Process) -> Self {
        Self {
            process_id: process.process_id.clone(),
            state: process.state,
            parents: process.parents.clone(),
            children: process.children.clone(),
            wait_for_parents: process.wait_for_parents,
        }
    }
}

/// Member counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub waiting: usize,
    pub running: usize,
    pub successful: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.running + self.successful + self.failed
    }
}

/// What a resolution pass has to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    /// Members whose parents all succeeded and that still wait for them
    pub release: Vec<String>,
    /// Unfinished members to fail because a parent failed
    pub fail: Vec<String>,
    pub graph_state: ProcessState,
}

/// Arena of graph members keyed by process ID
#[derive(Debug, Clone, Default)]
pub struct ProcessArena {
    roots: Vec<String>,
    nodes: HashMap<String, GraphNode>,
}

impl ProcessArena {
    pub fn new(roots: Vec<String>, nodes: impl IntoIterator<Item = GraphNode>) -> Self {
        Self {
            roots,
            nodes: nodes
                .into_iter()
                .map(|node| (node.process_id.clone(), node))
                .collect(),
        }
    }

    pub fn get(&self, process_id: &str) -> Option<&GraphNode> {
        self.nodes.get(process_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first walk from the roots; every reachable member is visited once
    pub fn iterate(&self) -> Vec<&GraphNode> {
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&str> = self.roots.iter().rev().map(String::as_str).collect();

        while let Some(process_id) = stack.pop() {
            if !visited.insert(process_id) {
                continue;
            }
            let Some(node) = self.nodes.get(process_id) else {
                continue;
            };
            order.push(node);
            stack.extend(node.children.iter().rev().map(String::as_str));
        }

        order
    }

    /// Members without children
    pub fn leaves(&self) -> Vec<&GraphNode> {
        self.iterate()
            .into_iter()
            .filter(|node| node.children.is_empty())
            .collect()
    }

    /// Length of the longest parent chain above a member; roots have depth 0
    pub fn depth(&self, process_id: &str) -> Option<usize> {
        fn walk<'a>(
            arena: &'a ProcessArena,
            process_id: &'a str,
            memo: &mut HashMap<&'a str, usize>,
        ) -> usize {
            if let Some(depth) = memo.get(process_id) {
                return *depth;
            }
            let depth = arena
                .nodes
                .get(process_id)
                .map(|node| {
                    node.parents
                        .iter()
                        .filter(|parent| arena.nodes.contains_key(parent.as_str()))
                        .map(|parent| walk(arena, parent, memo) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            memo.insert(process_id, depth);
            depth
        }

        self.nodes.get(process_id)?;
        Some(walk(self, process_id, &mut HashMap::new()))
    }

    /// Root reached by following first parents upwards
    pub fn root_of(&self, process_id: &str) -> Option<&str> {
        let mut current = self.nodes.get(process_id)?;
        let mut seen = HashSet::new();
        while let Some(parent) = current.parents.first() {
            if !seen.insert(current.process_id.as_str()) {
                return None;
            }
            current = self.nodes.get(parent)?;
        }
        Some(current.process_id.as_str())
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for node in self.nodes.values() {
            match node.state {
                ProcessState::Waiting => counts.waiting += 1,
                ProcessState::Running => counts.running += 1,
                ProcessState::Success => counts.successful += 1,
                ProcessState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn parent_states(&self, node: &GraphNode) -> Vec<ProcessState> {
        node.parents
            .iter()
            .filter_map(|parent| self.nodes.get(parent))
            .map(|parent| parent.state)
            .collect()
    }

    /// Work out what the graph and its members should look like now
    pub fn plan(&self) -> ResolutionPlan {
        let nodes = self.iterate();

        let parent_failed = nodes
            .iter()
            .any(|node| self.parent_states(node).contains(&ProcessState::Failed));
        if parent_failed {
            return ResolutionPlan {
                release: Vec::new(),
                fail: nodes
                    .iter()
                    .filter(|node| !node.state.is_terminal())
                    .map(|node| node.process_id.clone())
                    .collect(),
                graph_state: ProcessState::Failed,
            };
        }

        let release = nodes
            .iter()
            .filter(|node| node.wait_for_parents)
            .filter(|node| {
                self.parent_states(node)
                    .iter()
                    .all(|state| *state == ProcessState::Success)
            })
            .map(|node| node.process_id.clone())
            .collect();

        let counts = self.counts();
        let graph_state = if counts.failed > 0 {
            ProcessState::Failed
        } else if counts.total() > 0 && counts.successful == counts.total() {
            ProcessState::Success
        } else if counts.running > 0 || counts.successful > 0 {
            ProcessState::Running
        } else {
            ProcessState::Waiting
        };

        ResolutionPlan {
            release,
            fail: Vec::new(),
            graph_state,
        }
    }
}

/// Storage operations the resolver needs
#[async_trait]
pub trait GraphStorage: Send + Sync {
    async fn load_graph(&self, process_graph_id: &str) -> ColoniesResult<Option<ProcessGraph>>;
    async fn load_members(&self, process_graph_id: &str) -> ColoniesResult<Vec<GraphNode>>;
    async fn release(&self, process_id: &str) -> ColoniesResult<()>;
    async fn fail(&self, process_id: &str, errors: Vec<String>) -> ColoniesResult<()>;
    async fn set_graph_state(&self, process_graph_id: &str, state: ProcessState) -> ColoniesResult<()>;
}

/// PostgreSQL-backed graph storage
#[derive(Debug, Clone)]
pub struct PgGraphStorage {
    pool: PgPool,
}

impl PgGraphStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStorage for PgGraphStorage {
    async fn load_graph(&self, process_graph_id: &str) -> ColoniesResult<Option<ProcessGraph>> {
        Ok(ProcessGraph::find_by_id(&self.pool, process_graph_id).await?)
    }

    async fn load_members(&self, process_graph_id: &str) -> ColoniesResult<Vec<GraphNode>> {
        let members = Process::list_by_process_graph(&self.pool, process_graph_id).await?;
        Ok(members.iter().map(GraphNode::from).collect())
    }

    async fn release(&self, process_id: &str) -> ColoniesResult<()> {
        Process::set_wait_for_parents(&self.pool, process_id, false).await
    }

    async fn fail(&self, process_id: &str, errors: Vec<String>) -> ColoniesResult<()> {
        Process::mark_failed(&self.pool, process_id, errors).await
    }

    async fn set_graph_state(&self, process_graph_id: &str, state: ProcessState) -> ColoniesResult<()> {
        ProcessGraph::set_state(&self.pool, process_graph_id, state).await
    }
}

pub struct GraphResolver<S: GraphStorage> {
    storage: S,
}

impl GraphResolver<PgGraphStorage> {
    pub fn with_pool(pool: PgPool) -> Self {
        Self::new(PgGraphStorage::new(pool))
    }
}

impl<S: GraphStorage> GraphResolver<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub async fn load(&self, process_graph_id: &str) -> ColoniesResult<(ProcessGraph, ProcessArena)> {
        let graph = self
            .storage
            .load_graph(process_graph_id)
            .await?
            .ok_or_else(|| ColoniesError::not_found("process graph", process_graph_id))?;
        let members = self.storage.load_members(process_graph_id).await?;
        let arena = ProcessArena::new(graph.root_process_ids.clone(), members);
        Ok((graph, arena))
    }

    /// Release ready members, cascade parent failures and move the graph state forward
    #[instrument(skip(self))]
    pub async fn resolve(&self, process_graph_id: &str) -> ColoniesResult<ProcessState> {
        let (graph, arena) = self.load(process_graph_id).await?;
        let plan = arena.plan();

        try_join_all(plan.release.iter().map(|id| self.storage.release(id))).await?;
        let reason = format!("A parent process in graph {process_graph_id} failed");
        try_join_all(
            plan.fail
                .iter()
                .map(|id| self.storage.fail(id, vec![reason.clone()])),
        )
        .await?;
        let next = graph_progression(graph.state, plan.graph_state);
        if next != graph.state {
            self.storage.set_graph_state(process_graph_id, next).await?;
            info!(from = %graph.state, to = %next, "Process graph resolved");
        }

        debug!(
            released = plan.release.len(),
            failed = plan.fail.len(),
            "Process graph resolution applied"
        );
        Ok(next)
    }
}
