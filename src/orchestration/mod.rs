//! # Orchestration
//!
//! Coordinator-side components that sit on top of the stores in [`crate::models`].
//!
//! ## Core Components
//!
//! - [`candidate_matcher`]: admission filtering and dispatch ordering for idle executors
//! - [`priority`]: pluggable priority-time strategies used at submission
//! - [`graph_resolver`]: DAG evaluation over an arena of graph members
//! - [`distributed_lock`]: advisory-lock mutual exclusion across coordinator replicas
//! - [`retention`]: age and state based sweep of successful data

pub mod candidate_matcher;
pub mod distributed_lock;
pub mod graph_resolver;
pub mod priority;
pub mod retention;

pub use candidate_matcher::{CandidateMatcher, CandidateQuery, StateFilter};
pub use distributed_lock::{lock_key, DistributedLock};
pub use graph_resolver::{
    GraphNode, GraphResolver, GraphStorage, PgGraphStorage, ProcessArena, ResolutionPlan,
    StateCounts,
};
pub use priority::{PriorityStrategy, PriorityWeightedFifo};
pub use retention::{RetentionReport, RetentionSweeper};
