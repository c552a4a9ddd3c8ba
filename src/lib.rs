#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Colonies Core
//!
//! Process scheduling, dependency-graph and attribute-lifecycle core of a
//! distributed compute-job orchestrator.
//!
//! ## Overview
//!
//! Executors in a colony pull work from a shared PostgreSQL-backed process
//! store. This crate owns everything between submission and retention:
//!
//! - the process lifecycle (WAITING → RUNNING → SUCCESS | FAILED) with
//!   at-most-one assignment under concurrent claims
//! - candidate matching and priority-ordered dispatch
//! - process graphs (DAGs of processes) with cascading deletion
//! - typed key/value attributes whose state mirrors their process
//! - a distributed advisory lock for coordinator replicas
//! - the retention sweep of aged, successful data
//!
//! ## Module Organization
//!
//! - [`models`] - Processes, graphs, attributes and logs
//! - [`state_machine`] - Lifecycle states and transition guards
//! - [`scopes`] - Composable process queries
//! - [`orchestration`] - Candidate matching, graph resolution, locking, retention
//! - [`database`] - Connection pooling and migrations
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colonies_core::models::{FunctionSpec, NewProcess, Process};
//! use colonies_core::orchestration::{CandidateMatcher, CandidateQuery};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let spec = FunctionSpec::new("echo", "dev", "cli");
//! let process = Process::create(&pool, NewProcess::new(spec)).await?;
//!
//! let matcher = CandidateMatcher::new(pool.clone());
//! let query = CandidateQuery::new("dev", "cli").for_executor("worker-1");
//! if let Some(claimed) = matcher.select_and_assign("executor-1", &query).await? {
//!     assert_eq!(claimed.process_id, process.process_id);
//!     Process::mark_successful(&pool, &claimed.process_id).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests, DATABASE_URL must point at PostgreSQL
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod scopes;
pub mod state_machine;
pub mod validation;

pub use config::{CoreConfig, DatabaseConfig, LockConfig, RetentionConfig, SchedulingConfig};
pub use constants::{WILDCARD_EXECUTOR, NO_PROCESS_GRAPH};
pub use error::{ColoniesError, ColoniesResult};
pub use models::{Attribute, FunctionSpec, NewAttribute, NewProcess, Process, ProcessGraph};
pub use orchestration::{
    CandidateMatcher, CandidateQuery, DistributedLock, GraphResolver, RetentionSweeper,
};
pub use state_machine::{AttributeType, ProcessState};
