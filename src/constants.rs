//! # System Constants
//!
//! Table names, sentinels and operational defaults shared by the process
//! store, the candidate matcher and the coordinator-side primitives.

use std::time::Duration;

/// Table names backing each store
pub mod tables {
    pub const PROCESSES: &str = "colonies_processes";
    pub const PROCESS_GRAPHS: &str = "colonies_process_graphs";
    pub const ATTRIBUTES: &str = "colonies_attributes";
    pub const LOGS: &str = "colonies_logs";
}

/// Target-executor sentinel meaning "any executor of the right type"
pub const WILDCARD_EXECUTOR: &str = "*";

/// Graph ID carried by processes submitted outside a process graph
pub const NO_PROCESS_GRAPH: &str = "";

/// Length of generated entity IDs in hex characters
pub const ID_LENGTH: usize = 64;

/// Scheduling defaults
pub mod scheduling {
    /// Microseconds of head start granted per priority class
    pub const DEFAULT_PRIORITY_WEIGHT_MICROS: i64 = 60 * 1_000_000;

    /// Upper bound applied when callers ask for "all" candidates
    pub const MAX_CANDIDATE_COUNT: i64 = 100;

    /// Longest wait or execution budget a process may ask for (ten years)
    pub const MAX_BUDGET_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;
}

/// Distributed lock defaults
pub mod lock {
    use super::Duration;

    /// Lock serialising generator and cron evaluation across replicas
    pub const DEFAULT_LOCK_NAME: &str = "colonies_coordinator";

    /// Lock serialising retention sweeps across replicas
    pub const RETENTION_LOCK_NAME: &str = "colonies_retention";

    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Retention defaults
pub mod retention {
    /// One week
    pub const DEFAULT_RETENTION_PERIOD_SECONDS: i64 = 7 * 24 * 60 * 60;
    pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;
}
