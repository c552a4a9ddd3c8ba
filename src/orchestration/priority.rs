//! # Dispatch Priority
//!
//! The priority timestamp stored on every process is computed once, at
//! submission, from the process's priority class and submission time. The
//! candidate matcher only ever orders by the stored value, so the weighting
//! can change without touching any query.

use crate::config::SchedulingConfig;
use crate::constants::scheduling::DEFAULT_PRIORITY_WEIGHT_MICROS;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Computes the orderable dispatch key of a process; lower values run sooner
pub trait PriorityStrategy: Send + Sync + Debug {
    fn priority_time(&self, priority: i32, submitted_at: DateTime<Utc>) -> i64;
}

/// Priority-weighted FIFO.
///
/// Each priority class moves a process `weight_micros` ahead of processes
/// submitted at the same instant; equal priorities fall back to submission
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityWeightedFifo {
    pub weight_micros: i64,
}

impl PriorityWeightedFifo {
    pub fn new(weight_micros: i64) -> Self {
        Self { weight_micros }
    }
}

impl Default for PriorityWeightedFifo {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY_WEIGHT_MICROS)
    }
}

impl From<&SchedulingConfig> for PriorityWeightedFifo {
    fn from(config: &SchedulingConfig) -> Self {
        Self::new(config.priority_weight_micros)
    }
}

impl PriorityStrategy for PriorityWeightedFifo {
    fn priority_time(&self, priority: i32, submitted_at: DateTime<Utc>) -> i64 {
        submitted_at
            .timestamp_micros()
            .saturating_sub(i64::from(priority).saturating_mul(self.weight_micros))
    }
}
