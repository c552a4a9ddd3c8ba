use super::errors::{GuardError, GuardResult};
use super::states::ProcessState;

/// The stored lifecycle fields a guard decides on.
///
/// Guards always run against the stored copy, never against the caller's
/// in-memory process, so a stale caller cannot bypass them.
#[derive(Debug, Clone, Copy)]
pub struct StoredProcess<'a> {
    pub process_id: &'a str,
    pub state: ProcessState,
    pub is_assigned: bool,
}

/// Trait for implementing process state transition guards
pub trait StateGuard {
    /// Check if the transition is allowed for the stored process
    fn check(&self, stored: &StoredProcess<'_>) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// A process may be claimed by one executor only, and never after it finished
pub struct NotAssignedGuard;

impl StateGuard for NotAssignedGuard {
    fn check(&self, stored: &StoredProcess<'_>) -> GuardResult<()> {
        if stored.is_assigned {
            return Err(GuardError::AlreadyAssigned {
                process_id: stored.process_id.to_string(),
            });
        }
        if stored.state.is_terminal() {
            return Err(GuardError::IllegalTransition {
                process_id: stored.process_id.to_string(),
                from: stored.state,
                to: ProcessState::Running,
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Process must be unassigned and not finished"
    }
}

/// Only a running process can be marked successful
pub struct CanSucceedGuard;

impl StateGuard for CanSucceedGuard {
    fn check(&self, stored: &StoredProcess<'_>) -> GuardResult<()> {
        match stored.state {
            ProcessState::Running => Ok(()),
            ProcessState::Waiting => Err(GuardError::NotRunning {
                process_id: stored.process_id.to_string(),
                state: stored.state,
            }),
            ProcessState::Failed | ProcessState::Success => Err(GuardError::IllegalTransition {
                process_id: stored.process_id.to_string(),
                from: stored.state,
                to: ProcessState::Success,
            }),
        }
    }

    fn description(&self) -> &'static str {
        "Process must be running to be marked successful"
    }
}

/// A process that already finished cannot be failed.
///
/// Waiting processes may be failed: that is how an expired wait deadline is
/// reported.
pub struct CanFailGuard;

impl StateGuard for CanFailGuard {
    fn check(&self, stored: &StoredProcess<'_>) -> GuardResult<()> {
        if stored.state.is_terminal() {
            return Err(GuardError::IllegalTransition {
                process_id: stored.process_id.to_string(),
                from: stored.state,
                to: ProcessState::Failed,
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Process must not already be successful or failed"
    }
}

/// Timestamp side effect of a process graph state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphStamp {
    /// WAITING -> RUNNING stamps the start time
    StartTime,
    /// Any move into SUCCESS or FAILED stamps the end time
    EndTime,
    /// Everything else only rewrites the state
    StateOnly,
}

pub fn graph_transition_stamp(current: ProcessState, next: ProcessState) -> GraphStamp {
    if current == ProcessState::Waiting && next == ProcessState::Running {
        GraphStamp::StartTime
    } else if next.is_terminal() {
        GraphStamp::EndTime
    } else {
        GraphStamp::StateOnly
    }
}

/// State a graph moves to when its members suggest `derived`.
///
/// Graph progress only moves forward: SUCCESS and FAILED are final and a
/// running graph never falls back to WAITING.
pub fn graph_progression(current: ProcessState, derived: ProcessState) -> ProcessState {
    match (current, derived) {
        (ProcessState::Success | ProcessState::Failed, _) => current,
        (ProcessState::Running, ProcessState::Waiting) => current,
        _ => derived,
    }
}
