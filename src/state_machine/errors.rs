use super::states::ProcessState;
use thiserror::Error;

/// Guard failures raised before a process state mutation is written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Process {process_id} is already assigned")]
    AlreadyAssigned { process_id: String },

    #[error("Process {process_id} cannot move from {from} to {to}")]
    IllegalTransition {
        process_id: String,
        from: ProcessState,
        to: ProcessState,
    },

    #[error("Process {process_id} must be running to complete, it is {state}")]
    NotRunning {
        process_id: String,
        state: ProcessState,
    },
}

pub type GuardResult<T> = Result<T, GuardError>;
