use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state shared by processes, process graphs and the attribute mirror.
///
/// Persisted as INTEGER so that the retention and candidate indexes stay narrow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Submitted and queued, or released back to the queue
    #[default]
    Waiting = 0,
    /// Claimed by an executor
    Running = 1,
    /// Completed successfully
    Success = 2,
    /// Completed with errors
    Failed = 3,
}

impl ProcessState {
    pub const ALL: [ProcessState; 4] = [
        ProcessState::Waiting,
        ProcessState::Running,
        ProcessState::Success,
        ProcessState::Failed,
    ];

    /// No further lifecycle transitions are expected from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ProcessState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Running),
            2 => Ok(Self::Success),
            3 => Ok(Self::Failed),
            _ => Err(format!("Invalid process state: {value}")),
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ProcessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "running" => Ok(Self::Running),
            "success" | "successful" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid process state: {s}")),
        }
    }
}

/// Kind of fact an attribute records about its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Input payload marker
    In = 0,
    /// Output payload marker
    Out = 1,
    /// Error marker
    Err = 2,
    /// Environment variable
    Env = 3,
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
            Self::Err => write!(f, "err"),
            Self::Env => write!(f, "env"),
        }
    }
}

impl std::str::FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, <Self as std::str::FromStr>::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "err" => Ok(Self::Err),
            "env" => Ok(Self::Env),
            _ => Err(format!("Invalid attribute type: {s}")),
        }
    }
}
