// State machine module for process scheduling
//
// Lifecycle states and the guards that every state mutation in the process
// store runs against the stored copy before writing.

pub mod errors;
pub mod guards;
pub mod states;

pub use errors::{GuardError, GuardResult};
pub use guards::{
    graph_progression, graph_transition_stamp, CanFailGuard, CanSucceedGuard, GraphStamp, NotAssignedGuard,
    StateGuard, StoredProcess,
};
pub use states::{AttributeType, ProcessState};
