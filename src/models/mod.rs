pub mod attribute;
pub mod function_spec;
pub mod process;
pub mod process_graph;
pub mod process_log;

// Re-export core models for easy access
pub use attribute::{Attribute, NewAttribute};
pub use function_spec::{
    Conditions, Filesystem, FunctionSpec, Gpu, ResourceRequirements, SnapshotMount, SyncDirMount,
};
pub use process::{NewProcess, Process, ProcessTimings};
pub use process_graph::{CascadeCounts, NewProcessGraph, ProcessGraph};
pub use process_log::{NewProcessLog, ProcessLog};

use uuid::Uuid;

/// Generate an opaque 64-character lowercase hex ID
pub fn generate_id() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}
