//! # Function Specification
//!
//! The immutable description of what a process runs and where it may run.
//!
//! A `FunctionSpec` is stored as a JSONB document on the process row. The
//! fields the candidate matcher filters on (colony, executor type, target
//! executors, label, resource quantities) are additionally copied into
//! dedicated, indexed columns at submission time, and the env map is stored
//! as ENV attributes instead of inside the document.

use crate::constants::scheduling::MAX_BUDGET_SECONDS;
use crate::constants::WILDCARD_EXECUTOR;
use crate::error::{ColoniesError, ColoniesResult};
use crate::validation::{parse_bytes, parse_cpu_millis, validate_json_payload};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Placement and resource conditions of a process
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditions {
    pub colony_name: String,
    /// Acceptable executor names; empty means any executor
    pub executor_names: Vec<String>,
    pub executor_type: String,
    /// Node names of the graph members this process depends on
    pub dependencies: Vec<String>,
    pub nodes: i32,
    /// CPU quantity, e.g. `"1000m"` or `"2"`
    pub cpu: String,
    pub processes: i32,
    pub processes_per_node: i32,
    /// Memory quantity, e.g. `"4Gi"` or `"10GB"`
    pub memory: String,
    pub storage: String,
    /// Wall-time budget in seconds
    pub walltime: i64,
    pub gpu: Gpu,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Gpu {
    pub name: String,
    pub memory: String,
    pub count: i32,
}

/// Filesystem mounts prepared for the process by its executor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Filesystem {
    pub mount: String,
    pub snapshots: Vec<SnapshotMount>,
    pub dirs: Vec<SyncDirMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotMount {
    pub snapshot_id: String,
    pub label: String,
    pub dir: String,
    pub keep_files: bool,
    pub keep_snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncDirMount {
    pub label: String,
    pub dir: String,
    pub keep_files: bool,
    /// Local files win over remote files when syncing before start
    pub keep_local_on_start: bool,
    /// Remote files win over local files when syncing after close
    pub keep_remote_on_close: bool,
}

/// Specification of a process, immutable after submission
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionSpec {
    pub node_name: String,
    pub func_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Priority class; higher runs sooner
    pub priority: i32,
    /// Seconds a process may wait for an executor; `<= 0` disables the budget
    pub max_wait_time: i64,
    /// Seconds a process may run once assigned; `<= 0` disables the budget
    pub max_exec_time: i64,
    pub max_retries: i32,
    pub conditions: Conditions,
    pub label: String,
    pub filesystem: Filesystem,
    pub env: BTreeMap<String, String>,
}

/// Resource conditions normalised to integers for the candidate indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceRequirements {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub storage_bytes: i64,
    pub gpu_memory_bytes: i64,
    pub gpu_count: i32,
    pub nodes: i32,
    pub processes: i32,
    pub processes_per_node: i32,
}

impl FunctionSpec {
    pub fn new(
        func_name: impl Into<String>,
        colony_name: impl Into<String>,
        executor_type: impl Into<String>,
    ) -> Self {
        Self {
            func_name: func_name.into(),
            conditions: Conditions {
                colony_name: colony_name.into(),
                executor_type: executor_type.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Graph node identity and the nodes it depends on
    pub fn with_node(mut self, node_name: impl Into<String>, dependencies: &[&str]) -> Self {
        self.node_name = node_name.into();
        self.conditions.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_executor_names(mut self, names: Vec<String>) -> Self {
        self.conditions.executor_names = names;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_budgets(mut self, max_wait_time: i64, max_exec_time: i64) -> Self {
        self.max_wait_time = max_wait_time;
        self.max_exec_time = max_exec_time;
        self
    }

    pub fn has_wait_budget(&self) -> bool {
        self.max_wait_time > 0
    }

    pub fn has_exec_budget(&self) -> bool {
        self.max_exec_time > 0
    }

    /// Target executors as stored; an empty list becomes the wildcard
    pub fn target_executor_names(&self) -> Vec<String> {
        if self.conditions.executor_names.is_empty() {
            vec![WILDCARD_EXECUTOR.to_string()]
        } else {
            self.conditions.executor_names.clone()
        }
    }

    /// Checks everything that must hold before a process can be persisted and
    /// returns the normalised resource requirements.
    pub fn validate(&self) -> ColoniesResult<ResourceRequirements> {
        if self.conditions.colony_name.is_empty() {
            return Err(ColoniesError::Validation(
                "required conditions are malformed: colony name is empty".to_string(),
            ));
        }
        if self.conditions.executor_type.is_empty() {
            return Err(ColoniesError::Validation(
                "required conditions are malformed: executor type is empty".to_string(),
            ));
        }

        validate_json_payload("args", &Value::Array(self.args.clone()))?;
        validate_json_payload("kwargs", &Value::Object(self.kwargs.clone()))?;

        let conditions = &self.conditions;
        let counts = [
            ("nodes", conditions.nodes),
            ("processes", conditions.processes),
            ("processes_per_node", conditions.processes_per_node),
            ("gpu.count", conditions.gpu.count),
        ];
        if let Some((name, value)) = counts.iter().find(|(_, value)| *value < 0) {
            return Err(ColoniesError::Validation(format!(
                "required conditions are malformed: {name} is negative ({value})"
            )));
        }

        let budgets = [
            ("max_wait_time", self.max_wait_time),
            ("max_exec_time", self.max_exec_time),
        ];
        if let Some((name, value)) = budgets.iter().find(|(_, value)| *value > MAX_BUDGET_SECONDS) {
            return Err(ColoniesError::Validation(format!(
                "{name} of {value}s exceeds the maximum of {MAX_BUDGET_SECONDS}s"
            )));
        }

        Ok(ResourceRequirements {
            cpu_millis: parse_cpu_millis(&conditions.cpu).map_err(malformed)?,
            memory_bytes: parse_bytes(&conditions.memory).map_err(malformed)?,
            storage_bytes: parse_bytes(&conditions.storage).map_err(malformed)?,
            gpu_memory_bytes: parse_bytes(&conditions.gpu.memory).map_err(malformed)?,
            gpu_count: conditions.gpu.count,
            nodes: conditions.nodes,
            processes: conditions.processes,
            processes_per_node: conditions.processes_per_node,
        })
    }

    /// Copy persisted as the JSONB document: the env map lives in attributes
    pub(crate) fn without_env(&self) -> Self {
        Self {
            env: BTreeMap::new(),
            ..self.clone()
        }
    }
}

fn malformed(err: ColoniesError) -> ColoniesError {
    match err {
        ColoniesError::Validation(message) => {
            ColoniesError::Validation(format!("required conditions are malformed: {message}"))
        }
        other => other,
    }
}
