//! Input validation for the Colonies core
//!
//! Everything a submitter hands in is checked here before it reaches the
//! store: JSON payload limits, human resource quantities and the structural
//! rules of a process graph.

use crate::error::{ColoniesError, ColoniesResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Maximum allowed size for JSON payloads (1MB)
const MAX_JSON_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum nesting depth for JSON objects/arrays
const MAX_JSON_DEPTH: usize = 10;

/// Validates a JSON payload (args, kwargs, input, output) for size and depth
pub fn validate_json_payload(field: &str, value: &Value) -> ColoniesResult<()> {
    let serialized = serde_json::to_string(value)?;

    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(ColoniesError::Validation(format!(
            "{field} payload too large: {} bytes (max: {MAX_JSON_SIZE_BYTES})",
            serialized.len()
        )));
    }

    validate_json_depth(field, value, 0)
}

fn validate_json_depth(field: &str, value: &Value, current_depth: usize) -> ColoniesResult<()> {
    if current_depth > MAX_JSON_DEPTH {
        return Err(ColoniesError::Validation(format!(
            "{field} nesting too deep: {current_depth} (max: {MAX_JSON_DEPTH})"
        )));
    }

    match value {
        Value::Object(map) => {
            for val in map.values() {
                validate_json_depth(field, val, current_depth + 1)?;
            }
        }
        Value::Array(arr) => {
            for val in arr {
                validate_json_depth(field, val, current_depth + 1)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Parses a CPU quantity into milli-CPU.
///
/// Accepts `"500m"`, `"2"` and `"0.5"`. An empty string means no requirement.
pub fn parse_cpu_millis(quantity: &str) -> ColoniesResult<i64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Ok(0);
    }

    let millis = if let Some(raw) = quantity.strip_suffix('m') {
        raw.parse::<i64>().ok()
    } else {
        quantity
            .parse::<f64>()
            .ok()
            .filter(|cores| cores.is_finite())
            .map(|cores| (cores * 1000.0).round() as i64)
    };

    match millis {
        Some(value) if value >= 0 => Ok(value),
        _ => Err(ColoniesError::Validation(format!(
            "Invalid CPU quantity: {quantity}"
        ))),
    }
}

/// Binary suffixes are checked before decimal ones so that "Gi" never matches "G"
const BYTE_UNITS: &[(&str, i64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("KB", 1_000),
    ("MB", 1_000_000),
    ("GB", 1_000_000_000),
    ("TB", 1_000_000_000_000),
    ("PB", 1_000_000_000_000_000),
    ("K", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
];

/// Parses a memory or storage quantity into bytes.
///
/// Accepts binary (`Ki`..`Pi`) and decimal (`K`/`KB`..`P`/`PB`) suffixes or a
/// plain byte count. An empty string means no requirement.
pub fn parse_bytes(quantity: &str) -> ColoniesResult<i64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Ok(0);
    }

    let invalid = || ColoniesError::Validation(format!("Invalid byte quantity: {quantity}"));

    let (digits, multiplier) = BYTE_UNITS
        .iter()
        .find_map(|(suffix, multiplier)| {
            quantity
                .strip_suffix(suffix)
                .map(|digits| (digits.trim(), *multiplier))
        })
        .unwrap_or((quantity, 1));

    let value = digits.parse::<i64>().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Validates the structural rules of a process graph before it is written.
///
/// `members` maps every member process ID to its parent IDs. The declared
/// roots must be exactly the members without parents, every parent must be a
/// member and the dependency edges must not form a cycle.
pub fn validate_graph_structure(
    roots: &[String],
    members: &HashMap<String, Vec<String>>,
) -> ColoniesResult<()> {
    if members.is_empty() {
        return Err(ColoniesError::Validation(
            "A process graph needs at least one process".to_string(),
        ));
    }

    for (id, parents) in members {
        if let Some(missing) = parents.iter().find(|parent| !members.contains_key(*parent)) {
            return Err(ColoniesError::Validation(format!(
                "Process {id} depends on {missing} which is not part of the graph"
            )));
        }
    }

    let declared: HashSet<&str> = roots.iter().map(String::as_str).collect();
    let derived: HashSet<&str> = members
        .iter()
        .filter(|(_, parents)| parents.is_empty())
        .map(|(id, _)| id.as_str())
        .collect();
    if declared != derived {
        return Err(ColoniesError::Validation(format!(
            "Graph roots {roots:?} do not match the processes without parents"
        )));
    }

    // Kahn's algorithm: every member must be reachable in topological order
    let mut in_degree: HashMap<&str, usize> = members
        .iter()
        .map(|(id, parents)| (id.as_str(), parents.len()))
        .collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, parents) in members {
        for parent in parents {
            children.entry(parent.as_str()).or_default().push(id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = derived.iter().copied().collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for child in children.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if visited != members.len() {
        return Err(ColoniesError::Validation(
            "Process graph contains a dependency cycle".to_string(),
        ));
    }

    Ok(())
}
