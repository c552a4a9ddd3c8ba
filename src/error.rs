//! Error types for the Colonies core.
//!
//! Errors are grouped the way callers need to react to them: conflicts are
//! reported and never retried here, timeouts may be retried with backoff by
//! the caller, and transport errors from the store are passed through as-is.

use crate::state_machine::errors::GuardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColoniesError {
    /// Double assignment or an illegal state transition.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A mutation targeted a record that does not exist.
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness lookup matched more than one row.
    #[error("Integrity error: expected a unique {entity} for {key}, found {count}")]
    Integrity {
        entity: &'static str,
        key: String,
        count: usize,
    },

    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Lock {0} is not held by this instance")]
    LockNotHeld(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ColoniesError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

impl From<GuardError> for ColoniesError {
    fn from(err: GuardError) -> Self {
        ColoniesError::Conflict(err.to_string())
    }
}

impl From<config::ConfigError> for ColoniesError {
    fn from(err: config::ConfigError) -> Self {
        ColoniesError::Configuration(err.to_string())
    }
}

pub type ColoniesResult<T> = std::result::Result<T, ColoniesError>;
