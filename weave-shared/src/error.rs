//! # Weave Error Taxonomy
//!
//! A single workspace-wide error enum. Variants map onto the classes the
//! orchestration core distinguishes operationally:
//!
//! - `Validation` — client input rejected before any state mutation
//! - `NotFound` — a referenced thread/task/task-run/agent does not exist
//! - `Database` — persistence backend failure
//! - `Messaging` — bus publish/subscribe failure
//! - `Protocol` — malformed or unknown envelope on the bus
//! - `Configuration` — startup-time configuration problems
//!
//! Callbacks never propagate errors back up the bus: they terminate
//! locally, persist observable state, and optionally emit an error
//! envelope. This type is how the decision gets made.

use thiserror::Error;

/// Result alias used across the workspace
pub type WeaveResult<T> = Result<T, WeaveError>;

/// Workspace-wide error type
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Client input rejected before any state mutation
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "thread", "task", "task run", "agent"
        resource: &'static str,
        /// Identifier (or descriptive key) that failed to resolve
        id: String,
    },

    /// Persistence backend failure
    #[error("database error: {0}")]
    Database(String),

    /// Message bus failure
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Malformed or unknown envelope observed on the bus
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WeaveError {
    /// Construct a not-found error for an entity kind and identifier
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether this error is the not-found class (maps to the task-abort path)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for WeaveError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                resource: "row",
                id: "query returned no rows".to_string(),
            },
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = WeaveError::not_found("task", uuid::Uuid::nil());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("task not found"));
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: WeaveError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_serde_error_maps_to_protocol() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: WeaveError = parse_err.into();
        assert!(matches!(err, WeaveError::Protocol(_)));
    }
}
