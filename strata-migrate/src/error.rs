//! Error types for the synchronization engine.

use strata_schema::SchemaError;
use thiserror::Error;

use crate::action::Action;

/// Result type alias for engine operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while mutating entities or replaying actions.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity file or action payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed entity, field or relation definition.
    #[error("Invalid definition: {0}")]
    Definition(#[from] SchemaError),

    /// Semantic validation failure that needs the registry to decide.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Name collision on create or rename.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced entity, field, relation or query does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// Its name.
        name: String,
    },

    /// Raw error reported by a database driver.
    #[error("Database error: {0}")]
    Database(String),

    /// The database driver rejected the DDL issued for an action.
    #[error("Schema error while applying {action}: {source}")]
    Schema {
        /// The action that triggered the DDL.
        action: Box<Action>,
        /// Driver error.
        #[source]
        source: Box<MigrationError>,
    },

    /// A batch replay failed partway. DDL issued before the failure is not
    /// rolled back; history bookkeeping is.
    #[error("Replay failed after {} applied action(s): {source}", applied.len())]
    PartialReplay {
        /// Actions that completed before the failure.
        applied: Vec<Action>,
        /// The failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// Query lookup or execution error.
    #[error("Query error: {0}")]
    Query(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Wrap a driver error with the action that caused it.
    pub fn schema(action: &Action, source: MigrationError) -> Self {
        Self::Schema {
            action: Box::new(action.clone()),
            source: Box::new(source),
        }
    }

    /// Whether this is a validation-class error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Definition(_) | Self::Validation(_))
    }

    /// Actions applied before a failed batch, if this is a replay error.
    pub fn applied_actions(&self) -> Option<&[Action]> {
        match self {
            Self::PartialReplay { applied, .. } => Some(applied),
            _ => None,
        }
    }
}
