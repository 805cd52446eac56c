//! Query definitions attached to entities.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation performed by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// List rows.
    List,
    /// Fetch one row.
    Get,
    /// Insert a row.
    Create,
    /// Update a row.
    Update,
    /// Delete a row.
    Delete,
    /// User-defined query.
    Custom,
}

/// A named query on an entity. Execution is delegated to a query runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Id, unique within the entity.
    pub id: String,
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: QueryKind,
    /// Runner-specific settings (filters, projections, ...).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Query {
    /// Create a query without parameters.
    pub fn new(id: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            id: id.into(),
            kind,
            params: Value::Null,
        }
    }

    /// Attach runner parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// The CRUD queries every new entity starts with.
    pub fn defaults() -> Vec<Query> {
        [
            ("list", QueryKind::List),
            ("get", QueryKind::Get),
            ("create", QueryKind::Create),
            ("update", QueryKind::Update),
            ("delete", QueryKind::Delete),
        ]
        .into_iter()
        .map(|(id, kind)| Query::new(id, kind))
        .collect()
    }
}
