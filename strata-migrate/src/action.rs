//! Migration actions.
//!
//! Every change to the entity model is expressed as an [`Action`]. Actions
//! that mutate state are produced in [`ActionPair`]s holding the action and
//! its exact inverse, both computed at the moment of mutation.
//!
//! The serialized form is a flat tagged object, stable across processes:
//!
//! ```json
//! { "type": "create_field", "table": "post", "name": "title", "value": { ... }, "position": 2 }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_schema::{EntityDefinition, Field, Query, RelationDefinition};

/// A single, typed change to the entity model and/or database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Create an entity named `table`.
    CreateEntity {
        table: String,
        value: EntityDefinition,
    },
    /// Rename `table` to `value`.
    RenameEntity { table: String, value: String },
    /// Delete the entity `table`.
    DeleteEntity { table: String },
    /// Add field `name` at `position` (appended when absent).
    CreateField {
        table: String,
        name: String,
        value: Field,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    /// Replace field `name` with `value` (which may carry a new name).
    ChangeField {
        table: String,
        name: String,
        value: Field,
    },
    /// Remove field `name`.
    DeleteField { table: String, name: String },
    /// Add a relation owned by `table`.
    AddRelation {
        table: String,
        value: RelationDefinition,
    },
    /// Remove a relation owned by `table`.
    DeleteRelation {
        table: String,
        value: RelationDefinition,
    },
    /// Add query `id`.
    AddQuery {
        table: String,
        id: String,
        value: Query,
    },
    /// Remove query `id`.
    DeleteQuery { table: String, id: String },
    /// Replace query `id`.
    UpdateQuery {
        table: String,
        id: String,
        value: Query,
    },
}

impl Action {
    /// The entity the action applies to.
    pub fn table(&self) -> &str {
        match self {
            Self::CreateEntity { table, .. }
            | Self::RenameEntity { table, .. }
            | Self::DeleteEntity { table }
            | Self::CreateField { table, .. }
            | Self::ChangeField { table, .. }
            | Self::DeleteField { table, .. }
            | Self::AddRelation { table, .. }
            | Self::DeleteRelation { table, .. }
            | Self::AddQuery { table, .. }
            | Self::DeleteQuery { table, .. }
            | Self::UpdateQuery { table, .. } => table,
        }
    }

    /// The serialized type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. } => "create_entity",
            Self::RenameEntity { .. } => "rename_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::CreateField { .. } => "create_field",
            Self::ChangeField { .. } => "change_field",
            Self::DeleteField { .. } => "delete_field",
            Self::AddRelation { .. } => "add_relation",
            Self::DeleteRelation { .. } => "delete_relation",
            Self::AddQuery { .. } => "add_query",
            Self::DeleteQuery { .. } => "delete_query",
            Self::UpdateQuery { .. } => "update_query",
        }
    }

    /// Whether this creates, deletes or renames an entity.
    pub fn is_entity_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::CreateEntity { .. } | Self::RenameEntity { .. } | Self::DeleteEntity { .. }
        )
    }

    /// Every entity name the action depends on: its table, plus the target
    /// of relation actions. Join entities are excluded since relation
    /// actions create them.
    pub fn referenced_entities(&self) -> Vec<&str> {
        let mut names = vec![self.table()];
        if let Self::AddRelation { value, .. } | Self::DeleteRelation { value, .. } = self {
            names.push(value.reference.entity.as_str());
        }
        names
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateField { table, name, .. }
            | Self::ChangeField { table, name, .. }
            | Self::DeleteField { table, name } => {
                write!(f, "{} {}.{}", self.type_name(), table, name)
            }
            Self::AddQuery { table, id, .. }
            | Self::DeleteQuery { table, id }
            | Self::UpdateQuery { table, id, .. } => {
                write!(f, "{} {}.{}", self.type_name(), table, id)
            }
            Self::RenameEntity { table, value } => {
                write!(f, "{} {} -> {}", self.type_name(), table, value)
            }
            Self::AddRelation { table, value } | Self::DeleteRelation { table, value } => {
                write!(
                    f,
                    "{} {} {} {}",
                    self.type_name(),
                    table,
                    value.kind,
                    value.reference.entity
                )
            }
            _ => write!(f, "{} {}", self.type_name(), self.table()),
        }
    }
}

/// An action together with its exact inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPair {
    /// The forward action.
    pub redo: Action,
    /// The action that undoes `redo`.
    pub undo: Action,
}

impl ActionPair {
    /// Create a pair.
    pub fn new(redo: Action, undo: Action) -> Self {
        Self { redo, undo }
    }

    /// The same pair with directions swapped.
    pub fn inverse(self) -> Self {
        Self {
            redo: self.undo,
            undo: self.redo,
        }
    }
}

/// Controls which side effects an operation has.
///
/// The four switches are independent so the same primitives serve user
/// edits, history replay and reconciliation in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Mutate the in-memory registry.
    pub apply: bool,
    /// Push the undo/redo pair onto the history log.
    pub history: bool,
    /// Persist entity files and the identity map.
    pub save: bool,
    /// Issue DDL against the database.
    pub db: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self::edit()
    }
}

impl ApplyOptions {
    /// A normal user edit: every side effect.
    pub fn edit() -> Self {
        Self {
            apply: true,
            history: true,
            save: true,
            db: true,
        }
    }

    /// History replay: like an edit but not logged again.
    pub fn replay() -> Self {
        Self {
            history: false,
            ..Self::edit()
        }
    }

    /// Pull database truth into the model: no DDL, not logged.
    pub fn model_only() -> Self {
        Self {
            apply: true,
            history: false,
            save: true,
            db: false,
        }
    }

    /// Push model truth onto the database: DDL only.
    pub fn database_only() -> Self {
        Self {
            apply: false,
            history: false,
            save: false,
            db: true,
        }
    }

    /// Rebuild in-memory state from storage: nothing but the registry.
    pub fn in_memory() -> Self {
        Self {
            apply: true,
            history: false,
            save: false,
            db: false,
        }
    }

    /// Toggle registry mutation.
    pub fn with_apply(mut self, apply: bool) -> Self {
        self.apply = apply;
        self
    }

    /// Toggle history recording.
    pub fn with_history(mut self, history: bool) -> Self {
        self.history = history;
        self
    }

    /// Toggle persistence.
    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    /// Toggle DDL.
    pub fn with_db(mut self, db: bool) -> Self {
        self.db = db;
        self
    }
}
