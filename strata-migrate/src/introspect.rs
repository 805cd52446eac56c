//! Database introspection and DDL interface.
//!
//! A concrete driver (PostgreSQL, MySQL, SQLite, ...) implements
//! [`SchemaDriver`]; the engine only ever talks to that trait. Column
//! descriptors are dialect-neutral: types are the entity field types and
//! foreign keys name the referenced table and column.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_schema::{Field, FieldType, ReferentialAction, Unique};

use crate::error::MigrateResult;

/// Target of a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
}

impl ForeignKey {
    /// Create a foreign key target.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Column information reported by the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: FieldType,
    /// Part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Unique flag or the name of a multi-column unique index.
    #[serde(default)]
    pub unique: Unique,
    /// NOT NULL.
    #[serde(default)]
    pub required: bool,
    /// Whether a default is set.
    #[serde(default)]
    pub default: bool,
    /// Default value expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Sequence-backed column.
    #[serde(default)]
    pub auto_increment: bool,
    /// ON UPDATE action of the foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
    /// ON DELETE action of the foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    /// Foreign key constraint on this column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKey>,
}

impl Column {
    /// Whether the column carries a foreign key constraint.
    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key.is_some()
    }

    /// A unique foreign key: candidate key of an implicit join table.
    pub fn is_join_key(&self) -> bool {
        self.foreign_key.is_some() && self.unique.is_unique()
    }

    /// Attach a foreign key constraint.
    pub fn with_foreign_key(mut self, constraint: &Constraint) -> Self {
        self.foreign_key = Some(constraint.references.clone());
        self.on_delete = constraint.on_delete;
        self.on_update = constraint.on_update;
        self
    }
}

/// A foreign key constraint to add or drop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    /// Constrained column.
    pub column: String,
    /// Referenced table and column.
    pub references: ForeignKey,
    /// ON DELETE action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    /// ON UPDATE action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

impl Constraint {
    /// Conventional constraint name, for drivers that need one.
    pub fn name(&self, table: &str) -> String {
        format!(
            "fk_{}_{}_{}_{}",
            table, self.column, self.references.table, self.references.column
        )
    }
}

/// Live schema: table name to ordered columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSnapshot {
    /// Tables in introspection order.
    pub tables: IndexMap<String, Vec<Column>>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<Column>) -> Self {
        self.tables.insert(name.into(), columns);
        self
    }

    /// Columns of a table.
    pub fn table(&self, name: &str) -> Option<&[Column]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    /// Whether the table exists.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Look up a column.
    pub fn column(&self, table: &str, column: &str) -> Option<&Column> {
        self.table(table)?.iter().find(|c| c.name == column)
    }
}

/// Trait for database introspection and DDL.
///
/// Every method is a single round trip; the engine awaits them strictly in
/// sequence. Timeouts are the driver's responsibility.
#[async_trait::async_trait]
pub trait SchemaDriver: Send + Sync {
    /// Get every table with its columns.
    async fn show_tables(&self) -> MigrateResult<SchemaSnapshot>;

    /// Create a table with the given columns and their foreign keys.
    async fn create_table(&self, table: &str, columns: &[Column]) -> MigrateResult<()>;

    /// Drop a table.
    async fn drop_table(&self, table: &str) -> MigrateResult<()>;

    /// Rename a table.
    async fn rename_table(&self, from: &str, to: &str) -> MigrateResult<()>;

    /// Add a column, at `position` when the dialect supports ordering.
    async fn add_column(
        &self,
        table: &str,
        column: &Column,
        position: Option<usize>,
    ) -> MigrateResult<()>;

    /// Alter a column in place to match `column`.
    async fn change_column(&self, table: &str, column: &Column) -> MigrateResult<()>;

    /// Drop a column.
    async fn remove_column(&self, table: &str, column: &str) -> MigrateResult<()>;

    /// Rename a column.
    async fn rename_column(&self, table: &str, from: &str, to: &str) -> MigrateResult<()>;

    /// Add a foreign key constraint.
    async fn add_constraint(&self, table: &str, constraint: &Constraint) -> MigrateResult<()>;

    /// Drop a foreign key constraint.
    async fn drop_constraint(&self, table: &str, constraint: &Constraint) -> MigrateResult<()>;

    /// Convert a column into a field definition.
    fn column_to_field(&self, column: &Column) -> Field {
        column_to_field(column)
    }

    /// Convert a field definition into a column descriptor.
    fn flatten_field(&self, field: &Field) -> Column {
        flatten_field(field)
    }
}

/// Convert a column into a plain (non-relation) field.
pub fn column_to_field(column: &Column) -> Field {
    Field {
        name: column.name.clone(),
        field_type: column.column_type,
        primary: column.primary,
        unique: column.unique.clone(),
        required: column.required,
        default: column.default,
        default_value: column.default_value.clone(),
        auto_increment: column.auto_increment,
        read: true,
        write: true,
        is_relation: None,
    }
}

/// Convert a field into a column without any constraint.
pub fn flatten_field(field: &Field) -> Column {
    Column {
        name: field.name.clone(),
        column_type: field.field_type,
        primary: field.primary,
        unique: field.unique.clone(),
        required: field.required,
        default: field.default,
        default_value: field.default_value.clone(),
        auto_increment: field.auto_increment,
        on_update: None,
        on_delete: None,
        foreign_key: None,
    }
}
