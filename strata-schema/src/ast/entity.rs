//! Entity definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Field, Query, Relation, RelationDefinition};

/// Stable, opaque identifier of an entity. Survives renames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One side of a join entity: the entity it points at and the join column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinEndpoint {
    /// Referenced entity.
    pub entity: EntityId,
    /// Join column pointing at `entity`.
    pub field: String,
}

/// A live entity in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Stable id.
    pub id: EntityId,
    /// Current table name.
    pub name: String,
    /// Ordered fields, including relation-generated ones.
    pub fields: Vec<Field>,
    /// Outgoing relations.
    pub relations: Vec<Relation>,
    /// Query definitions.
    pub queries: Vec<Query>,
    /// Set for implicit many-to-many join entities.
    pub is_relation: Option<[JoinEndpoint; 2]>,
}

impl Entity {
    /// Create an empty entity.
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            queries: Vec::new(),
            is_relation: None,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a field in the ordered field list.
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Fields written by the user (not generated by relations).
    pub fn authored_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_derived())
    }

    /// The first primary field.
    pub fn primary_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary)
    }

    /// Whether this is an implicit join entity.
    pub fn is_join(&self) -> bool {
        self.is_relation.is_some()
    }

    /// Look up a query by id.
    pub fn query(&self, id: &str) -> Option<&Query> {
        self.queries.iter().find(|q| q.id == id)
    }

    /// Number of fields in the named unique group.
    pub fn unique_group_size(&self, group: &str) -> usize {
        self.fields
            .iter()
            .filter(|f| f.unique.group() == Some(group))
            .count()
    }
}

/// An entity as persisted on disk and carried by `create_entity` actions.
/// The name is not part of it: it is the file name or the action's table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    /// Stable id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<super::EntityId>,
    /// Authored fields.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Relations, targets by name.
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    /// Queries; defaults are generated when empty.
    #[serde(default)]
    pub queries: Vec<Query>,
    /// Adding over an existing entity of the same name is a no-op.
    #[serde(default, skip_serializing_if = "is_false")]
    pub overwritable: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EntityDefinition {
    /// Create an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id.
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Add a field.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a relation.
    pub fn relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }

    /// Add a query.
    pub fn query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    /// Mark the definition as overwritable.
    pub fn overwritable(mut self) -> Self {
        self.overwritable = true;
        self
    }
}
