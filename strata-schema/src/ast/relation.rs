//! Relations between entities.
//!
//! Relations exist in two forms:
//! - [`RelationDefinition`] names its target entity and is what gets persisted,
//!   sent in migration actions and compared by the diff engine.
//! - [`Relation`] is the resolved in-memory edge, keyed by the target's stable
//!   [`EntityId`], so renaming an entity never invalidates it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{EntityId, ReferentialAction};

/// The kind of link between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// The owner holds a foreign key to the target.
    BelongsTo,
    /// The target holds foreign keys back to the owner.
    HasMany,
    /// The target holds one foreign key back to the owner.
    HasOne,
    /// Many-to-many through a join entity.
    BelongsToMany,
}

impl RelationKind {
    /// Whether the relation generates a foreign-key field on its owner.
    pub fn generates_field(&self) -> bool {
        matches!(self, Self::BelongsTo)
    }

    /// Whether the relation is navigation-only (no column on the owner).
    pub fn is_inverse(&self) -> bool {
        matches!(self, Self::HasMany | Self::HasOne)
    }

    /// Get the relation name as written in definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsTo => "belongsTo",
            Self::HasMany => "hasMany",
            Self::HasOne => "hasOne",
            Self::BelongsToMany => "belongsToMany",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The far end of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceDefinition {
    /// Target entity name.
    pub entity: String,
    /// Target field. For `belongsTo` the referenced column on the target;
    /// for `hasMany`/`hasOne` the foreign key column on the target; for
    /// `belongsToMany` the join column pointing at the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Name of the inverse navigation on the target.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// A relation as written in entity files and migration actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    /// Relation kind.
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Local column. For `belongsTo` the generated foreign key; for
    /// `belongsToMany` the join column pointing back at the owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Navigation name on the owner.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Join entity name (`belongsToMany` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    /// Target of the relation.
    pub reference: ReferenceDefinition,
    /// ON DELETE behaviour of the generated constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    /// ON UPDATE behaviour of the generated constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

impl RelationDefinition {
    /// Create a relation of the given kind towards `entity`.
    pub fn new(kind: RelationKind, entity: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            alias: None,
            through: None,
            reference: ReferenceDefinition {
                entity: entity.into(),
                field: None,
                alias: None,
            },
            on_delete: None,
            on_update: None,
        }
    }

    /// `belongsTo` relation towards `entity`.
    pub fn belongs_to(entity: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, entity)
    }

    /// `hasMany` relation; `foreign_key` is the column on `entity`.
    pub fn has_many(entity: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, entity).reference_field(foreign_key)
    }

    /// `hasOne` relation; `foreign_key` is the column on `entity`.
    pub fn has_one(entity: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, entity).reference_field(foreign_key)
    }

    /// `belongsToMany` relation towards `entity`.
    pub fn belongs_to_many(entity: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsToMany, entity)
    }

    /// Set the local field.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Set the navigation alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the join entity name.
    pub fn through(mut self, through: impl Into<String>) -> Self {
        self.through = Some(through.into());
        self
    }

    /// Set the field on the referenced side.
    pub fn reference_field(mut self, field: impl Into<String>) -> Self {
        self.reference.field = Some(field.into());
        self
    }

    /// Set the ON DELETE action.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Set the ON UPDATE action.
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    /// The inverse side of a `belongsToMany` relation owned by `owner`.
    pub fn many_to_many_inverse(&self, owner: &str) -> Option<Self> {
        if self.kind != RelationKind::BelongsToMany {
            return None;
        }
        Some(Self {
            kind: RelationKind::BelongsToMany,
            field: self.reference.field.clone(),
            alias: self.reference.alias.clone(),
            through: self.through.clone(),
            reference: ReferenceDefinition {
                entity: owner.to_string(),
                field: self.field.clone(),
                alias: self.alias.clone(),
            },
            on_delete: self.on_delete,
            on_update: self.on_update,
        })
    }
}

/// A resolved relation edge stored on its owning entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
    /// Relation kind.
    pub kind: RelationKind,
    /// Local column (see [`RelationDefinition::field`]).
    pub field: Option<String>,
    /// Navigation name on the owner.
    pub alias: Option<String>,
    /// Target entity.
    pub target: EntityId,
    /// Field on the referenced side.
    pub target_field: Option<String>,
    /// Inverse navigation name on the target.
    pub target_alias: Option<String>,
    /// Join entity (`belongsToMany` only).
    pub through: Option<EntityId>,
    /// ON DELETE behaviour.
    pub on_delete: Option<ReferentialAction>,
    /// ON UPDATE behaviour.
    pub on_update: Option<ReferentialAction>,
}

impl Relation {
    /// Whether both edges describe the same link, ignoring referential
    /// actions and aliases.
    pub fn same_link(&self, other: &Relation) -> bool {
        self.kind == other.kind
            && self.field == other.field
            && self.target == other.target
            && self.target_field == other.target_field
            && self.through == other.through
    }

    /// Whether the relation touches `entity` as target or join entity.
    pub fn involves(&self, entity: &EntityId) -> bool {
        &self.target == entity || self.through.as_ref() == Some(entity)
    }
}
