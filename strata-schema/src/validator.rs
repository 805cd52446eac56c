//! Validation of standalone entity definitions.
//!
//! Checks everything that can be decided without looking at other entities:
//! - Entity and field names are valid identifiers
//! - No duplicate field or query ids
//! - Field invariants (`autoIncrement` only on numbers, ...)
//! - Relation shape (required keys per relation kind)
//!
//! Cross-entity checks (referenced entity exists, referenced field is
//! unique) belong to the registry.

use std::collections::HashSet;

use crate::ast::*;
use crate::error::{SchemaError, SchemaResult};

/// Validator for entity definitions.
#[derive(Debug, Default)]
pub struct Validator {
    /// Collected validation errors.
    errors: Vec<SchemaError>,
}

impl Validator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a definition that is about to be registered as `name`.
    pub fn validate(&mut self, name: &str, definition: &EntityDefinition) -> SchemaResult<()> {
        self.errors.clear();

        if let Err(e) = validate_name(name) {
            self.errors.push(e);
        }

        let mut seen = HashSet::new();
        for field in &definition.fields {
            if !seen.insert(field.name.as_str()) {
                self.errors.push(SchemaError::duplicate("field", &field.name));
            }
            if let Err(e) = field.validate(name) {
                self.errors.push(e);
            }
        }

        for relation in &definition.relations {
            self.validate_relation(name, relation);
        }

        let mut query_ids = HashSet::new();
        for query in &definition.queries {
            if !query_ids.insert(query.id.as_str()) {
                self.errors.push(SchemaError::duplicate("query", &query.id));
            }
        }

        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            count => Err(SchemaError::ValidationFailed {
                count,
                errors: std::mem::take(&mut self.errors),
            }),
        }
    }

    fn validate_relation(&mut self, entity: &str, relation: &RelationDefinition) {
        let target = relation.reference.entity.as_str();
        if target.is_empty() {
            self.errors.push(SchemaError::invalid_relation(
                entity,
                target,
                "reference entity is empty",
            ));
            return;
        }

        match relation.kind {
            RelationKind::HasMany | RelationKind::HasOne => {
                if relation.reference.field.is_none() {
                    self.errors.push(SchemaError::invalid_relation(
                        entity,
                        target,
                        format!("{} requires reference.field", relation.kind),
                    ));
                }
            }
            RelationKind::BelongsToMany => {
                if relation.field.is_some() && relation.field == relation.reference.field {
                    self.errors.push(SchemaError::invalid_relation(
                        entity,
                        target,
                        "join columns must have different names",
                    ));
                }
            }
            RelationKind::BelongsTo => {
                if relation.through.is_some() {
                    self.errors.push(SchemaError::invalid_relation(
                        entity,
                        target,
                        "belongsTo cannot go through a join entity",
                    ));
                }
            }
        }
    }
}

/// Check that `name` can be used as an entity or table name.
pub fn validate_name(name: &str) -> SchemaResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(SchemaError::invalid_entity(
            name,
            "names must start with a letter or underscore and contain only [A-Za-z0-9_]",
        ))
    }
}

/// Validate a definition with a fresh validator.
pub fn validate_definition(name: &str, definition: &EntityDefinition) -> SchemaResult<()> {
    Validator::new().validate(name, definition)
}
