//! In-memory entity graph.
//!
//! Entities are keyed by their stable [`EntityId`]; a name index gives the
//! current name of each. Relations point at target ids, so renaming an
//! entity only touches the index.

use std::collections::HashMap;

use indexmap::IndexMap;
use strata_schema::{
    Entity, EntityDefinition, EntityId, ReferenceDefinition, Relation, RelationDefinition,
    RelationKind,
};

use crate::error::{MigrateResult, MigrationError};
use crate::store::IdentityMap;

/// The live set of entities.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: IndexMap<EntityId, Entity>,
    names: HashMap<String, EntityId>,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities, join entities included.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry holds no entity.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether an entity is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.names.get(name).and_then(|id| self.entities.get(id))
    }

    /// Look up an entity by name for mutation.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entity> {
        let id = self.names.get(name)?;
        self.entities.get_mut(id)
    }

    /// Look up an entity by name, failing with `NotFound`.
    pub fn require(&self, name: &str) -> MigrateResult<&Entity> {
        self.get(name)
            .ok_or_else(|| MigrationError::not_found("entity", name))
    }

    /// Look up an entity by name for mutation, failing with `NotFound`.
    pub fn require_mut(&mut self, name: &str) -> MigrateResult<&mut Entity> {
        self.get_mut(name)
            .ok_or_else(|| MigrationError::not_found("entity", name))
    }

    /// Look up an entity by id.
    pub fn by_id(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Look up an entity by id for mutation.
    pub fn by_id_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Id of the entity named `name`.
    pub fn id_of(&self, name: &str) -> Option<&EntityId> {
        self.names.get(name)
    }

    /// Current name of the entity `id`.
    pub fn name_of(&self, id: &EntityId) -> Option<&str> {
        self.entities.get(id).map(|e| e.name.as_str())
    }

    /// All entities in insertion order.
    pub fn find_all(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Insert an entity. Fails when its name or id is taken.
    pub fn insert(&mut self, entity: Entity) -> MigrateResult<()> {
        if self.names.contains_key(&entity.name) {
            return Err(MigrationError::conflict(format!(
                "entity '{}' already exists",
                entity.name
            )));
        }
        if self.entities.contains_key(&entity.id) {
            return Err(MigrationError::conflict(format!(
                "entity id '{}' already in use",
                entity.id
            )));
        }
        self.names.insert(entity.name.clone(), entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Remove an entity by name. Relations pointing at it are left alone.
    pub fn remove(&mut self, name: &str) -> Option<Entity> {
        let id = self.names.remove(name)?;
        self.entities.shift_remove(&id)
    }

    /// Rename an entity.
    pub fn rename(&mut self, from: &str, to: &str) -> MigrateResult<()> {
        if self.names.contains_key(to) {
            return Err(MigrationError::conflict(format!(
                "entity '{to}' already exists"
            )));
        }
        let id = self
            .names
            .remove(from)
            .ok_or_else(|| MigrationError::not_found("entity", from))?;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.name = to.to_string();
        }
        self.names.insert(to.to_string(), id);
        Ok(())
    }

    /// The id to name map of every persisted (non-join) entity.
    pub fn identity(&self) -> IdentityMap {
        self.entities
            .values()
            .filter(|e| !e.is_join())
            .map(|e| (e.id.clone(), e.name.clone()))
            .collect()
    }

    /// Render a resolved relation with entity names. `None` when its target
    /// or join entity is gone.
    pub fn relation_definition(&self, relation: &Relation) -> Option<RelationDefinition> {
        let through = match &relation.through {
            Some(id) => Some(self.name_of(id)?.to_string()),
            None => None,
        };
        Some(RelationDefinition {
            kind: relation.kind,
            field: relation.field.clone(),
            alias: relation.alias.clone(),
            through,
            reference: ReferenceDefinition {
                entity: self.name_of(&relation.target)?.to_string(),
                field: relation.target_field.clone(),
                alias: relation.target_alias.clone(),
            },
            on_delete: relation.on_delete,
            on_update: relation.on_update,
        })
    }

    /// The persisted form of an entity: authored fields, relations by name,
    /// queries. `None` for unknown names.
    pub fn definition(&self, name: &str) -> Option<EntityDefinition> {
        let entity = self.get(name)?;
        Some(EntityDefinition {
            id: Some(entity.id.clone()),
            fields: entity.authored_fields().cloned().collect(),
            relations: entity
                .relations
                .iter()
                .filter_map(|r| self.relation_definition(r))
                .collect(),
            queries: entity.queries.clone(),
            overwritable: false,
        })
    }

    /// Relations owned by other entities that target `id`, with their
    /// owners' names. `belongsToMany` sides are left out: they go away with
    /// the owner's own side.
    pub fn incoming(&self, id: &EntityId) -> Vec<(String, RelationDefinition)> {
        self.entities
            .values()
            .filter(|owner| &owner.id != id)
            .flat_map(|owner| {
                owner
                    .relations
                    .iter()
                    .filter(|r| &r.target == id && r.kind != RelationKind::BelongsToMany)
                    .filter_map(|r| Some((owner.name.clone(), self.relation_definition(r)?)))
            })
            .collect()
    }

    /// Names of non-join entities whose relations mention `id`.
    pub fn referencing(&self, id: &EntityId) -> Vec<String> {
        self.entities
            .values()
            .filter(|e| &e.id != id && !e.is_join())
            .filter(|e| e.relations.iter().any(|r| r.involves(id)))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Find the relation of `owner` that `definition` describes. Unset
    /// optional parts of the definition match anything.
    pub fn find_relation(&self, owner: &Entity, definition: &RelationDefinition) -> Option<usize> {
        let target = self.id_of(&definition.reference.entity)?;
        owner.relations.iter().position(|r| {
            r.kind == definition.kind
                && &r.target == target
                && definition.field.as_ref().is_none_or(|f| r.field.as_ref() == Some(f))
                && definition
                    .reference
                    .field
                    .as_ref()
                    .is_none_or(|f| r.target_field.as_ref() == Some(f))
                && definition.through.as_deref().is_none_or(|through| {
                    r.through.as_ref().and_then(|id| self.name_of(id)) == Some(through)
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_schema::{Field, FieldType};

    fn entity(id: &str, name: &str) -> Entity {
        let mut entity = Entity::new(EntityId::from(id), name);
        entity.fields.push(Field::new("id", FieldType::Number).primary());
        entity
    }

    fn belongs_to(target: &str, field: &str) -> Relation {
        Relation {
            kind: RelationKind::BelongsTo,
            field: Some(field.to_string()),
            alias: None,
            target: EntityId::from(target),
            target_field: Some("id".to_string()),
            target_alias: None,
            through: None,
            on_delete: None,
            on_update: None,
        }
    }

    #[test]
    fn test_insert_conflicts() {
        let mut registry = EntityRegistry::new();
        registry.insert(entity("u1", "user")).unwrap();

        assert!(matches!(
            registry.insert(entity("u2", "user")),
            Err(MigrationError::Conflict(_))
        ));
        assert!(matches!(
            registry.insert(entity("u1", "member")),
            Err(MigrationError::Conflict(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rename_keeps_relations() {
        let mut registry = EntityRegistry::new();
        registry.insert(entity("u1", "user")).unwrap();
        let mut post = entity("p1", "post");
        post.relations.push(belongs_to("u1", "author_id"));
        registry.insert(post).unwrap();

        registry.rename("user", "member").unwrap();
        assert!(registry.get("user").is_none());
        assert_eq!(registry.id_of("member"), Some(&EntityId::from("u1")));

        let definition = registry.definition("post").unwrap();
        assert_eq!(definition.relations[0].reference.entity, "member");
        assert_eq!(registry.referencing(&EntityId::from("u1")), vec!["post"]);
    }

    #[test]
    fn test_rename_errors() {
        let mut registry = EntityRegistry::new();
        registry.insert(entity("u1", "user")).unwrap();
        registry.insert(entity("p1", "post")).unwrap();

        assert!(matches!(
            registry.rename("user", "post"),
            Err(MigrationError::Conflict(_))
        ));
        assert!(matches!(
            registry.rename("ghost", "x"),
            Err(MigrationError::NotFound { .. })
        ));
    }

    #[test]
    fn test_incoming_and_identity() {
        let mut registry = EntityRegistry::new();
        registry.insert(entity("u1", "user")).unwrap();
        let mut post = entity("p1", "post");
        post.relations.push(belongs_to("u1", "author_id"));
        registry.insert(post).unwrap();

        let incoming = registry.incoming(&EntityId::from("u1"));
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].0, "post");
        assert_eq!(incoming[0].1.field.as_deref(), Some("author_id"));

        let identity = registry.identity();
        assert_eq!(identity.get(&EntityId::from("p1")).map(String::as_str), Some("post"));
    }

    #[test]
    fn test_find_relation_partial_match() {
        let mut registry = EntityRegistry::new();
        registry.insert(entity("u1", "user")).unwrap();
        let mut post = entity("p1", "post");
        post.relations.push(belongs_to("u1", "author_id"));
        registry.insert(post).unwrap();

        let owner = registry.get("post").unwrap();
        assert_eq!(
            registry.find_relation(owner, &RelationDefinition::belongs_to("user")),
            Some(0)
        );
        assert_eq!(
            registry.find_relation(owner, &RelationDefinition::belongs_to("user").field("x")),
            None
        );
    }

    #[test]
    fn test_definition_omits_derived_fields() {
        let mut registry = EntityRegistry::new();
        registry.insert(entity("u1", "user")).unwrap();
        let mut post = entity("p1", "post");
        let mut fk = Field::new("author_id", FieldType::Number);
        fk.is_relation = Some(strata_schema::RelationRef {
            kind: RelationKind::BelongsTo,
            target: EntityId::from("u1"),
        });
        post.fields.push(fk);
        registry.insert(post).unwrap();

        let definition = registry.definition("post").unwrap();
        assert_eq!(definition.fields.len(), 1);
        assert_eq!(definition.id, Some(EntityId::from("p1")));
    }
}
