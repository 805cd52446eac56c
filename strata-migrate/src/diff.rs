//! Schema diffing between the entity model and the live database.
//!
//! Every difference is expressed as an [`ActionPair`] whose `redo` moves the
//! model to what the database currently is and whose `undo` describes what
//! the model says. Replaying the redo side pulls the database into the
//! model; replaying the undo side pushes the model onto the database.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────────────────┐
//! │ Registry     │────▶│ Synchronizer │────▶│ Diff                      │
//! └──────────────┘     └──────────────┘     │  entities / fields /      │
//! ┌──────────────┐            ▲             │  relations                │
//! │ show_tables  │────────────┘             └───────────────────────────┘
//! └──────────────┘
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_schema::{Entity, EntityDefinition, Field, Relation, RelationDefinition, RelationKind, Unique};

use crate::action::{Action, ActionPair};
use crate::introspect::{Column, ForeignKey, SchemaSnapshot, column_to_field};
use crate::registry::EntityRegistry;

/// The differences between model and database, bucketed by replay phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Whole-entity creations and deletions.
    pub entities: Vec<ActionPair>,
    /// Field creations, changes and deletions.
    pub fields: Vec<ActionPair>,
    /// Relation changes, and field changes tied to them.
    pub relations: Vec<ActionPair>,
    /// Total number of pairs.
    pub length: usize,
}

impl Diff {
    /// Create a diff from its buckets.
    pub fn new(
        entities: Vec<ActionPair>,
        fields: Vec<ActionPair>,
        relations: Vec<ActionPair>,
    ) -> Self {
        let length = entities.len() + fields.len() + relations.len();
        Self {
            entities,
            fields,
            relations,
            length,
        }
    }

    /// Check if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.fields.is_empty() && self.relations.is_empty()
    }

    /// Every pair in replay order: entities, fields, relations.
    pub fn pairs(&self) -> impl Iterator<Item = &ActionPair> {
        self.entities
            .iter()
            .chain(&self.fields)
            .chain(&self.relations)
    }

    /// Owned copy of [`Diff::pairs`].
    pub fn to_pairs(&self) -> Vec<ActionPair> {
        self.pairs().cloned().collect()
    }

    /// Every pair in push order: relations, fields, entities. Constraints
    /// go before the columns and tables they sit on.
    pub fn push_order(&self) -> Vec<ActionPair> {
        self.relations
            .iter()
            .chain(&self.fields)
            .chain(&self.entities)
            .cloned()
            .collect()
    }

    /// Get a summary of the diff, counted by database-side action.
    pub fn summary(&self) -> String {
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for pair in self.pairs() {
            *counts.entry(pair.redo.type_name()).or_default() += 1;
        }

        if counts.is_empty() {
            return "No changes".to_string();
        }
        counts
            .iter()
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Default)]
struct Buckets {
    entities: Vec<ActionPair>,
    fields: Vec<ActionPair>,
    relations: Vec<ActionPair>,
}

/// Compares an [`EntityRegistry`] with a [`SchemaSnapshot`].
#[derive(Debug, Clone, Copy)]
pub struct Synchronizer<'a> {
    registry: &'a EntityRegistry,
    snapshot: &'a SchemaSnapshot,
}

impl<'a> Synchronizer<'a> {
    /// Create a synchronizer for a model and a live schema.
    pub fn new(registry: &'a EntityRegistry, snapshot: &'a SchemaSnapshot) -> Self {
        Self { registry, snapshot }
    }

    /// Compute the diff.
    pub fn diff(&self) -> Diff {
        let mut out = Buckets::default();

        for entity in self.registry.find_all() {
            match self.snapshot.table(&entity.name) {
                None if entity.is_join() => self.join_missing(entity, &mut out),
                None => out.entities.push(ActionPair::new(
                    Action::DeleteEntity {
                        table: entity.name.clone(),
                    },
                    Action::CreateEntity {
                        table: entity.name.clone(),
                        value: self.registry.definition(&entity.name).unwrap_or_default(),
                    },
                )),
                Some(columns) if entity.is_join() => {
                    if !self.join_backed(entity, columns) {
                        self.join_missing(entity, &mut out);
                    }
                }
                Some(columns) => self.diff_table(entity, columns, &mut out),
            }
        }

        for (table, columns) in &self.snapshot.tables {
            if self.registry.contains(table) {
                continue;
            }
            if is_join_table(columns) {
                self.table_join(table, columns, &mut out);
            } else {
                self.table_missing(table, columns, &mut out);
            }
        }

        Diff::new(out.entities, out.fields, out.relations)
    }

    /// Whether the join table has both foreign keys the join entity expects.
    fn join_backed(&self, join: &Entity, columns: &[Column]) -> bool {
        let Some(endpoints) = &join.is_relation else {
            return false;
        };
        endpoints.iter().all(|endpoint| {
            let target = self.registry.name_of(&endpoint.entity);
            columns
                .iter()
                .find(|c| c.name == endpoint.field)
                .and_then(|c| c.foreign_key.as_ref())
                .is_some_and(|fk| Some(fk.table.as_str()) == target)
        })
    }

    /// Both sides of the many-to-many relation behind an unbacked join
    /// entity. Skipped when an endpoint table is itself missing: deleting
    /// that entity takes the relation with it.
    fn join_missing(&self, join: &Entity, out: &mut Buckets) {
        if let Some(endpoints) = &join.is_relation {
            let endpoint_missing = endpoints.iter().any(|endpoint| {
                self.registry
                    .name_of(&endpoint.entity)
                    .is_none_or(|name| !self.snapshot.contains_table(name))
            });
            if endpoint_missing {
                return;
            }
        }

        for owner in self.registry.find_all() {
            for relation in &owner.relations {
                if relation.kind != RelationKind::BelongsToMany
                    || relation.through.as_ref() != Some(&join.id)
                {
                    continue;
                }
                if let Some(definition) = self.registry.relation_definition(relation) {
                    out.relations
                        .push(relation_pair(&owner.name, definition).inverse());
                }
            }
        }
    }

    /// A table unknown to the model: one entity creation plus one inferred
    /// `belongsTo` per foreign key.
    fn table_missing(&self, table: &str, columns: &[Column], out: &mut Buckets) {
        let definition = EntityDefinition {
            fields: columns
                .iter()
                .filter(|c| !c.is_foreign_key())
                .map(column_to_field)
                .collect(),
            ..EntityDefinition::default()
        };
        out.entities.push(ActionPair::new(
            Action::CreateEntity {
                table: table.to_string(),
                value: definition,
            },
            Action::DeleteEntity {
                table: table.to_string(),
            },
        ));

        for column in columns {
            if let Some(fk) = &column.foreign_key {
                out.relations
                    .push(relation_pair(table, inferred_belongs_to(column, fk)));
            }
        }
    }

    /// A join-shaped table unknown to the model: a many-to-many relation on
    /// each referenced entity.
    fn table_join(&self, table: &str, columns: &[Column], out: &mut Buckets) {
        let [owner_column, target_column] = columns else {
            return;
        };
        let (Some(owner), Some(target)) = (&owner_column.foreign_key, &target_column.foreign_key)
        else {
            return;
        };

        let mut definition = RelationDefinition::belongs_to_many(&target.table)
            .field(&owner_column.name)
            .reference_field(&target_column.name)
            .through(table);
        definition.on_delete = owner_column.on_delete;
        definition.on_update = owner_column.on_update;

        let inverse = definition.many_to_many_inverse(&owner.table);
        out.relations.push(relation_pair(&owner.table, definition));
        if let Some(inverse) = inverse {
            out.relations.push(relation_pair(&target.table, inverse));
        }
    }

    fn diff_table(&self, entity: &Entity, columns: &[Column], out: &mut Buckets) {
        for (index, column) in columns.iter().enumerate() {
            match &column.foreign_key {
                Some(fk) => self.diff_foreign_key(entity, column, fk, out),
                None => self.diff_column(entity, index, column, columns, out),
            }
        }

        for (index, field) in entity.fields.iter().enumerate() {
            if field.is_derived() || columns.iter().any(|c| c.name == field.name) {
                continue;
            }
            out.fields.push(ActionPair::new(
                Action::DeleteField {
                    table: entity.name.clone(),
                    name: field.name.clone(),
                },
                Action::CreateField {
                    table: entity.name.clone(),
                    name: field.name.clone(),
                    value: field.clone(),
                    position: Some(index),
                },
            ));
        }

        for relation in &entity.relations {
            if !self.relation_backed(entity, relation) {
                if let Some(definition) = self.registry.relation_definition(relation) {
                    out.relations
                        .push(relation_pair(&entity.name, definition).inverse());
                }
            }
        }
    }

    fn diff_foreign_key(&self, entity: &Entity, column: &Column, fk: &ForeignKey, out: &mut Buckets) {
        let inferred = inferred_belongs_to(column, fk);
        let existing = entity
            .relations
            .iter()
            .find(|r| r.kind == RelationKind::BelongsTo && r.field.as_deref() == Some(&column.name));

        match existing {
            Some(relation) => {
                let same_target = self.registry.name_of(&relation.target) == Some(fk.table.as_str())
                    && relation.target_field.as_deref() == Some(fk.column.as_str());
                if same_target {
                    return;
                }
                if let Some(definition) = self.registry.relation_definition(relation) {
                    out.relations
                        .push(relation_pair(&entity.name, definition).inverse());
                }
            }
            None => {
                let plain = entity
                    .fields
                    .iter()
                    .enumerate()
                    .find(|(_, f)| f.name == column.name && !f.is_derived());
                if let Some((index, field)) = plain {
                    out.relations.push(ActionPair::new(
                        Action::DeleteField {
                            table: entity.name.clone(),
                            name: field.name.clone(),
                        },
                        Action::CreateField {
                            table: entity.name.clone(),
                            name: field.name.clone(),
                            value: field.clone(),
                            position: Some(index),
                        },
                    ));
                }
            }
        }
        out.relations.push(relation_pair(&entity.name, inferred));
    }

    fn diff_column(
        &self,
        entity: &Entity,
        index: usize,
        column: &Column,
        columns: &[Column],
        out: &mut Buckets,
    ) {
        let create = || {
            ActionPair::new(
                Action::CreateField {
                    table: entity.name.clone(),
                    name: column.name.clone(),
                    value: column_to_field(column),
                    position: Some(index),
                },
                Action::DeleteField {
                    table: entity.name.clone(),
                    name: column.name.clone(),
                },
            )
        };

        match entity.field(&column.name) {
            None => out.fields.push(create()),
            Some(field) if field.is_derived() => {
                // The column lost its foreign key.
                let relation = entity.relations.iter().find(|r| {
                    r.kind == RelationKind::BelongsTo && r.field.as_deref() == Some(&field.name)
                });
                if let Some(definition) = relation.and_then(|r| self.registry.relation_definition(r)) {
                    out.relations
                        .push(relation_pair(&entity.name, definition).inverse());
                }
                out.relations.push(create());
            }
            Some(field) => {
                if same_shape(entity, field, column, columns) {
                    return;
                }
                let value = Field {
                    read: field.read,
                    write: field.write,
                    ..column_to_field(column)
                };
                out.fields.push(ActionPair::new(
                    Action::ChangeField {
                        table: entity.name.clone(),
                        name: field.name.clone(),
                        value,
                    },
                    Action::ChangeField {
                        table: entity.name.clone(),
                        name: field.name.clone(),
                        value: field.clone(),
                    },
                ));
            }
        }
    }

    /// Whether the database carries the foreign key a relation needs.
    /// `belongsTo` columns that exist are handled column by column.
    fn relation_backed(&self, entity: &Entity, relation: &Relation) -> bool {
        match relation.kind {
            RelationKind::BelongsTo => relation
                .field
                .as_deref()
                .is_none_or(|field| self.snapshot.column(&entity.name, field).is_some()),
            RelationKind::HasMany | RelationKind::HasOne => self
                .registry
                .name_of(&relation.target)
                .zip(relation.target_field.as_deref())
                .and_then(|(target, field)| self.snapshot.column(target, field))
                .and_then(|c| c.foreign_key.as_ref())
                .is_some_and(|fk| fk.table == entity.name),
            RelationKind::BelongsToMany => true,
        }
    }
}

/// Diff `registry` against `snapshot`.
pub fn diff(registry: &EntityRegistry, snapshot: &SchemaSnapshot) -> Diff {
    Synchronizer::new(registry, snapshot).diff()
}

/// Exactly two unique foreign keys and nothing else.
fn is_join_table(columns: &[Column]) -> bool {
    columns.len() == 2 && columns.iter().all(Column::is_join_key)
}

fn inferred_belongs_to(column: &Column, fk: &ForeignKey) -> RelationDefinition {
    let mut definition = RelationDefinition::belongs_to(&fk.table)
        .field(&column.name)
        .reference_field(&fk.column);
    definition.on_delete = column.on_delete;
    definition.on_update = column.on_update;
    definition
}

fn relation_pair(table: &str, value: RelationDefinition) -> ActionPair {
    ActionPair::new(
        Action::AddRelation {
            table: table.to_string(),
            value: value.clone(),
        },
        Action::DeleteRelation {
            table: table.to_string(),
            value,
        },
    )
}

/// A unique group with a single member is a plain unique flag.
fn effective_unique(unique: &Unique, group_size: usize) -> Unique {
    match unique {
        Unique::Group(_) if group_size <= 1 => Unique::Flag(true),
        other => other.clone(),
    }
}

fn same_shape(entity: &Entity, field: &Field, column: &Column, columns: &[Column]) -> bool {
    let field_unique = effective_unique(
        &field.unique,
        field.unique.group().map_or(0, |g| entity.unique_group_size(g)),
    );
    let column_unique = effective_unique(
        &column.unique,
        column.unique.group().map_or(0, |g| {
            columns.iter().filter(|c| c.unique.group() == Some(g)).count()
        }),
    );

    field.field_type == column.column_type
        && field.primary == column.primary
        && field_unique == column_unique
        && field.required == column.required
        && field.default == column.default
        && field.default_value == column.default_value
        && field.auto_increment == column.auto_increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ApplyOptions;
    use crate::history::ActionHandler;
    use crate::introspect::{Constraint, SchemaDriver, flatten_field};
    use crate::memory::MemoryDriver;
    use crate::store::MemoryStore;
    use crate::workspace::Workspace;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn column(shorthand: &str) -> Column {
        flatten_field(&shorthand.parse().unwrap())
    }

    fn fk_column(shorthand: &str, table: &str, field: &str) -> Column {
        Column {
            foreign_key: Some(ForeignKey::new(table, field)),
            ..column(shorthand)
        }
    }

    async fn workspace() -> (Arc<MemoryDriver>, Workspace) {
        let driver = Arc::new(MemoryDriver::new());
        let workspace = Workspace::new(driver.clone(), Arc::new(MemoryStore::new()));
        (driver, workspace)
    }

    async fn create(ws: &mut Workspace, name: &str, value: EntityDefinition) {
        ws.handle(
            &Action::CreateEntity {
                table: name.to_string(),
                value,
            },
            ApplyOptions::edit(),
        )
        .await
        .unwrap();
    }

    fn id_entity() -> EntityDefinition {
        EntityDefinition::new().field("id:number,primary,unique,autoIncrement,required".parse().unwrap())
    }

    #[tokio::test]
    async fn test_synced_model_has_empty_diff() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        create(
            &mut ws,
            "post",
            id_entity()
                .field("title:text,required".parse().unwrap())
                .relation(RelationDefinition::belongs_to("user").field("author_id")),
        )
        .await;
        ws.handle(
            &Action::AddRelation {
                table: "user".to_string(),
                value: RelationDefinition::has_many("post", "author_id"),
            },
            ApplyOptions::edit(),
        )
        .await
        .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        assert!(diff.is_empty(), "{}", diff.summary());
        assert_eq!(diff.summary(), "No changes");
    }

    #[test]
    fn test_database_only_table() {
        let registry = EntityRegistry::new();
        let snapshot = SchemaSnapshot::new().with_table(
            "post",
            vec![
                column("id:number,primary"),
                fk_column("author_id:number", "user", "id"),
            ],
        );

        let diff = diff(&registry, &snapshot);
        assert_eq!(diff.length, 2);

        let Action::CreateEntity { value, .. } = &diff.entities[0].redo else {
            panic!("expected create_entity");
        };
        assert_eq!(value.fields.len(), 1);
        assert_eq!(diff.entities[0].undo.type_name(), "delete_entity");

        let Action::AddRelation { table, value } = &diff.relations[0].redo else {
            panic!("expected add_relation");
        };
        assert_eq!(table, "post");
        assert_eq!(value, &RelationDefinition::belongs_to("user").field("author_id").reference_field("id"));
    }

    #[tokio::test]
    async fn test_model_only_entity() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        driver.drop_table("user").await.unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        assert_eq!(diff.entities.len(), 1);
        assert_eq!(diff.entities[0].redo, Action::DeleteEntity { table: "user".to_string() });
        let Action::CreateEntity { value, .. } = &diff.entities[0].undo else {
            panic!("expected create_entity");
        };
        assert_eq!(value.fields, id_entity().fields);
    }

    #[tokio::test]
    async fn test_changed_column_keeps_visibility() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity().field("email:text,hidden".parse().unwrap())).await;
        driver
            .change_column("user", &column("email:text,required"))
            .await
            .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        assert_eq!(diff.fields.len(), 1);
        let Action::ChangeField { value, .. } = &diff.fields[0].redo else {
            panic!("expected change_field");
        };
        assert!(value.required);
        assert!(!value.read);
        let Action::ChangeField { value, .. } = &diff.fields[0].undo else {
            panic!("expected change_field");
        };
        assert!(!value.required);
    }

    #[tokio::test]
    async fn test_sole_unique_group_equals_flag() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity().field("email:text,unique".parse().unwrap())).await;
        driver
            .change_column("user", &column("email:text,unique=login"))
            .await
            .unwrap();

        assert!(diff(ws.registry(), &driver.snapshot()).is_empty());
    }

    #[tokio::test]
    async fn test_new_and_dropped_columns() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity().field("name:text".parse().unwrap())).await;
        driver.remove_column("user", "name").await.unwrap();
        driver
            .add_column("user", &column("age:number"), None)
            .await
            .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        let redo: Vec<String> = diff.fields.iter().map(|p| p.redo.to_string()).collect();
        assert_eq!(redo, vec!["create_field user.age", "delete_field user.name"]);
        assert!(matches!(
            &diff.fields[1].undo,
            Action::CreateField { position: Some(1), .. }
        ));
    }

    #[tokio::test]
    async fn test_foreign_key_retargeted() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        create(&mut ws, "member", id_entity()).await;
        create(
            &mut ws,
            "post",
            id_entity().relation(RelationDefinition::belongs_to("user").field("author_id")),
        )
        .await;

        let old = Constraint {
            column: "author_id".to_string(),
            references: ForeignKey::new("user", "id"),
            on_delete: None,
            on_update: None,
        };
        driver.drop_constraint("post", &old).await.unwrap();
        driver
            .add_constraint(
                "post",
                &Constraint {
                    references: ForeignKey::new("member", "id"),
                    ..old
                },
            )
            .await
            .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        let redo: Vec<String> = diff.relations.iter().map(|p| p.redo.to_string()).collect();
        assert_eq!(
            redo,
            vec![
                "delete_relation post belongsTo user",
                "add_relation post belongsTo member"
            ]
        );
        assert!(diff.fields.is_empty());
    }

    #[tokio::test]
    async fn test_plain_field_became_foreign_key() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        create(&mut ws, "post", id_entity().field("owner:number".parse().unwrap())).await;
        driver
            .add_constraint(
                "post",
                &Constraint {
                    column: "owner".to_string(),
                    references: ForeignKey::new("user", "id"),
                    on_delete: None,
                    on_update: None,
                },
            )
            .await
            .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        let redo: Vec<&str> = diff.relations.iter().map(|p| p.redo.type_name()).collect();
        assert_eq!(redo, vec!["delete_field", "add_relation"]);
    }

    #[tokio::test]
    async fn test_foreign_key_lost() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        create(
            &mut ws,
            "post",
            id_entity().relation(RelationDefinition::belongs_to("user")),
        )
        .await;
        driver
            .drop_constraint(
                "post",
                &Constraint {
                    column: "user_id".to_string(),
                    references: ForeignKey::new("user", "id"),
                    on_delete: None,
                    on_update: None,
                },
            )
            .await
            .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        let redo: Vec<String> = diff.relations.iter().map(|p| p.redo.to_string()).collect();
        assert_eq!(
            redo,
            vec!["delete_relation post belongsTo user", "create_field post.user_id"]
        );
    }

    #[test]
    fn test_join_table_inferred_both_ways() {
        let registry = EntityRegistry::new();
        let join_key = |name: &str, table: &str| fk_column(&format!("{name}:number,primary,unique,required"), table, "id");
        let snapshot = SchemaSnapshot::new()
            .with_table("post", vec![column("id:number,primary")])
            .with_table("tag", vec![column("id:number,primary")])
            .with_table("post_tag", vec![join_key("post_id", "post"), join_key("tag_id", "tag")]);

        let diff = diff(&registry, &snapshot);
        assert_eq!(diff.entities.len(), 2);
        assert_eq!(diff.relations.len(), 2);

        let Action::AddRelation { table, value } = &diff.relations[0].redo else {
            panic!("expected add_relation");
        };
        assert_eq!(table, "post");
        assert_eq!(value.kind, RelationKind::BelongsToMany);
        assert_eq!(value.through.as_deref(), Some("post_tag"));
        assert_eq!(value.field.as_deref(), Some("post_id"));

        let Action::AddRelation { table, value } = &diff.relations[1].redo else {
            panic!("expected add_relation");
        };
        assert_eq!(table, "tag");
        assert_eq!(value.field.as_deref(), Some("tag_id"));
    }

    #[tokio::test]
    async fn test_join_shaped_table_of_authored_entity() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        create(&mut ws, "group", id_entity()).await;
        create(
            &mut ws,
            "membership",
            EntityDefinition::new()
                .relation(RelationDefinition::belongs_to("user"))
                .relation(RelationDefinition::belongs_to("group")),
        )
        .await;
        for name in ["user_id", "group_id"] {
            driver
                .change_column("membership", &column(&format!("{name}:number,primary,unique,required")))
                .await
                .unwrap();
        }

        // Still diffed as a regular entity: its belongsTo relations match.
        let diff = diff(ws.registry(), &driver.snapshot());
        assert!(diff.is_empty(), "{}", diff.summary());
    }

    #[tokio::test]
    async fn test_missing_join_table() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "post", id_entity()).await;
        create(&mut ws, "tag", id_entity()).await;
        ws.handle(
            &Action::AddRelation {
                table: "post".to_string(),
                value: RelationDefinition::belongs_to_many("tag"),
            },
            ApplyOptions::edit(),
        )
        .await
        .unwrap();
        driver.drop_table("post_tag").await.unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        let redo: Vec<String> = diff.relations.iter().map(|p| p.redo.to_string()).collect();
        assert_eq!(
            redo,
            vec![
                "delete_relation post belongsToMany tag",
                "delete_relation tag belongsToMany post"
            ]
        );
    }

    #[tokio::test]
    async fn test_unbacked_has_many() {
        let (driver, mut ws) = workspace().await;
        create(&mut ws, "user", id_entity()).await;
        create(&mut ws, "post", id_entity().field("author_id:number".parse().unwrap())).await;
        ws.handle(
            &Action::AddRelation {
                table: "user".to_string(),
                value: RelationDefinition::has_many("post", "author_id"),
            },
            ApplyOptions::edit(),
        )
        .await
        .unwrap();

        let diff = diff(ws.registry(), &driver.snapshot());
        assert_eq!(diff.relations.len(), 1);
        assert_eq!(diff.relations[0].redo.to_string(), "delete_relation user hasMany post");
    }

    #[test]
    fn test_summary_and_serde() {
        let snapshot = SchemaSnapshot::new()
            .with_table("a", vec![column("id:number,primary")])
            .with_table("b", vec![column("id:number,primary"), fk_column("a_id:number", "a", "id")]);
        let diff = diff(&EntityRegistry::new(), &snapshot);

        assert_eq!(diff.summary(), "2 create_entity, 1 add_relation");

        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["length"], 3);
        assert_eq!(json["entities"][0]["redo"]["type"], "create_entity");
        let back: Diff = serde_json::from_value(json).unwrap();
        assert_eq!(back, diff);
    }

    #[test]
    fn test_push_order() {
        let snapshot = SchemaSnapshot::new()
            .with_table("a", vec![column("id:number,primary")])
            .with_table("b", vec![column("id:number,primary"), fk_column("a_id:number", "a", "id")]);
        let diff = diff(&EntityRegistry::new(), &snapshot);

        let replay: Vec<_> = diff.to_pairs().iter().map(|p| p.redo.type_name()).collect();
        assert_eq!(replay, vec!["create_entity", "create_entity", "add_relation"]);

        let push: Vec<_> = diff
            .push_order()
            .iter()
            .map(|p| (p.undo.type_name(), p.undo.table().to_string()))
            .collect();
        assert_eq!(
            push,
            vec![
                ("delete_relation", "b".to_string()),
                ("delete_entity", "a".to_string()),
                ("delete_entity", "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_effective_unique() {
        assert_eq!(effective_unique(&Unique::Group("g".into()), 1), Unique::Flag(true));
        assert_eq!(
            effective_unique(&Unique::Group("g".into()), 2),
            Unique::Group("g".into())
        );
        assert_eq!(effective_unique(&Unique::Flag(false), 0), Unique::Flag(false));
    }
}
