//! Action execution.
//!
//! [`Workspace`] owns the [`EntityRegistry`] and carries out every
//! [`Action`] with the side effects selected by [`ApplyOptions`]: registry
//! mutation, DDL through the [`SchemaDriver`], and persistence through the
//! [`EntityStore`]. Each call returns the action pairs it produced so the
//! caller can record them.
//!
//! DDL is best effort and reconciles with the live schema: creating a
//! column that exists changes it, a column is only dropped when the model no
//! longer declares it, and join tables are only created or dropped when
//! absent or present.

use std::sync::Arc;

use strata_schema::{
    Entity, EntityDefinition, EntityId, Field, FieldType, JoinEndpoint, Query, QueryKind,
    ReferenceDefinition, Relation, RelationDefinition, RelationKind, RelationRef,
    validate_definition, validate_name,
};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionPair, ApplyOptions};
use crate::error::{MigrateResult, MigrationError};
use crate::history::ActionHandler;
use crate::hooks::EntityHooks;
use crate::introspect::{Constraint, ForeignKey, SchemaDriver, SchemaSnapshot};
use crate::registry::EntityRegistry;
use crate::store::EntityStore;

/// Registry plus the collaborators actions have side effects on.
pub struct Workspace {
    registry: EntityRegistry,
    driver: Arc<dyn SchemaDriver>,
    store: Arc<dyn EntityStore>,
    hooks: Option<Arc<dyn EntityHooks>>,
    log_actions: bool,
}

impl Workspace {
    /// Create a workspace with an empty registry.
    pub fn new(driver: Arc<dyn SchemaDriver>, store: Arc<dyn EntityStore>) -> Self {
        Self {
            registry: EntityRegistry::new(),
            driver,
            store,
            hooks: None,
            log_actions: false,
        }
    }

    /// Notify `hooks` of renames and removals.
    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Log every action at info level instead of debug.
    pub fn with_action_log(mut self, enabled: bool) -> Self {
        self.log_actions = enabled;
        self
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// The database driver.
    pub fn driver(&self) -> &Arc<dyn SchemaDriver> {
        &self.driver
    }

    /// The definition store.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Introspect the live schema.
    pub async fn snapshot(&self) -> MigrateResult<SchemaSnapshot> {
        self.driver.show_tables().await
    }

    /// Persist the identity map of the current registry.
    pub async fn save_identity(&self) -> MigrateResult<()> {
        self.store.save_identity(&self.registry.identity()).await
    }

    /// Persist the definitions of `names`. Join entities and unknown names
    /// are skipped.
    pub async fn persist(&self, names: &[&str]) -> MigrateResult<()> {
        for name in names {
            if self.registry.get(name).is_some_and(Entity::is_join) {
                continue;
            }
            if let Some(definition) = self.registry.definition(name) {
                self.store.save(name, &definition).await?;
            }
        }
        Ok(())
    }

    /// Put the registry back after a failed action and rewrite the entity
    /// files it had already touched. DDL already issued stays.
    async fn restore(&mut self, before: EntityRegistry, options: ApplyOptions) {
        let touched = changed_entities(&before, &self.registry);
        self.registry = before;
        if !options.save || touched.is_empty() {
            return;
        }
        for name in &touched {
            let result = if self.registry.contains(name) {
                self.persist(&[name.as_str()]).await
            } else {
                self.store.delete(name).await
            };
            if let Err(e) = result {
                warn!(entity = %name, error = %e, "Failed to restore entity file");
            }
        }
        if let Err(e) = self.save_identity().await {
            warn!(error = %e, "Failed to restore identity map");
        }
    }

    async fn snapshot_if(&self, options: ApplyOptions) -> MigrateResult<Option<SchemaSnapshot>> {
        if options.db {
            Ok(Some(self.driver.show_tables().await?))
        } else {
            Ok(None)
        }
    }

    /// A key field of `entity`: `field`, or its primary field. Looked up in
    /// the model first, then in the live schema.
    fn lookup_key(
        &self,
        snapshot: Option<&SchemaSnapshot>,
        entity: &str,
        field: Option<&str>,
    ) -> Option<Field> {
        if let Some(entity) = self.registry.get(entity) {
            return match field {
                Some(name) => entity.field(name),
                None => entity.primary_field(),
            }
            .cloned();
        }
        let columns = snapshot?.table(entity)?;
        match field {
            Some(name) => columns.iter().find(|c| c.name == name),
            None => columns.iter().find(|c| c.primary),
        }
        .map(|c| self.driver.column_to_field(c))
    }

    fn declares(&self, table: &str, field: &str) -> bool {
        self.registry
            .get(table)
            .is_some_and(|e| e.field(field).is_some())
    }

    async fn create_entity(
        &mut self,
        table: &str,
        value: &EntityDefinition,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        if options.apply {
            if self.registry.contains(table) {
                if value.overwritable {
                    debug!(entity = table, "Entity exists, keeping it");
                    return Ok(Vec::new());
                }
                return Err(MigrationError::conflict(format!(
                    "entity '{table}' already exists"
                )));
            }
            validate_definition(table, value)?;
            if let Some(id) = value.id.as_ref().filter(|id| self.registry.by_id(id).is_some()) {
                return Err(MigrationError::conflict(format!(
                    "entity id '{id}' already in use"
                )));
            }
            if let Some(missing) = value
                .relations
                .iter()
                .map(|r| r.reference.entity.as_str())
                .find(|target| *target != table && !self.registry.contains(target))
            {
                return Err(MigrationError::not_found("entity", missing));
            }
        }

        let id = value.id.clone().unwrap_or_else(EntityId::generate);
        let fields: Vec<Field> = value
            .fields
            .iter()
            .cloned()
            .map(|mut f| {
                f.is_relation = None;
                f
            })
            .collect();
        let queries = if value.queries.is_empty() {
            Query::defaults()
        } else {
            value.queries.clone()
        };

        if options.apply {
            let mut entity = Entity::new(id.clone(), table);
            entity.fields = fields.clone();
            entity.queries = queries.clone();
            self.registry.insert(entity)?;
        }
        if let Some(snapshot) = self.snapshot_if(options).await? {
            if snapshot.contains_table(table) {
                debug!(table, "Table exists, not creating it");
            } else {
                let columns: Vec<_> = fields.iter().map(|f| self.driver.flatten_field(f)).collect();
                self.driver.create_table(table, &columns).await?;
            }
        }
        if options.save {
            self.persist(&[table]).await?;
            self.save_identity().await?;
        }

        let created = EntityDefinition {
            id: Some(id),
            fields,
            relations: Vec::new(),
            queries,
            overwritable: false,
        };
        let mut pairs = vec![ActionPair::new(
            Action::CreateEntity {
                table: table.to_string(),
                value: created,
            },
            Action::DeleteEntity {
                table: table.to_string(),
            },
        )];
        for relation in &value.relations {
            pairs.extend(self.add_relation(table, relation, options).await?);
        }
        Ok(pairs)
    }

    async fn rename_entity(
        &mut self,
        table: &str,
        value: &str,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        if options.apply {
            ensure_authored(self.registry.require(table)?)?;
            if self.registry.contains(value) {
                return Err(MigrationError::conflict(format!(
                    "entity '{value}' already exists"
                )));
            }
            validate_name(value)?;
            self.registry.rename(table, value)?;
        }
        if let Some(snapshot) = self.snapshot_if(options).await? {
            match (snapshot.contains_table(table), snapshot.contains_table(value)) {
                (true, false) => self.driver.rename_table(table, value).await?,
                (true, true) => {
                    warn!(from = table, to = value, "Target table exists, rename skipped")
                }
                _ => debug!(from = table, to = value, "Table already renamed"),
            }
        }
        if options.save {
            self.store.rename(table, value).await?;
            let mut names = vec![value.to_string()];
            if let Some(id) = self.registry.id_of(value) {
                names.extend(self.registry.referencing(id));
            }
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            self.persist(&names).await?;
            self.save_identity().await?;
        }
        if options.apply {
            if let Some(hooks) = &self.hooks {
                hooks.on_entity_renamed(table, value).await?;
            }
        }

        info!(from = table, to = value, "Renamed entity");
        Ok(vec![ActionPair::new(
            Action::RenameEntity {
                table: table.to_string(),
                value: value.to_string(),
            },
            Action::RenameEntity {
                table: value.to_string(),
                value: table.to_string(),
            },
        )])
    }

    async fn delete_entity(
        &mut self,
        table: &str,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let mut pairs = Vec::new();
        let restore = if options.apply {
            let entity = self.registry.require(table)?;
            ensure_authored(entity)?;
            let id = entity.id.clone();
            let own_many: Vec<RelationDefinition> = entity
                .relations
                .iter()
                .filter(|r| r.kind == RelationKind::BelongsToMany)
                .filter_map(|r| self.registry.relation_definition(r))
                .collect();

            for (owner, definition) in self.registry.incoming(&id) {
                pairs.extend(self.delete_relation(&owner, &definition, options).await?);
            }
            for definition in own_many {
                pairs.extend(self.delete_relation(table, &definition, options).await?);
            }

            let restore = self.registry.definition(table).unwrap_or_default();
            self.registry.remove(table);
            restore
        } else {
            self.registry.definition(table).unwrap_or_default()
        };

        if let Some(snapshot) = self.snapshot_if(options).await? {
            if snapshot.contains_table(table) {
                self.driver.drop_table(table).await?;
            } else {
                debug!(table, "Table already dropped");
            }
        }
        if options.save {
            self.store.delete(table).await?;
            self.save_identity().await?;
        }
        if options.apply {
            if let Some(hooks) = &self.hooks {
                hooks.on_entity_removed(table).await?;
            }
        }

        info!(entity = table, cascaded = pairs.len(), "Removed entity");
        pairs.push(ActionPair::new(
            Action::DeleteEntity {
                table: table.to_string(),
            },
            Action::CreateEntity {
                table: table.to_string(),
                value: restore,
            },
        ));
        Ok(pairs)
    }

    async fn create_field(
        &mut self,
        table: &str,
        name: &str,
        value: &Field,
        position: Option<usize>,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let mut field = value.clone();
        field.name = name.to_string();
        field.is_relation = None;

        if options.apply {
            let entity = self.registry.require(table)?;
            ensure_authored(entity)?;
            if entity.field(name).is_some() {
                return Err(MigrationError::conflict(format!(
                    "field '{table}.{name}' already exists"
                )));
            }
            field.validate(table)?;

            let entity = self.registry.require_mut(table)?;
            let index = position.map_or(entity.fields.len(), |p| p.min(entity.fields.len()));
            entity.fields.insert(index, field.clone());
        }
        if let Some(snapshot) = self.snapshot_if(options).await? {
            let column = self.driver.flatten_field(&field);
            if snapshot.column(table, name).is_some() {
                self.driver.change_column(table, &column).await?;
            } else {
                self.driver.add_column(table, &column, position).await?;
            }
        }
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![ActionPair::new(
            Action::CreateField {
                table: table.to_string(),
                name: name.to_string(),
                value: field,
                position,
            },
            Action::DeleteField {
                table: table.to_string(),
                name: name.to_string(),
            },
        )])
    }

    async fn change_field(
        &mut self,
        table: &str,
        name: &str,
        value: &Field,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let mut field = value.clone();
        field.is_relation = None;

        let previous = if options.apply {
            let entity = self.registry.require(table)?;
            ensure_authored(entity)?;
            let (index, old) = entity
                .fields
                .iter()
                .enumerate()
                .find(|(_, f)| f.name == name)
                .ok_or_else(|| MigrationError::not_found("field", format!("{table}.{name}")))?;
            if old.is_derived() {
                return Err(MigrationError::validation(format!(
                    "field '{table}.{name}' is generated by a relation"
                )));
            }
            if field.name != name && entity.field(&field.name).is_some() {
                return Err(MigrationError::conflict(format!(
                    "field '{table}.{}' already exists",
                    field.name
                )));
            }
            field.validate(table)?;

            let old = old.clone();
            self.registry.require_mut(table)?.fields[index] = field.clone();
            old
        } else {
            self.registry
                .get(table)
                .and_then(|e| e.field(name))
                .cloned()
                .unwrap_or_else(|| Field {
                    name: name.to_string(),
                    ..field.clone()
                })
        };

        if let Some(snapshot) = self.snapshot_if(options).await? {
            let has_old = snapshot.column(table, name).is_some();
            let has_new = snapshot.column(table, &field.name).is_some();
            if field.name != name && has_old && !has_new {
                self.driver.rename_column(table, name, &field.name).await?;
            }
            if has_old || has_new {
                let column = self.driver.flatten_field(&field);
                self.driver.change_column(table, &column).await?;
            } else {
                debug!(table, column = name, "Column missing, not changing it");
            }
        }
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![ActionPair::new(
            Action::ChangeField {
                table: table.to_string(),
                name: name.to_string(),
                value: field.clone(),
            },
            Action::ChangeField {
                table: table.to_string(),
                name: field.name,
                value: previous,
            },
        )])
    }

    async fn delete_field(
        &mut self,
        table: &str,
        name: &str,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let snapshot = self.snapshot_if(options).await?;

        let (previous, position) = if options.apply {
            let entity = self.registry.require(table)?;
            ensure_authored(entity)?;
            let index = entity
                .field_position(name)
                .ok_or_else(|| MigrationError::not_found("field", format!("{table}.{name}")))?;
            if entity.fields[index].is_derived() {
                return Err(MigrationError::validation(format!(
                    "field '{table}.{name}' is generated by a relation"
                )));
            }
            let removed = self.registry.require_mut(table)?.fields.remove(index);
            (Some(removed), Some(index))
        } else {
            let entity = self.registry.get(table);
            (
                entity.and_then(|e| e.field(name)).cloned(),
                entity.and_then(|e| e.field_position(name)),
            )
        };

        let mut column_field = None;
        if let Some(snapshot) = &snapshot {
            if let Some(column) = snapshot.column(table, name) {
                column_field = Some(self.driver.column_to_field(column));
                if self.declares(table, name) {
                    debug!(table, column = name, "Column still declared, keeping it");
                } else {
                    self.driver.remove_column(table, name).await?;
                }
            }
        }
        if options.save {
            self.persist(&[table]).await?;
        }

        let restore = previous
            .or(column_field)
            .unwrap_or_else(|| Field::new(name, FieldType::Text));
        Ok(vec![ActionPair::new(
            Action::DeleteField {
                table: table.to_string(),
                name: name.to_string(),
            },
            Action::CreateField {
                table: table.to_string(),
                name: name.to_string(),
                value: restore,
                position,
            },
        )])
    }

    async fn add_relation(
        &mut self,
        table: &str,
        definition: &RelationDefinition,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        if options.apply {
            ensure_authored(self.registry.require(table)?)?;
            self.registry.require(&definition.reference.entity)?;
        }
        let snapshot = self.snapshot_if(options).await?;
        match definition.kind {
            RelationKind::BelongsTo => {
                self.add_belongs_to(table, definition, snapshot.as_ref(), options)
                    .await
            }
            RelationKind::HasMany | RelationKind::HasOne => {
                self.add_navigation(table, definition, options).await
            }
            RelationKind::BelongsToMany => {
                self.add_many_to_many(table, definition, snapshot.as_ref(), options)
                    .await
            }
        }
    }

    async fn add_belongs_to(
        &mut self,
        table: &str,
        definition: &RelationDefinition,
        snapshot: Option<&SchemaSnapshot>,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let target = definition.reference.entity.as_str();
        let key = self
            .lookup_key(snapshot, target, definition.reference.field.as_deref())
            .ok_or_else(|| match &definition.reference.field {
                Some(field) => MigrationError::not_found("field", format!("{target}.{field}")),
                None => {
                    MigrationError::validation(format!("entity '{target}' has no primary field"))
                }
            })?;
        if !key.primary && !key.unique.is_unique() {
            return Err(MigrationError::validation(format!(
                "'{target}.{}' must be primary or unique to be referenced",
                key.name
            )));
        }

        let column = definition
            .field
            .clone()
            .unwrap_or_else(|| format!("{target}_{}", key.name));
        let normalized = RelationDefinition {
            field: Some(column.clone()),
            reference: ReferenceDefinition {
                field: Some(key.name.clone()),
                ..definition.reference.clone()
            },
            ..definition.clone()
        };
        let mut derived = Field::new(&column, key.field_type);

        if options.apply {
            if self.declares(table, &column) {
                return Err(MigrationError::conflict(format!(
                    "field '{table}.{column}' already exists"
                )));
            }
            let target_id = self.registry.require(target)?.id.clone();
            derived.is_relation = Some(RelationRef {
                kind: RelationKind::BelongsTo,
                target: target_id.clone(),
            });
            let relation = Relation {
                kind: RelationKind::BelongsTo,
                field: Some(column.clone()),
                alias: definition.alias.clone(),
                target: target_id,
                target_field: Some(key.name.clone()),
                target_alias: definition.reference.alias.clone(),
                through: None,
                on_delete: definition.on_delete,
                on_update: definition.on_update,
            };
            let owner = self.registry.require_mut(table)?;
            owner.fields.push(derived.clone());
            owner.relations.push(relation);
        }
        if let Some(snapshot) = snapshot {
            let constraint = Constraint {
                column: column.clone(),
                references: ForeignKey::new(target, &key.name),
                on_delete: definition.on_delete,
                on_update: definition.on_update,
            };
            match snapshot.column(table, &column) {
                None => {
                    let flat = self.driver.flatten_field(&derived);
                    self.driver.add_column(table, &flat, None).await?;
                    self.driver.add_constraint(table, &constraint).await?;
                }
                Some(existing) if existing.foreign_key.as_ref() == Some(&constraint.references) => {
                    debug!(table, column = %column, "Constraint already present");
                }
                Some(existing) => {
                    if let Some(references) = &existing.foreign_key {
                        let stale = Constraint {
                            column: column.clone(),
                            references: references.clone(),
                            on_delete: existing.on_delete,
                            on_update: existing.on_update,
                        };
                        self.driver.drop_constraint(table, &stale).await?;
                    }
                    self.driver.add_constraint(table, &constraint).await?;
                }
            }
        }
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![relation_pair(table, normalized)])
    }

    async fn add_navigation(
        &mut self,
        table: &str,
        definition: &RelationDefinition,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let Some(foreign_key) = definition.reference.field.clone() else {
            return Err(MigrationError::validation(format!(
                "{} relation on '{table}' needs reference.field",
                definition.kind
            )));
        };

        if options.apply {
            let owner = self.registry.require(table)?;
            if self.registry.find_relation(owner, definition).is_some() {
                return Err(MigrationError::conflict(format!(
                    "relation '{table} {} {}' already exists",
                    definition.kind, definition.reference.entity
                )));
            }
            let target = self.registry.require(&definition.reference.entity)?.id.clone();
            let relation = Relation {
                kind: definition.kind,
                field: definition.field.clone(),
                alias: definition.alias.clone(),
                target,
                target_field: Some(foreign_key),
                target_alias: definition.reference.alias.clone(),
                through: None,
                on_delete: definition.on_delete,
                on_update: definition.on_update,
            };
            self.registry.require_mut(table)?.relations.push(relation);
        }
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![relation_pair(table, definition.clone())])
    }

    async fn add_many_to_many(
        &mut self,
        table: &str,
        definition: &RelationDefinition,
        snapshot: Option<&SchemaSnapshot>,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let target = definition.reference.entity.as_str();
        let owner_key = self.lookup_key(snapshot, table, None).ok_or_else(|| {
            MigrationError::validation(format!("entity '{table}' has no primary field"))
        })?;
        let target_key = self.lookup_key(snapshot, target, None).ok_or_else(|| {
            MigrationError::validation(format!("entity '{target}' has no primary field"))
        })?;

        let through = definition
            .through
            .clone()
            .unwrap_or_else(|| format!("{table}_{target}"));
        let field = definition
            .field
            .clone()
            .unwrap_or_else(|| format!("{table}_{}", owner_key.name));
        let reference_field = definition
            .reference
            .field
            .clone()
            .unwrap_or_else(|| format!("{target}_{}", target_key.name));
        if field == reference_field {
            return Err(MigrationError::validation(format!(
                "join columns of '{through}' must differ, both are '{field}'"
            )));
        }

        let normalized = RelationDefinition {
            field: Some(field.clone()),
            through: Some(through.clone()),
            reference: ReferenceDefinition {
                field: Some(reference_field.clone()),
                ..definition.reference.clone()
            },
            ..definition.clone()
        };
        let mut owner_column = join_key(&field, owner_key.field_type);
        let mut target_column = join_key(&reference_field, target_key.field_type);

        if options.apply {
            let owner = self.registry.require(table)?;
            let present = owner.relations.iter().any(|r| {
                r.kind == RelationKind::BelongsToMany
                    && r.through.as_ref().and_then(|id| self.registry.name_of(id))
                        == Some(through.as_str())
            });
            if present {
                debug!(table, through = %through, "Many-to-many relation already present");
                return Ok(Vec::new());
            }
            if self.registry.contains(&through) {
                return Err(MigrationError::conflict(format!(
                    "entity '{through}' already exists"
                )));
            }

            let owner_id = owner.id.clone();
            let target_id = self.registry.require(target)?.id.clone();
            let join_id = EntityId::generate();
            owner_column.is_relation = Some(RelationRef {
                kind: RelationKind::BelongsTo,
                target: owner_id.clone(),
            });
            target_column.is_relation = Some(RelationRef {
                kind: RelationKind::BelongsTo,
                target: target_id.clone(),
            });

            let mut join = Entity::new(join_id.clone(), &through);
            join.fields = vec![owner_column.clone(), target_column.clone()];
            join.is_relation = Some([
                JoinEndpoint {
                    entity: owner_id.clone(),
                    field: field.clone(),
                },
                JoinEndpoint {
                    entity: target_id.clone(),
                    field: reference_field.clone(),
                },
            ]);
            self.registry.insert(join)?;

            let forward = Relation {
                kind: RelationKind::BelongsToMany,
                field: Some(field.clone()),
                alias: definition.alias.clone(),
                target: target_id.clone(),
                target_field: Some(reference_field.clone()),
                target_alias: definition.reference.alias.clone(),
                through: Some(join_id.clone()),
                on_delete: definition.on_delete,
                on_update: definition.on_update,
            };
            let backward = Relation {
                kind: RelationKind::BelongsToMany,
                field: Some(reference_field.clone()),
                alias: definition.reference.alias.clone(),
                target: owner_id.clone(),
                target_field: Some(field.clone()),
                target_alias: definition.alias.clone(),
                through: Some(join_id),
                on_delete: definition.on_delete,
                on_update: definition.on_update,
            };
            if let Some(owner) = self.registry.by_id_mut(&owner_id) {
                owner.relations.push(forward);
            }
            if let Some(target) = self.registry.by_id_mut(&target_id) {
                target.relations.push(backward);
            }
        }
        if let Some(snapshot) = snapshot {
            if snapshot.contains_table(&through) {
                debug!(table = %through, "Join table exists");
            } else {
                let columns = [
                    self.driver.flatten_field(&owner_column).with_foreign_key(&Constraint {
                        column: field,
                        references: ForeignKey::new(table, &owner_key.name),
                        on_delete: definition.on_delete,
                        on_update: definition.on_update,
                    }),
                    self.driver.flatten_field(&target_column).with_foreign_key(&Constraint {
                        column: reference_field,
                        references: ForeignKey::new(target, &target_key.name),
                        on_delete: definition.on_delete,
                        on_update: definition.on_update,
                    }),
                ];
                self.driver.create_table(&through, &columns).await?;
            }
        }
        if options.save {
            self.persist(&[table, target]).await?;
        }

        Ok(vec![relation_pair(table, normalized)])
    }

    async fn delete_relation(
        &mut self,
        table: &str,
        definition: &RelationDefinition,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let found = self.registry.get(table).and_then(|owner| {
            let index = self.registry.find_relation(owner, definition)?;
            Some(owner.relations[index].clone())
        });
        let rendered = found
            .as_ref()
            .and_then(|r| self.registry.relation_definition(r))
            .unwrap_or_else(|| definition.clone());

        if options.apply && found.is_none() {
            if definition.kind == RelationKind::BelongsToMany {
                debug!(table, "Many-to-many relation already removed");
                return Ok(Vec::new());
            }
            self.registry.require(table)?;
            return Err(MigrationError::not_found(
                "relation",
                format!(
                    "{table} {} {}",
                    definition.kind, definition.reference.entity
                ),
            ));
        }
        let snapshot = self.snapshot_if(options).await?;

        match definition.kind {
            RelationKind::BelongsTo => {
                let Some(column) = rendered.field.clone() else {
                    return Err(MigrationError::validation(format!(
                        "belongsTo relation on '{table}' has no field"
                    )));
                };
                if let (true, Some(relation)) = (options.apply, &found) {
                    let owner = self.registry.require_mut(table)?;
                    owner.relations.retain(|r| r != relation);
                    owner.fields.retain(|f| !(f.name == column && f.is_derived()));
                }
                if let Some(existing) = snapshot.as_ref().and_then(|s| s.column(table, &column)) {
                    if let Some(references) = &existing.foreign_key {
                        let constraint = Constraint {
                            column: column.clone(),
                            references: references.clone(),
                            on_delete: existing.on_delete,
                            on_update: existing.on_update,
                        };
                        self.driver.drop_constraint(table, &constraint).await?;
                    }
                    if self.declares(table, &column) {
                        debug!(table, column = %column, "Column still declared, keeping it");
                    } else {
                        self.driver.remove_column(table, &column).await?;
                    }
                }
                if options.save {
                    self.persist(&[table]).await?;
                }
            }
            RelationKind::HasMany | RelationKind::HasOne => {
                if let (true, Some(relation)) = (options.apply, &found) {
                    self.registry
                        .require_mut(table)?
                        .relations
                        .retain(|r| r != relation);
                }
                if options.save {
                    self.persist(&[table]).await?;
                }
            }
            RelationKind::BelongsToMany => {
                let through = rendered.through.clone().unwrap_or_else(|| {
                    format!("{table}_{}", rendered.reference.entity)
                });
                if let (true, Some(relation)) = (options.apply, &found) {
                    let join_id = relation.through.clone();
                    for id in [self.registry.id_of(table).cloned(), Some(relation.target.clone())]
                        .into_iter()
                        .flatten()
                    {
                        if let Some(entity) = self.registry.by_id_mut(&id) {
                            entity.relations.retain(|r| {
                                !(r.kind == RelationKind::BelongsToMany && r.through == join_id)
                            });
                        }
                    }
                    if let Some(name) = join_id
                        .as_ref()
                        .and_then(|id| self.registry.name_of(id))
                        .map(str::to_string)
                    {
                        self.registry.remove(&name);
                    }
                }
                if let Some(snapshot) = &snapshot {
                    if snapshot.contains_table(&through) {
                        self.driver.drop_table(&through).await?;
                    } else {
                        debug!(table = %through, "Join table already dropped");
                    }
                }
                if options.save {
                    self.persist(&[table, rendered.reference.entity.as_str()])
                        .await?;
                }
            }
        }

        Ok(vec![relation_pair(table, rendered).inverse()])
    }

    async fn add_query(
        &mut self,
        table: &str,
        id: &str,
        value: &Query,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let mut query = value.clone();
        query.id = id.to_string();

        if options.apply {
            let entity = self.registry.require_mut(table)?;
            if entity.query(id).is_some() {
                return Err(MigrationError::conflict(format!(
                    "query '{table}.{id}' already exists"
                )));
            }
            entity.queries.push(query.clone());
        }
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![ActionPair::new(
            Action::AddQuery {
                table: table.to_string(),
                id: id.to_string(),
                value: query,
            },
            Action::DeleteQuery {
                table: table.to_string(),
                id: id.to_string(),
            },
        )])
    }

    async fn delete_query(
        &mut self,
        table: &str,
        id: &str,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let previous = if options.apply {
            let entity = self.registry.require_mut(table)?;
            let index = entity
                .queries
                .iter()
                .position(|q| q.id == id)
                .ok_or_else(|| MigrationError::not_found("query", format!("{table}.{id}")))?;
            entity.queries.remove(index)
        } else {
            self.registry
                .get(table)
                .and_then(|e| e.query(id))
                .cloned()
                .unwrap_or_else(|| Query::new(id, QueryKind::Custom))
        };
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![ActionPair::new(
            Action::DeleteQuery {
                table: table.to_string(),
                id: id.to_string(),
            },
            Action::AddQuery {
                table: table.to_string(),
                id: id.to_string(),
                value: previous,
            },
        )])
    }

    async fn update_query(
        &mut self,
        table: &str,
        id: &str,
        value: &Query,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let previous = if options.apply {
            let entity = self.registry.require_mut(table)?;
            let index = entity
                .queries
                .iter()
                .position(|q| q.id == id)
                .ok_or_else(|| MigrationError::not_found("query", format!("{table}.{id}")))?;
            if value.id != id && entity.query(&value.id).is_some() {
                return Err(MigrationError::conflict(format!(
                    "query '{table}.{}' already exists",
                    value.id
                )));
            }
            std::mem::replace(&mut entity.queries[index], value.clone())
        } else {
            self.registry
                .get(table)
                .and_then(|e| e.query(id))
                .cloned()
                .unwrap_or_else(|| value.clone())
        };
        if options.save {
            self.persist(&[table]).await?;
        }

        Ok(vec![ActionPair::new(
            Action::UpdateQuery {
                table: table.to_string(),
                id: id.to_string(),
                value: value.clone(),
            },
            Action::UpdateQuery {
                table: table.to_string(),
                id: value.id.clone(),
                value: previous,
            },
        )])
    }
}

#[async_trait::async_trait]
impl ActionHandler for Workspace {
    async fn handle(
        &mut self,
        action: &Action,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        if self.log_actions {
            info!(action = %action, ?options, "Applying action");
        } else {
            debug!(action = %action, ?options, "Applying action");
        }

        let before = options.apply.then(|| self.registry.clone());
        let result = match action {
            Action::CreateEntity { table, value } => {
                self.create_entity(table, value, options).await
            }
            Action::RenameEntity { table, value } => {
                self.rename_entity(table, value, options).await
            }
            Action::DeleteEntity { table } => self.delete_entity(table, options).await,
            Action::CreateField {
                table,
                name,
                value,
                position,
            } => {
                self.create_field(table, name, value, *position, options)
                    .await
            }
            Action::ChangeField { table, name, value } => {
                self.change_field(table, name, value, options).await
            }
            Action::DeleteField { table, name } => self.delete_field(table, name, options).await,
            Action::AddRelation { table, value } => {
                self.add_relation(table, value, options).await
            }
            Action::DeleteRelation { table, value } => {
                self.delete_relation(table, value, options).await
            }
            Action::AddQuery { table, id, value } => {
                self.add_query(table, id, value, options).await
            }
            Action::DeleteQuery { table, id } => self.delete_query(table, id, options).await,
            Action::UpdateQuery { table, id, value } => {
                self.update_query(table, id, value, options).await
            }
        };

        if let (Err(_), Some(before)) = (&result, before) {
            self.restore(before, options).await;
        }
        result.map_err(|e| match e {
            MigrationError::Database(_) => MigrationError::schema(action, e),
            other => other,
        })
    }

    fn has_entity(&self, name: &str) -> bool {
        self.registry.contains(name)
    }
}

/// Names whose persisted form differs between two registries.
fn changed_entities(before: &EntityRegistry, after: &EntityRegistry) -> Vec<String> {
    let mut names: Vec<String> = before
        .find_all()
        .chain(after.find_all())
        .map(|e| e.name.clone())
        .collect();
    names.sort();
    names.dedup();
    names.retain(|name| before.definition(name) != after.definition(name));
    names
}

fn ensure_authored(entity: &Entity) -> MigrateResult<()> {
    if entity.is_join() {
        return Err(MigrationError::validation(format!(
            "'{}' is a join entity and is managed by its relation",
            entity.name
        )));
    }
    Ok(())
}

fn join_key(name: &str, field_type: FieldType) -> Field {
    Field::new(name, field_type).primary().unique().required()
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
