//! The project: one entity model bound to one database.
//!
//! [`Project`] is the explicit context object of an application instance.
//! It owns the [`Workspace`] and the [`History`] log, exposes the user-level
//! entity operations, and drives loading, rename detection and
//! synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use strata_schema::{
    Entity, EntityDefinition, Field, Query, RelationDefinition, StrataConfig, SyncOnLoad,
};
use tracing::{debug, info, instrument};

use crate::action::{Action, ActionPair, ApplyOptions};
use crate::diff::{Diff, Synchronizer};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{self, SyncResult};
use crate::history::{ActionHandler, History};
use crate::hooks::{EntityHooks, QueryRunner};
use crate::introspect::SchemaDriver;
use crate::registry::EntityRegistry;
use crate::store::{EntityStore, FsEntityStore};
use crate::workspace::Workspace;

/// What [`Project::load`] did.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Entities loaded from storage.
    pub entities: usize,
    /// Renames detected from the identity map.
    pub renames: Vec<Action>,
    /// Synchronization run on load, if configured.
    pub sync: Option<SyncResult>,
}

/// Entity model, history and database of one application.
pub struct Project {
    config: StrataConfig,
    workspace: Workspace,
    history: History,
    queries: Option<Arc<dyn QueryRunner>>,
}

impl Project {
    /// Create an empty project.
    pub fn new(
        config: StrataConfig,
        driver: Arc<dyn SchemaDriver>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        let workspace = Workspace::new(driver, store).with_action_log(config.debug.log_actions);
        let history = History::new().with_limit(config.history.limit);
        Self {
            config,
            workspace,
            history,
            queries: None,
        }
    }

    /// Create an empty project storing entities on disk where `config`
    /// says.
    pub fn from_config(config: StrataConfig, driver: Arc<dyn SchemaDriver>) -> Self {
        let store = Arc::new(FsEntityStore::from_config(&config));
        Self::new(config, driver, store)
    }

    /// Create a project and load its entities.
    pub async fn open(
        config: StrataConfig,
        driver: Arc<dyn SchemaDriver>,
        store: Arc<dyn EntityStore>,
    ) -> MigrateResult<(Self, LoadReport)> {
        let mut project = Self::new(config, driver, store);
        let report = project.load().await?;
        Ok((project, report))
    }

    /// Notify `hooks` of entity renames and removals.
    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.workspace = self.workspace.with_hooks(hooks);
        self
    }

    /// Run entity queries through `runner`.
    pub fn with_query_runner(mut self, runner: Arc<dyn QueryRunner>) -> Self {
        self.queries = Some(runner);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        self.workspace.registry()
    }

    /// The undo/redo log.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// The underlying workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Load entity definitions from the store.
    ///
    /// Entities are created first and relations added second, so relations
    /// may point at entities defined later. Relations naming an entity by a
    /// name it had before an offline rename are pointed at its current name.
    /// Definitions without an id get one, and definitions that changed are
    /// written back. Renames are detected against the stored identity map,
    /// then the configured load-time sync runs.
    #[instrument(skip(self))]
    pub async fn load(&mut self) -> MigrateResult<LoadReport> {
        if !self.workspace.registry().is_empty() {
            return Err(MigrationError::conflict("project is already loaded"));
        }

        let definitions = self.workspace.store().load_all().await?;
        let mut changed = Vec::new();
        for (name, definition) in &definitions {
            if definition.id.is_none() {
                changed.push(name.as_str());
            }
            let entity = EntityDefinition {
                relations: Vec::new(),
                ..definition.clone()
            };
            let create = Action::CreateEntity {
                table: name.clone(),
                value: entity,
            };
            self.workspace.handle(&create, ApplyOptions::in_memory()).await?;
        }

        let previous = self.workspace.store().load_identity().await?;
        let renames = executor::detect_renames(&previous, self.workspace.registry());
        let moved = moved_names(&renames, self.workspace.registry());
        for (name, definition) in &definitions {
            let mut retargeted = false;
            for relation in &definition.relations {
                let mut relation = relation.clone();
                retargeted |= retarget(&mut relation, &moved);
                let add = Action::AddRelation {
                    table: name.clone(),
                    value: relation,
                };
                self.workspace.handle(&add, ApplyOptions::in_memory()).await?;
            }
            if retargeted && !changed.contains(&name.as_str()) {
                debug!(entity = %name, "Relations follow renamed entities");
                changed.push(name.as_str());
            }
        }
        self.workspace.persist(&changed).await?;

        let mut report = LoadReport {
            entities: definitions.len(),
            ..LoadReport::default()
        };
        if self.config.sync.detect_renames {
            executor::apply_renames(&mut self.workspace, &renames).await?;
            report.renames = renames;
        }
        self.workspace.save_identity().await?;

        report.sync = match self.config.sync.on_load {
            SyncOnLoad::None => None,
            SyncOnLoad::Pull => Some(self.pull().await?),
            SyncOnLoad::Push => Some(self.push().await?),
        };

        info!(
            entities = report.entities,
            renames = report.renames.len(),
            "Loaded project"
        );
        Ok(report)
    }

    /// Run `action` with the given side effects, recording it in the
    /// history when `options.history` is set.
    pub async fn execute(
        &mut self,
        action: Action,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>> {
        let pairs = self.workspace.handle(&action, options).await?;
        if options.history {
            self.history.push(pairs.clone());
        }
        Ok(pairs)
    }

    async fn edit(&mut self, action: Action) -> MigrateResult<Vec<ActionPair>> {
        self.execute(action, ApplyOptions::edit()).await
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.workspace.registry().get(name)
    }

    /// All entities, join entities included.
    pub fn find_all(&self) -> impl Iterator<Item = &Entity> {
        self.workspace.registry().find_all()
    }

    /// Create an entity.
    pub async fn add(
        &mut self,
        name: &str,
        definition: EntityDefinition,
    ) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::CreateEntity {
            table: name.to_string(),
            value: definition,
        })
        .await
    }

    /// Delete an entity and the relations pointing at it.
    pub async fn remove(&mut self, name: &str) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::DeleteEntity {
            table: name.to_string(),
        })
        .await
    }

    /// Rename an entity.
    pub async fn rename(&mut self, from: &str, to: &str) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::RenameEntity {
            table: from.to_string(),
            value: to.to_string(),
        })
        .await
    }

    /// Append a field.
    pub async fn add_field(&mut self, table: &str, field: Field) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::CreateField {
            table: table.to_string(),
            name: field.name.clone(),
            value: field,
            position: None,
        })
        .await
    }

    /// Replace field `name`; `field` may carry a new name.
    pub async fn change_field(
        &mut self,
        table: &str,
        name: &str,
        field: Field,
    ) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::ChangeField {
            table: table.to_string(),
            name: name.to_string(),
            value: field,
        })
        .await
    }

    /// Remove a field.
    pub async fn remove_field(&mut self, table: &str, name: &str) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::DeleteField {
            table: table.to_string(),
            name: name.to_string(),
        })
        .await
    }

    /// Add a relation owned by `table`.
    pub async fn add_relation(
        &mut self,
        table: &str,
        relation: RelationDefinition,
    ) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::AddRelation {
            table: table.to_string(),
            value: relation,
        })
        .await
    }

    /// Remove a relation owned by `table`.
    pub async fn remove_relation(
        &mut self,
        table: &str,
        relation: RelationDefinition,
    ) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::DeleteRelation {
            table: table.to_string(),
            value: relation,
        })
        .await
    }

    /// Add a query.
    pub async fn add_query(&mut self, table: &str, query: Query) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::AddQuery {
            table: table.to_string(),
            id: query.id.clone(),
            value: query,
        })
        .await
    }

    /// Replace query `id`.
    pub async fn update_query(
        &mut self,
        table: &str,
        id: &str,
        query: Query,
    ) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::UpdateQuery {
            table: table.to_string(),
            id: id.to_string(),
            value: query,
        })
        .await
    }

    /// Remove query `id`.
    pub async fn remove_query(&mut self, table: &str, id: &str) -> MigrateResult<Vec<ActionPair>> {
        self.edit(Action::DeleteQuery {
            table: table.to_string(),
            id: id.to_string(),
        })
        .await
    }

    /// Undo the last operation. Returns `false` when there is none.
    pub async fn undo(&mut self) -> MigrateResult<bool> {
        self.history
            .undo(&mut self.workspace, ApplyOptions::replay())
            .await
    }

    /// Redo the last undone operation. Returns `false` when there is none.
    pub async fn redo(&mut self) -> MigrateResult<bool> {
        self.history
            .redo(&mut self.workspace, ApplyOptions::replay())
            .await
    }

    /// Compare the model with the live database.
    pub async fn diff(&self) -> MigrateResult<Diff> {
        let snapshot = self.workspace.snapshot().await?;
        Ok(Synchronizer::new(self.workspace.registry(), &snapshot).diff())
    }

    /// Make the database match the model as described by `diff`.
    pub async fn entities_to_database(&mut self, diff: &Diff) -> MigrateResult<SyncResult> {
        executor::entities_to_database(&mut self.history, &mut self.workspace, diff).await
    }

    /// Make the model match the database as described by `diff`.
    pub async fn database_to_entities(&mut self, diff: &Diff) -> MigrateResult<SyncResult> {
        executor::database_to_entities(&mut self.history, &mut self.workspace, diff).await
    }

    /// Diff and pull the database into the model.
    pub async fn pull(&mut self) -> MigrateResult<SyncResult> {
        let diff = self.diff().await?;
        self.database_to_entities(&diff).await
    }

    /// Diff and push the model onto the database.
    pub async fn push(&mut self) -> MigrateResult<SyncResult> {
        let diff = self.diff().await?;
        self.entities_to_database(&diff).await
    }

    /// Run query `id` of `entity` with request parameters.
    pub async fn run_query(&self, entity: &str, id: &str, params: Value) -> MigrateResult<Value> {
        let runner = self
            .queries
            .as_ref()
            .ok_or_else(|| MigrationError::query("no query runner configured"))?;
        let entity = self.workspace.registry().require(entity)?;
        let query = entity
            .query(id)
            .ok_or_else(|| MigrationError::not_found("query", format!("{}.{id}", entity.name)))?;
        runner.run(entity, query, params).await
    }
}

/// Old names of renamed entities mapped to their current names. Old names
/// that another entity has taken since are left out.
fn moved_names(renames: &[Action], registry: &EntityRegistry) -> HashMap<String, String> {
    renames
        .iter()
        .filter_map(|rename| match rename {
            Action::RenameEntity { table, value } if !registry.contains(table) => {
                Some((table.clone(), value.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Point `relation` at the current names in `moved`. Returns whether
/// anything changed.
fn retarget(relation: &mut RelationDefinition, moved: &HashMap<String, String>) -> bool {
    let mut changed = false;
    if let Some(current) = moved.get(&relation.reference.entity) {
        relation.reference.entity = current.clone();
        changed = true;
    }
    if let Some(current) = relation.through.as_ref().and_then(|t| moved.get(t)).cloned() {
        relation.through = Some(current);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn project() -> (Arc<MemoryDriver>, Arc<MemoryStore>, Project) {
        let driver = Arc::new(MemoryDriver::new());
        let store = Arc::new(MemoryStore::new());
        let project = Project::new(StrataConfig::default(), driver.clone(), store.clone());
        (driver, store, project)
    }

    fn definition() -> EntityDefinition {
        EntityDefinition::new().field("id:number,primary,unique,autoIncrement,required".parse().unwrap())
    }

    struct Echo;

    #[async_trait::async_trait]
    impl QueryRunner for Echo {
        async fn run(&self, entity: &Entity, query: &Query, params: Value) -> MigrateResult<Value> {
            Ok(json!({ "entity": entity.name, "query": query.id, "params": params }))
        }
    }

    #[tokio::test]
    async fn test_operations_are_recorded_once() {
        let (_, _, mut project) = project();
        project.add("user", definition()).await.unwrap();
        project
            .add(
                "post",
                definition().relation(RelationDefinition::belongs_to("user")),
            )
            .await
            .unwrap();

        // Entity plus relation form one undoable operation.
        assert_eq!(project.history().undo_stack().len(), 2);
        assert_eq!(project.history().undo_stack()[1].pairs.len(), 2);

        assert!(project.undo().await.unwrap());
        assert!(project.get("post").is_none());
        assert!(project.redo().await.unwrap());
        assert!(project.get("post").unwrap().field("user_id").is_some());
    }

    #[tokio::test]
    async fn test_field_and_query_operations() {
        let (driver, _, mut project) = project();
        project.add("user", definition()).await.unwrap();
        project
            .add_field("user", "email:text,unique".parse().unwrap())
            .await
            .unwrap();
        project
            .change_field("user", "email", "mail:text,unique".parse().unwrap())
            .await
            .unwrap();
        assert!(driver.snapshot().column("user", "mail").is_some());

        project.remove_field("user", "mail").await.unwrap();
        assert!(driver.snapshot().column("user", "mail").is_none());

        project.remove_query("user", "delete").await.unwrap();
        project
            .add_query("user", Query::new("search", strata_schema::QueryKind::Custom))
            .await
            .unwrap();
        let ids: Vec<_> = project.get("user").unwrap().queries.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["list", "get", "create", "update", "search"]);

        project.undo().await.unwrap();
        project.undo().await.unwrap();
        assert!(project.get("user").unwrap().query("delete").is_some());
    }

    #[tokio::test]
    async fn test_load_twice_fails() {
        let (_, _, mut project) = project();
        project.add("user", definition()).await.unwrap();
        assert!(matches!(
            project.load().await,
            Err(MigrationError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_open_assigns_missing_ids() {
        let driver = Arc::new(MemoryDriver::new());
        let store = Arc::new(MemoryStore::new());
        store.save("user", &definition()).await.unwrap();
        store
            .save(
                "post",
                &definition().relation(RelationDefinition::belongs_to("user")),
            )
            .await
            .unwrap();

        let (project, report) = Project::open(StrataConfig::default(), driver.clone(), store.clone())
            .await
            .unwrap();

        assert_eq!(report.entities, 2);
        assert!(report.renames.is_empty());
        assert!(report.sync.is_none());
        assert!(store.get("user").unwrap().id.is_some());
        assert_eq!(store.load_identity().await.unwrap().len(), 2);
        assert!(project.get("post").unwrap().field("user_id").is_some());
        // Loading never touches the database.
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_open_with_push() {
        let driver = Arc::new(MemoryDriver::new());
        let store = Arc::new(MemoryStore::new());
        store.save("user", &definition()).await.unwrap();

        let mut config = StrataConfig::default();
        config.sync.on_load = SyncOnLoad::Push;
        let (project, report) = Project::open(config, driver.clone(), store).await.unwrap();

        assert!(report.sync.unwrap().has_changes());
        assert!(driver.snapshot().contains_table("user"));
        assert!(project.diff().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_query() {
        let (_, _, project) = project();
        assert!(matches!(
            project.run_query("user", "list", json!({})).await,
            Err(MigrationError::Query(_))
        ));

        let (_, _, project) = self::project();
        let mut project = project.with_query_runner(Arc::new(Echo));
        project.add("user", definition()).await.unwrap();

        let result = project.run_query("user", "list", json!({ "limit": 5 })).await.unwrap();
        assert_eq!(result["query"], "list");
        assert_eq!(result["params"]["limit"], 5);

        assert!(matches!(
            project.run_query("user", "nope", Value::Null).await,
            Err(MigrationError::NotFound { kind: "query", .. })
        ));
    }

    #[tokio::test]
    async fn test_history_limit_from_config() {
        let mut config = StrataConfig::default();
        config.history.limit = Some(1);
        let mut project = Project::new(config, Arc::new(MemoryDriver::new()), Arc::new(MemoryStore::new()));

        project.add("a", definition()).await.unwrap();
        project.add("b", definition()).await.unwrap();
        assert_eq!(project.history().undo_stack().len(), 1);
    }
}
