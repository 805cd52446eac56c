//! Undo/redo history of action pairs.
//!
//! One [`HistoryEntry`] is recorded per user operation. An operation that
//! cascades (deleting an entity removes the relations pointing at it)
//! produces several pairs; they are undone together, last first.

use std::mem;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionPair, ApplyOptions};
use crate::error::{MigrateResult, MigrationError};

/// Executes single actions. Dispatch over [`Action`] is a closed `match`.
#[async_trait::async_trait]
pub trait ActionHandler: Send {
    /// Execute `action` with the given side effects. Returns the pairs
    /// describing every change made, cascades included.
    async fn handle(
        &mut self,
        action: &Action,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<ActionPair>>;

    /// Whether an entity named `name` currently exists.
    fn has_entity(&self, name: &str) -> bool;
}

/// The pairs recorded for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Pairs in execution order.
    pub pairs: Vec<ActionPair>,
    /// When the operation ran.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create an entry stamped now.
    pub fn new(pairs: Vec<ActionPair>) -> Self {
        Self {
            pairs,
            recorded_at: Utc::now(),
        }
    }
}

/// Linear undo/redo log.
#[derive(Debug, Clone, Default)]
pub struct History {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    limit: Option<usize>,
}

impl History {
    /// Create an unbounded history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` undoable entries.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self.truncate();
        self
    }

    /// Entries that can be undone, oldest first.
    pub fn undo_stack(&self) -> &[HistoryEntry] {
        &self.undo_stack
    }

    /// Entries that can be redone, oldest first.
    pub fn redo_stack(&self) -> &[HistoryEntry] {
        &self.redo_stack
    }

    /// Whether there is something to undo.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Whether there is something to redo.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Drop both stacks.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Record a new operation. Clears the redo stack. Empty operations are
    /// not recorded.
    pub fn push(&mut self, pairs: Vec<ActionPair>) {
        if pairs.is_empty() {
            return;
        }
        self.undo_stack.push(HistoryEntry::new(pairs));
        self.redo_stack.clear();
        self.truncate();
    }

    fn truncate(&mut self) {
        if let Some(limit) = self.limit {
            let excess = self.undo_stack.len().saturating_sub(limit);
            self.undo_stack.drain(..excess);
        }
    }

    /// Undo the last operation. Returns `false` when there was nothing to
    /// undo. On failure the pairs already undone are redone and the entry
    /// stays on the undo stack.
    pub async fn undo<H: ActionHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        options: ApplyOptions,
    ) -> MigrateResult<bool> {
        let Some(entry) = self.undo_stack.pop() else {
            return Ok(false);
        };
        let steps: Vec<(&Action, &Action)> = entry
            .pairs
            .iter()
            .rev()
            .map(|p| (&p.undo, &p.redo))
            .collect();
        if let Err(e) = run_entry(handler, &steps, options).await {
            self.undo_stack.push(entry);
            return Err(e);
        }
        self.redo_stack.push(entry);
        Ok(true)
    }

    /// Redo the last undone operation. Returns `false` when there was
    /// nothing to redo. On failure the pairs already redone are undone and
    /// the entry stays on the redo stack.
    pub async fn redo<H: ActionHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        options: ApplyOptions,
    ) -> MigrateResult<bool> {
        let Some(entry) = self.redo_stack.pop() else {
            return Ok(false);
        };
        let steps: Vec<(&Action, &Action)> =
            entry.pairs.iter().map(|p| (&p.redo, &p.undo)).collect();
        if let Err(e) = run_entry(handler, &steps, options).await {
            self.redo_stack.push(entry);
            return Err(e);
        }
        self.undo_stack.push(entry);
        Ok(true)
    }

    /// Replay the `redo` side of `pairs` in order without touching the
    /// live stacks. Returns the actions that ran.
    pub async fn apply<H: ActionHandler + ?Sized>(
        &mut self,
        pairs: &[ActionPair],
        handler: &mut H,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<Action>> {
        let actions: Vec<&Action> = pairs.iter().map(|p| &p.redo).collect();
        self.replay(&actions, handler, options).await
    }

    /// Replay the `undo` side of `pairs` in order without touching the live
    /// stacks. `pairs` must already be ordered for replay. Returns the
    /// actions that ran.
    pub async fn revert<H: ActionHandler + ?Sized>(
        &mut self,
        pairs: &[ActionPair],
        handler: &mut H,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<Action>> {
        let actions: Vec<&Action> = pairs.iter().map(|p| &p.undo).collect();
        self.replay(&actions, handler, options).await
    }

    async fn replay<H: ActionHandler + ?Sized>(
        &mut self,
        actions: &[&Action],
        handler: &mut H,
        options: ApplyOptions,
    ) -> MigrateResult<Vec<Action>> {
        let undo_stack = mem::take(&mut self.undo_stack);
        let redo_stack = mem::take(&mut self.redo_stack);
        info!(count = actions.len(), "Replaying actions");

        let mut applied = Vec::with_capacity(actions.len());
        let mut failure = None;
        for action in actions {
            match execute(handler, action, options).await {
                Ok(true) => applied.push((*action).clone()),
                Ok(false) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.undo_stack = undo_stack;
        self.redo_stack = redo_stack;

        match failure {
            Some(source) => {
                warn!(
                    applied = applied.len(),
                    error = %source,
                    "Replay failed, history restored"
                );
                Err(MigrationError::PartialReplay {
                    applied,
                    source: Box::new(source),
                })
            }
            None => {
                info!(applied = applied.len(), "Replay finished");
                Ok(applied)
            }
        }
    }
}

/// Run the `(action, inverse)` steps of one entry in order. When a step
/// fails, the inverses of the steps that ran are executed newest first so
/// the entry can be retried.
async fn run_entry<H: ActionHandler + ?Sized>(
    handler: &mut H,
    steps: &[(&Action, &Action)],
    options: ApplyOptions,
) -> MigrateResult<()> {
    let mut done = Vec::with_capacity(steps.len());
    for (action, inverse) in steps {
        match execute(handler, action, options).await {
            Ok(true) => done.push(*inverse),
            Ok(false) => {}
            Err(e) => {
                warn!(action = %action, rolled_back = done.len(), "Entry failed, rolling back");
                for inverse in done.into_iter().rev() {
                    if let Err(rollback) = execute(handler, inverse, options).await {
                        warn!(action = %inverse, error = %rollback, "Rollback step failed");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Run one action through the handler. Actions whose entities are gone are
/// skipped (returns `false`), except entity creation, deletion and renames.
async fn execute<H: ActionHandler + ?Sized>(
    handler: &mut H,
    action: &Action,
    options: ApplyOptions,
) -> MigrateResult<bool> {
    if !action.is_entity_lifecycle() {
        if let Some(missing) = action
            .referenced_entities()
            .into_iter()
            .find(|name| !handler.has_entity(name))
        {
            warn!(action = %action, entity = missing, "Skipping action on missing entity");
            return Ok(false);
        }
    }
    debug!(action = %action, "Executing action");
    handler.handle(action, options).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use strata_schema::{EntityDefinition, RelationDefinition};

    /// Tracks entity names only; fails on the table named `boom`.
    #[derive(Default)]
    struct Recorder {
        entities: HashSet<String>,
        executed: Vec<Action>,
    }

    #[async_trait::async_trait]
    impl ActionHandler for Recorder {
        async fn handle(
            &mut self,
            action: &Action,
            _options: ApplyOptions,
        ) -> MigrateResult<Vec<ActionPair>> {
            if action.table() == "boom" {
                return Err(MigrationError::database("boom"));
            }
            match action {
                Action::CreateEntity { table, .. } => {
                    self.entities.insert(table.clone());
                }
                Action::DeleteEntity { table } => {
                    self.entities.remove(table);
                }
                _ => {}
            }
            self.executed.push(action.clone());
            Ok(Vec::new())
        }

        fn has_entity(&self, name: &str) -> bool {
            self.entities.contains(name)
        }
    }

    fn create(table: &str) -> ActionPair {
        ActionPair::new(
            Action::CreateEntity {
                table: table.to_string(),
                value: EntityDefinition::new(),
            },
            Action::DeleteEntity {
                table: table.to_string(),
            },
        )
    }

    fn relation(table: &str, target: &str) -> ActionPair {
        let value = RelationDefinition::belongs_to(target);
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

    #[tokio::test]
    async fn test_undo_redo_cycle() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        handler.entities.insert("a".to_string());
        history.push(vec![create("a")]);

        assert!(history.undo(&mut handler, ApplyOptions::replay()).await.unwrap());
        assert!(!handler.has_entity("a"));
        assert!(history.can_redo());

        assert!(history.redo(&mut handler, ApplyOptions::replay()).await.unwrap());
        assert!(handler.has_entity("a"));
        assert!(!history.can_redo());
        assert!(!history.redo(&mut handler, ApplyOptions::replay()).await.unwrap());
    }

    #[tokio::test]
    async fn test_push_clears_redo() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        history.push(vec![create("a")]);
        history.undo(&mut handler, ApplyOptions::replay()).await.unwrap();

        history.push(vec![create("b")]);
        assert!(!history.can_redo());
        assert_eq!(history.undo_stack().len(), 1);
    }

    #[tokio::test]
    async fn test_undo_runs_entry_backwards() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        handler.entities.extend(["a".to_string(), "b".to_string()]);
        history.push(vec![relation("a", "b"), create("b").inverse()]);

        history.undo(&mut handler, ApplyOptions::replay()).await.unwrap();
        let types: Vec<_> = handler.executed.iter().map(Action::type_name).collect();
        assert_eq!(types, vec!["create_entity", "delete_relation"]);
    }

    #[tokio::test]
    async fn test_failed_undo_keeps_entry() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        history.push(vec![create("boom")]);

        assert!(history.undo(&mut handler, ApplyOptions::replay()).await.is_err());
        assert_eq!(history.undo_stack().len(), 1);
        assert!(!history.can_redo());
    }

    #[tokio::test]
    async fn test_failed_undo_rolls_back_entry() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        handler.entities.extend(["a".to_string(), "boom".to_string()]);
        history.push(vec![create("boom"), create("a")]);

        assert!(history.undo(&mut handler, ApplyOptions::replay()).await.is_err());
        assert!(handler.has_entity("a"));
        let types: Vec<_> = handler.executed.iter().map(Action::type_name).collect();
        assert_eq!(types, vec!["delete_entity", "create_entity"]);
        assert_eq!(history.undo_stack().len(), 1);
        assert!(!history.can_redo());
    }

    #[tokio::test]
    async fn test_failed_redo_rolls_back_entry() {
        let mut handler = Recorder::default();
        let mut history = History::new();
        history.redo_stack.push(HistoryEntry::new(vec![create("a"), create("boom")]));

        assert!(history.redo(&mut handler, ApplyOptions::replay()).await.is_err());
        assert!(!handler.has_entity("a"));
        let types: Vec<_> = handler.executed.iter().map(Action::type_name).collect();
        assert_eq!(types, vec!["create_entity", "delete_entity"]);
        assert_eq!(history.redo_stack().len(), 1);
        assert!(!history.can_undo());
    }

    #[tokio::test]
    async fn test_apply_skips_orphans() {
        let mut history = History::new();
        let mut handler = Recorder::default();

        let applied = history
            .apply(
                &[create("a"), relation("a", "ghost"), relation("a", "a")],
                &mut handler,
                ApplyOptions::model_only(),
            )
            .await
            .unwrap();

        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1].type_name(), "add_relation");
    }

    #[tokio::test]
    async fn test_revert_replays_in_order() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        handler.entities.extend(["a".to_string(), "b".to_string()]);

        let applied = history
            .revert(
                &[create("a"), create("b")],
                &mut handler,
                ApplyOptions::database_only(),
            )
            .await
            .unwrap();
        let tables: Vec<_> = applied.iter().map(Action::table).collect();
        assert_eq!(tables, vec!["a", "b"]);
        assert!(applied.iter().all(|a| a.type_name() == "delete_entity"));
    }

    #[tokio::test]
    async fn test_partial_replay_restores_stacks() {
        let mut history = History::new();
        let mut handler = Recorder::default();
        history.push(vec![create("x")]);

        let err = history
            .apply(
                &[create("a"), create("boom"), create("c")],
                &mut handler,
                ApplyOptions::model_only(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.applied_actions().map(<[Action]>::len), Some(1));
        assert_eq!(history.undo_stack().len(), 1);
        assert!(!handler.has_entity("c"));
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::new().with_limit(Some(2));
        history.push(vec![create("a")]);
        history.push(vec![create("b")]);
        history.push(vec![create("c")]);

        let tables: Vec<_> = history
            .undo_stack()
            .iter()
            .map(|e| e.pairs[0].redo.table())
            .collect();
        assert_eq!(tables, vec!["b", "c"]);
    }

    #[test]
    fn test_empty_push_ignored() {
        let mut history = History::new();
        history.push(Vec::new());
        assert!(!history.can_undo());
    }
}
