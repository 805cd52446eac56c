//! Migration executor.
//!
//! Replays a [`Diff`] in either direction through the [`History`] log and
//! turns identity map changes into table renames.

use std::time::Instant;

use tracing::{info, instrument};

use crate::action::{Action, ApplyOptions};
use crate::diff::Diff;
use crate::error::MigrateResult;
use crate::history::{ActionHandler, History};
use crate::registry::EntityRegistry;
use crate::store::IdentityMap;

/// Direction of a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Database schema into the entity model.
    Pull,
    /// Entity model onto the database schema.
    Push,
}

/// Result of a synchronization.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// Which way the diff was replayed.
    pub direction: SyncDirection,
    /// Actions that ran, in order.
    pub applied: Vec<Action>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl SyncResult {
    /// Check if anything was applied.
    pub fn has_changes(&self) -> bool {
        !self.applied.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        if self.applied.is_empty() {
            return "No changes applied".to_string();
        }
        let target = match self.direction {
            SyncDirection::Pull => "entities",
            SyncDirection::Push => "database",
        };
        format!(
            "{} actions applied to {} in {}ms",
            self.applied.len(),
            target,
            self.duration_ms
        )
    }
}

/// Push the model onto the database: the `undo` side of every pair in push
/// order (relations, then fields, then entities), DDL only.
#[instrument(skip_all, fields(changes = diff.length))]
pub async fn entities_to_database<H: ActionHandler + ?Sized>(
    history: &mut History,
    handler: &mut H,
    diff: &Diff,
) -> MigrateResult<SyncResult> {
    let start = Instant::now();
    let applied = history
        .revert(&diff.push_order(), handler, ApplyOptions::database_only())
        .await?;
    info!(applied = applied.len(), "Pushed entities to the database");
    Ok(SyncResult {
        direction: SyncDirection::Push,
        applied,
        duration_ms: start.elapsed().as_millis() as i64,
    })
}

/// Pull the database into the model: the `redo` side of every pair
/// (entities, then fields, then relations), no DDL.
#[instrument(skip_all, fields(changes = diff.length))]
pub async fn database_to_entities<H: ActionHandler + ?Sized>(
    history: &mut History,
    handler: &mut H,
    diff: &Diff,
) -> MigrateResult<SyncResult> {
    let start = Instant::now();
    let applied = history
        .apply(&diff.to_pairs(), handler, ApplyOptions::model_only())
        .await?;
    info!(applied = applied.len(), "Pulled database into the entities");
    Ok(SyncResult {
        direction: SyncDirection::Pull,
        applied,
        duration_ms: start.elapsed().as_millis() as i64,
    })
}

/// Renames implied by comparing the previous identity map with the
/// registry. Ids that disappeared are not renames.
pub fn detect_renames(previous: &IdentityMap, registry: &EntityRegistry) -> Vec<Action> {
    previous
        .iter()
        .filter_map(|(id, old)| {
            let current = registry.name_of(id)?;
            (current != old).then(|| Action::RenameEntity {
                table: old.clone(),
                value: current.to_string(),
            })
        })
        .collect()
}

/// Rename the tables behind `renames`. The model already carries the new
/// names, so only DDL is issued. Chains run target-first and swaps go
/// through a temporary table name.
pub async fn apply_renames<H: ActionHandler + ?Sized>(
    handler: &mut H,
    renames: &[Action],
) -> MigrateResult<()> {
    for rename in renames {
        info!(action = %rename, "Detected entity rename");
    }
    for rename in ordered_renames(renames) {
        handler.handle(&rename, ApplyOptions::database_only()).await?;
    }
    Ok(())
}

/// `RenameEntity` actions from `renames`, ordered so that no table is
/// renamed onto a name that another pending rename still has to vacate.
/// A cycle is broken by moving one table to a temporary name first.
fn ordered_renames(renames: &[Action]) -> Vec<Action> {
    let mut pending: Vec<(String, String)> = renames
        .iter()
        .filter_map(|rename| match rename {
            Action::RenameEntity { table, value } => Some((table.clone(), value.clone())),
            _ => None,
        })
        .collect();

    let mut ordered = Vec::with_capacity(pending.len());
    let mut temporaries = 0;
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|(_, to)| !pending.iter().any(|(from, _)| from == to));
        let (from, to) = match ready {
            Some(index) => pending.remove(index),
            None => {
                let temporary = format!("__strata_rename_{temporaries}");
                temporaries += 1;
                let from = std::mem::replace(&mut pending[0].0, temporary.clone());
                (from, temporary)
            }
        };
        ordered.push(Action::RenameEntity {
            table: from,
            value: to,
        });
    }
    ordered
}
