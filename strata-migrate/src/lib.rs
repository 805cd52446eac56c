//! # strata-migrate
//!
//! Schema synchronization engine for the Strata low-code backend.
//!
//! This crate provides functionality for:
//! - An in-memory entity registry keyed by stable entity ids
//! - Reversible migration actions and a linear undo/redo history
//! - Executing actions against the model, the entity files and the database
//! - Diffing the entity model against the live database schema
//! - Replaying that diff in either direction
//! - Rename detection across restarts through a persisted identity map
//!
//! ## Architecture
//!
//! Every mutation is an [`Action`] executed by the [`Workspace`], which
//! returns the `{redo, undo}` pairs it produced. The [`Project`] records them
//! in the [`History`]. The [`Synchronizer`] compares the registry with the
//! schema reported by a [`SchemaDriver`] and expresses every difference as
//! the same kind of pairs, so pulling and pushing are history replays.
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ Project ops  │────▶│ Workspace      │────▶│ SchemaDriver │
//! └──────────────┘     └────────────────┘     └──────────────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ History      │     │ EntityStore    │     │ Synchronizer │
//! └──────────────┘     └────────────────┘     └──────────────┘
//!        ▲                                           │
//!        └──────────────── Diff replay ◀─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{MemoryDriver, Project};
//! use strata_schema::{EntityDefinition, RelationDefinition, StrataConfig};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StrataConfig::from_file("strata.toml")?;
//!     let mut project = Project::from_config(config, Arc::new(MemoryDriver::new()));
//!     let report = project.load().await?;
//!     println!("Loaded {} entities", report.entities);
//!
//!     project
//!         .add(
//!             "post",
//!             EntityDefinition::new()
//!                 .field("id:number,primary,unique,autoIncrement,required".parse()?)
//!                 .relation(RelationDefinition::belongs_to("user")),
//!         )
//!         .await?;
//!     project.undo().await?;
//!
//!     let diff = project.diff().await?;
//!     println!("Drift: {}", diff.summary());
//!     project.entities_to_database(&diff).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Entity Files
//!
//! ```text
//! app/
//! ├── entities/
//! │   ├── user.json
//! │   └── post.json
//! └── entities.ids.json       # id → name, used for rename detection
//! ```

pub mod action;
pub mod diff;
pub mod error;
pub mod executor;
pub mod history;
pub mod hooks;
pub mod introspect;
pub mod memory;
pub mod project;
pub mod registry;
pub mod store;
pub mod workspace;

// Re-exports
pub use action::{Action, ActionPair, ApplyOptions};
pub use diff::{Diff, Synchronizer};
pub use error::{MigrateResult, MigrationError};
pub use executor::{
    SyncDirection, SyncResult, apply_renames, database_to_entities, detect_renames,
    entities_to_database,
};
pub use history::{ActionHandler, History, HistoryEntry};
pub use hooks::{EntityHooks, QueryRunner};
pub use introspect::{
    Column, Constraint, ForeignKey, SchemaDriver, SchemaSnapshot, column_to_field, flatten_field,
};
pub use memory::MemoryDriver;
pub use project::{LoadReport, Project};
pub use registry::EntityRegistry;
pub use store::{EntityStore, FsEntityStore, IdentityMap, MemoryStore};
pub use workspace::Workspace;
