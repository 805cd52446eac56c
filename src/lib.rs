//! # Strata
//!
//! Metadata-driven backend core for low-code application builders.
//!
//! Strata provides:
//! - An entity model of fields, relations and default CRUD queries
//! - Every change recorded as a reversible action with undo/redo
//! - Structural diffing of the model against the live database schema
//! - Replay of that diff in either direction, with rename detection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StrataConfig::from_file("strata.toml")?;
//!     let driver = Arc::new(MemoryDriver::new());
//!     let mut project = Project::from_config(config, driver);
//!     project.load().await?;
//!
//!     project
//!         .add(
//!             "user",
//!             EntityDefinition::new()
//!                 .field("id:number,primary,unique,autoIncrement,required".parse()?),
//!         )
//!         .await?;
//!
//!     let diff = project.diff().await?;
//!     assert!(diff.is_empty());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Entity model, validation and configuration.
pub mod schema {
    pub use strata_schema::*;
}

/// Actions, history, diffing and synchronization.
pub mod migrate {
    pub use strata_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Action, ActionPair, ApplyOptions, Diff, MemoryDriver, MigrateResult, MigrationError,
        Project, SchemaDriver,
    };
    pub use crate::schema::{
        EntityDefinition, Field, FieldType, Query, RelationDefinition, StrataConfig,
    };
}

// Re-export key types at the crate root
pub use strata_migrate::{MigrationError, Project};
pub use strata_schema::{SchemaError, StrataConfig};
