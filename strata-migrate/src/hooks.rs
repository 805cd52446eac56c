//! Collaborators living outside the schema core.
//!
//! Endpoint binding and query execution belong to the host application. The
//! core only notifies it of entity lifecycle changes and forwards query runs.

use serde_json::Value;
use strata_schema::{Entity, Query};

use crate::error::MigrateResult;

/// Notified after entity lifecycle changes, e.g. to rebind HTTP endpoints.
#[async_trait::async_trait]
pub trait EntityHooks: Send + Sync {
    /// `from` is now called `to`.
    async fn on_entity_renamed(&self, from: &str, to: &str) -> MigrateResult<()> {
        let _ = (from, to);
        Ok(())
    }

    /// `name` was removed.
    async fn on_entity_removed(&self, name: &str) -> MigrateResult<()> {
        let _ = name;
        Ok(())
    }
}

/// Runs entity queries against the live database.
#[async_trait::async_trait]
pub trait QueryRunner: Send + Sync {
    /// Run `query` of `entity` with request parameters.
    async fn run(&self, entity: &Entity, query: &Query, params: Value) -> MigrateResult<Value>;
}
