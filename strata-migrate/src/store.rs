//! Entity definition persistence.
//!
//! Entities are stored one definition per name, plus a single identity map
//! (`id -> name`) used to detect renames made while the application was
//! stopped.
//!
//! ```text
//! app/
//! ├── entities/
//! │   ├── post.json        { "id": "...", "fields": [...], "relations": [...], "queries": [...] }
//! │   └── user.json
//! └── entities.ids.json    { "<id>": "post", "<id>": "user" }
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use parking_lot::Mutex;
use strata_schema::{EntityDefinition, EntityId, StrataConfig};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};

/// Stable entity id to current entity name.
pub type IdentityMap = IndexMap<EntityId, String>;

/// Storage for entity definitions and the identity map.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Load every stored definition with its entity name.
    async fn load_all(&self) -> MigrateResult<Vec<(String, EntityDefinition)>>;

    /// Write the definition of `name`, replacing any previous one.
    async fn save(&self, name: &str, definition: &EntityDefinition) -> MigrateResult<()>;

    /// Remove the definition of `name`. Missing definitions are ignored.
    async fn delete(&self, name: &str) -> MigrateResult<()>;

    /// Move the definition of `from` to `to`.
    async fn rename(&self, from: &str, to: &str) -> MigrateResult<()>;

    /// Load the identity map; empty when none was saved yet.
    async fn load_identity(&self) -> MigrateResult<IdentityMap>;

    /// Replace the identity map.
    async fn save_identity(&self, identity: &IdentityMap) -> MigrateResult<()>;
}

/// Filesystem store: one pretty-printed JSON file per entity.
#[derive(Debug, Clone)]
pub struct FsEntityStore {
    entities_dir: PathBuf,
    identity_path: PathBuf,
}

impl FsEntityStore {
    /// Create a store for the given directories.
    pub fn new(entities_dir: impl Into<PathBuf>, identity_path: impl Into<PathBuf>) -> Self {
        Self {
            entities_dir: entities_dir.into(),
            identity_path: identity_path.into(),
        }
    }

    /// Create a store from the `[storage]` configuration section.
    pub fn from_config(config: &StrataConfig) -> Self {
        Self::new(config.entities_path(), config.identity_path())
    }

    /// Directory holding the entity files.
    pub fn entities_dir(&self) -> &Path {
        &self.entities_dir
    }

    /// Path of the definition file for `name`.
    pub fn entity_path(&self, name: &str) -> PathBuf {
        self.entities_dir.join(format!("{name}.json"))
    }

    async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.entities_dir)
            .await
            .map_err(MigrationError::Io)
    }
}

#[async_trait::async_trait]
impl EntityStore for FsEntityStore {
    async fn load_all(&self) -> MigrateResult<Vec<(String, EntityDefinition)>> {
        let mut entries = match tokio::fs::read_dir(&self.entities_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Entities directory does not exist: {:?}", self.entities_dir);
                return Ok(Vec::new());
            }
            Err(e) => return Err(MigrationError::Io(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        // Directory order is platform dependent.
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(MigrationError::Io)?;
            let definition: EntityDefinition = serde_json::from_str(&content)?;
            definitions.push((name.to_string(), definition));
        }

        debug!("Loaded {} entity definitions", definitions.len());
        Ok(definitions)
    }

    async fn save(&self, name: &str, definition: &EntityDefinition) -> MigrateResult<()> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(definition)?;
        tokio::fs::write(self.entity_path(name), content)
            .await
            .map_err(MigrationError::Io)
    }

    async fn delete(&self, name: &str) -> MigrateResult<()> {
        match tokio::fs::remove_file(self.entity_path(name)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(MigrationError::Io(e)),
            _ => Ok(()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> MigrateResult<()> {
        match tokio::fs::rename(self.entity_path(from), self.entity_path(to)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(MigrationError::Io(e)),
            _ => Ok(()),
        }
    }

    async fn load_identity(&self) -> MigrateResult<IdentityMap> {
        match tokio::fs::read_to_string(&self.identity_path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(IdentityMap::new()),
            Err(e) => Err(MigrationError::Io(e)),
        }
    }

    async fn save_identity(&self, identity: &IdentityMap) -> MigrateResult<()> {
        if let Some(parent) = self.identity_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(MigrationError::Io)?;
        }
        let content = serde_json::to_string_pretty(identity)?;
        tokio::fs::write(&self.identity_path, content)
            .await
            .map_err(MigrationError::Io)
    }
}

/// In-memory store, for tests and throwaway projects.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: Mutex<IndexMap<String, EntityDefinition>>,
    identity: Mutex<IdentityMap>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored definition of `name`.
    pub fn get(&self, name: &str) -> Option<EntityDefinition> {
        self.definitions.lock().get(name).cloned()
    }

    /// Names of the stored definitions.
    pub fn names(&self) -> Vec<String> {
        self.definitions.lock().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn load_all(&self) -> MigrateResult<Vec<(String, EntityDefinition)>> {
        Ok(self
            .definitions
            .lock()
            .iter()
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect())
    }

    async fn save(&self, name: &str, definition: &EntityDefinition) -> MigrateResult<()> {
        self.definitions
            .lock()
            .insert(name.to_string(), definition.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> MigrateResult<()> {
        self.definitions.lock().shift_remove(name);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> MigrateResult<()> {
        let mut definitions = self.definitions.lock();
        if let Some(definition) = definitions.shift_remove(from) {
            definitions.insert(to.to_string(), definition);
        }
        Ok(())
    }

    async fn load_identity(&self) -> MigrateResult<IdentityMap> {
        Ok(self.identity.lock().clone())
    }

    async fn save_identity(&self, identity: &IdentityMap) -> MigrateResult<()> {
        *self.identity.lock() = identity.clone();
        Ok(())
    }
}
