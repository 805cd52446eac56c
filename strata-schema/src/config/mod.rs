//! Configuration file parsing for `strata.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{SchemaError, SchemaResult};

/// Main configuration structure for `strata.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    /// Where entity definitions and the identity map live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Schema synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Undo/redo history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Debug/logging settings.
    #[serde(default)]
    pub debug: DebugConfig,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl StrataConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> SchemaResult<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SchemaError::TomlError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that parse but cannot work.
    pub fn validate(&self) -> SchemaResult<()> {
        if self.storage.entities_dir.trim().is_empty() {
            return Err(SchemaError::config("storage.entities_dir must not be empty"));
        }
        if self.storage.identity_file.trim().is_empty() {
            return Err(SchemaError::config("storage.identity_file must not be empty"));
        }
        if self.storage.entities_dir == self.storage.identity_file {
            return Err(SchemaError::config(
                "storage.identity_file must differ from storage.entities_dir",
            ));
        }
        if self.history.limit == Some(0) {
            return Err(SchemaError::config("history.limit must be at least 1"));
        }
        Ok(())
    }

    /// Apply environment-specific overrides.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(root) = overrides.storage_root {
                self.storage.root = root;
            }
            if let Some(on_load) = overrides.on_load {
                self.sync.on_load = on_load;
            }
            if let Some(log_actions) = overrides.log_actions {
                self.debug.log_actions = log_actions;
            }
        }
        self
    }

    /// Directory holding one definition file per entity.
    pub fn entities_path(&self) -> PathBuf {
        self.storage.root.join(&self.storage.entities_dir)
    }

    /// Path of the persisted id -> name map.
    pub fn identity_path(&self) -> PathBuf {
        self.storage.root.join(&self.storage.identity_file)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Application root directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Entity definition directory, relative to `root`.
    #[serde(default = "default_entities_dir")]
    pub entities_dir: String,

    /// Identity map file, relative to `root`.
    #[serde(default = "default_identity_file")]
    pub identity_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            entities_dir: default_entities_dir(),
            identity_file: default_identity_file(),
        }
    }
}

fn default_root() -> PathBuf { PathBuf::from(".") }
fn default_entities_dir() -> String { "entities".to_string() }
fn default_identity_file() -> String { "entities.ids.json".to_string() }
fn default_true() -> bool { true }

/// What to reconcile when a project is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOnLoad {
    /// Only detect renames.
    #[default]
    None,
    /// Pull the database schema into the entities.
    Pull,
    /// Push the entities onto the database.
    Push,
}

/// Schema synchronization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Compare the identity map on load and turn changed names into renames.
    #[serde(default = "default_true")]
    pub detect_renames: bool,

    /// Reconciliation to run after loading.
    #[serde(default)]
    pub on_load: SyncOnLoad,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            detect_renames: true,
            on_load: SyncOnLoad::None,
        }
    }
}

/// Undo/redo history configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Maximum number of undoable entries; unbounded when absent.
    pub limit: Option<usize>,
}

/// Debug/logging configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// Log every executed migration action at info level.
    #[serde(default)]
    pub log_actions: bool,
}

/// Environment-specific configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    /// Override the storage root.
    pub storage_root: Option<PathBuf>,

    /// Override the load-time reconciliation.
    pub on_load: Option<SyncOnLoad>,

    /// Override action logging.
    pub log_actions: Option<bool>,
}

/// Expand environment variables in the format `${VAR_NAME}`.
fn expand_env_vars(content: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return content.to_string();
    };

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let full_match = &cap[0];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StrataConfig::default();
        assert_eq!(config.storage.entities_dir, "entities");
        assert!(config.sync.detect_renames);
        assert_eq!(config.sync.on_load, SyncOnLoad::None);
        assert_eq!(config.history.limit, None);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [storage]
            root = "/srv/app"

            [sync]
            on_load = "pull"

            [history]
            limit = 50
        "#;

        let config = StrataConfig::from_str(toml).unwrap();
        assert_eq!(config.entities_path(), PathBuf::from("/srv/app/entities"));
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/srv/app/entities.ids.json")
        );
        assert_eq!(config.sync.on_load, SyncOnLoad::Pull);
        assert_eq!(config.history.limit, Some(50));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(StrataConfig::from_str("[sync]\nbogus = 1").is_err());
    }

    #[test]
    fn test_environment_override() {
        let toml = r#"
            [environments.test]
            storage_root = "/tmp/strata"
            on_load = "push"
        "#;

        let config = StrataConfig::from_str(toml).unwrap().with_environment("test");
        assert_eq!(config.storage.root, PathBuf::from("/tmp/strata"));
        assert_eq!(config.sync.on_load, SyncOnLoad::Push);
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: This test runs single-threaded and we clean up after
        unsafe {
            std::env::set_var("STRATA_TEST_ROOT", "/data");
        }
        let expanded = expand_env_vars("root = \"${STRATA_TEST_ROOT}\"");
        assert_eq!(expanded, "root = \"/data\"");
        unsafe {
            std::env::remove_var("STRATA_TEST_ROOT");
        }
    }
}
