//! Configuration snapshot stores

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::application::errors::StorageError;
use crate::domain::traits::ConfigStore;
use crate::infrastructure::config::Snapshot;

/// YAML file-based store. Reads and writes the file as it is; environment
/// and command-line overrides are applied by the host, not here.
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for YamlConfigStore {
    async fn load(&self) -> Result<Snapshot, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(self.path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = Snapshot::from_yaml_str(&content).map_err(|e| StorageError::Serialization(e.to_string()))?;
        debug!(path = %self.path.display(), plugins = snapshot.plugins.len(), "Loaded config");
        Ok(snapshot)
    }

    /// Write to a sibling temp file, then rename over the target
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let yaml = snapshot
            .to_yaml_string()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Saved config");
        Ok(())
    }
}

/// Store that keeps the snapshot in memory
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    snapshot: Arc<RwLock<Snapshot>>,
}

impl MemoryConfigStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Replace the stored snapshot, as an external editor would
    pub async fn set(&self, snapshot: Snapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Snapshot, StorageError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        *self.snapshot.write().await = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{PlatformKind, PluginEntry};
    use serde_json::json;

    #[tokio::test]
    async fn test_yaml_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlConfigStore::new(dir.path().join("nested").join("config.yaml"));

        let snapshot = Snapshot::template().with_plugin("extra", PluginEntry::enabled(json!({"k": [1, 2]})));
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_file_without_token_loads_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "bot:\n  name: tg\n  prefix: /\n  platform: telegram\n").unwrap();

        let snapshot = YamlConfigStore::new(&path).load().await.unwrap();
        assert_eq!(snapshot.bot.platform, PlatformKind::Telegram);
        assert!(snapshot.bot.token.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlConfigStore::new(dir.path().join("absent.yaml"));
        assert!(matches!(store.load().await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "plugins: [not, a, map]").unwrap();
        let store = YamlConfigStore::new(&path);
        assert!(matches!(store.load().await, Err(StorageError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryConfigStore::default();
        let snapshot = Snapshot::default().with_plugin("ping", PluginEntry::enabled(json!(null)));
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);
    }
}
