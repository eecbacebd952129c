use async_trait::async_trait;

use crate::application::errors::StorageError;
use crate::infrastructure::config::Snapshot;

/// Store trait - persistence of configuration snapshots
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Snapshot, StorageError>;

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError>;
}
