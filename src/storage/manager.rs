//! Storage target CRUD and backend factory (spec.md §4.3).
//!
//! Thin orchestration over [`crate::config::ConfigStore`] (the sole writer
//! of `storage_targets`) plus the one operation that isn't pure config
//! mutation: constructing a live backend and probing it.

use std::sync::Arc;

use crate::config::ConfigStore;
use crate::error::Result;
use crate::model::StorageTarget;

use super::build_backend;

/// CRUD over configured storage targets, and the entry point for
/// constructing/validating a live backend for one of them.
pub struct StorageManager {
    config: Arc<ConfigStore>,
}

impl StorageManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    pub fn list(&self) -> Vec<StorageTarget> {
        self.config.list_storage_targets()
    }

    pub fn get(&self, id: i64) -> Result<StorageTarget> {
        self.config.get_storage_target(id)
    }

    pub fn add(&self, target: StorageTarget) -> Result<StorageTarget> {
        self.config.add_storage_target(target)
    }

    pub fn update(&self, target: StorageTarget) -> Result<()> {
        self.config.update_storage_target(target)
    }

    /// Refuses with `InUse` when `id` is referenced by a database or the
    /// config-sync pointer (enforced by [`ConfigStore::delete_storage_target`]).
    pub fn delete(&self, id: i64) -> Result<()> {
        self.config.delete_storage_target(id)
    }

    /// Construct the backend for a configured target (spec.md §4.2 factory).
    pub async fn backend_for(&self, id: i64) -> Result<Box<dyn super::StorageBackend>> {
        let target = self.config.get_storage_target(id)?;
        Ok(build_backend(&target).await?)
    }

    /// `testStorage(id)`: construct + `testConnection` (spec.md §4.3).
    pub async fn test_storage(&self, id: i64) -> Result<()> {
        let backend = self.backend_for(id).await?;
        backend.test_connection().await?;
        Ok(())
    }
}
