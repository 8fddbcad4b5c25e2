//! Persistent configuration document (spec.md §3 "Config", §4.1).
//!
//! Grounded on the teacher's "no module-level mutable state" pattern
//! (Design Notes §9): `ConfigStore` is constructed once at process start and
//! handed to collaborators as an `Arc`, not reached through a global. It is
//! the sole writer of the on-disk document; every mutation is atomic
//! (serialize to a temp file, `fsync`, rename over the target) and, when a
//! `config_sync_bucket_id` is configured, triggers a best-effort silent
//! remote mirror.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DbManagerError, Result};
use crate::model::{Database, GlobalSettings, Schedule, StorageTarget};

/// Auth sub-document. Only `jwt_secret` is consumed by this crate; the rest
/// of the auth/user surface lives in the HTTP collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthSettings {
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// The config document persisted at `$DBMANAGER_DATA_DIR/config.json`
/// (spec.md §3 "Config", §6 "Persisted state layout").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDocument {
    #[serde(default)]
    pub databases: Vec<Database>,
    #[serde(default)]
    pub storage_targets: Vec<StorageTarget>,
    /// Legacy key, migrated into `storage_targets` on load (spec.md §4.1).
    #[serde(default, skip_serializing)]
    pub s3_buckets: Vec<StorageTarget>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub global_settings: GlobalSettings,
    #[serde(default)]
    pub config_sync_bucket_id: Option<i64>,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub users: Vec<Value>,
    #[serde(default)]
    pub notifications: Value,
}

/// Callback invoked after every successful mutation; wired by the process
/// owner to [`crate::config_sync::ConfigSync::sync_to_storage`]. Failures
/// inside the callback are swallowed here — config-sync errors are warnings,
/// not fatal to the mutator (spec.md §4.1).
pub type SyncHook = Box<dyn Fn(&ConfigDocument) + Send + Sync>;

/// Normalize the legacy `s3_bucket_id` into `storage_target_ids` the first
/// time a database record is written, per spec.md §9 open question 3. Once
/// `storage_target_ids` is populated it is authoritative and `s3_bucket_id`
/// is cleared so the two fields never drift apart on subsequent writes.
fn migrate_storage_target_ids(database: &mut Database) {
    if database.storage_target_ids.is_empty() {
        if let Some(id) = database.s3_bucket_id.take() {
            database.storage_target_ids = vec![id];
        }
    } else {
        database.s3_bucket_id = None;
    }
}

/// The single writer of the config document (spec.md §4.1).
pub struct ConfigStore {
    path: PathBuf,
    document: RwLock<ConfigDocument>,
    sync_hook: Option<SyncHook>,
}

impl ConfigStore {
    /// Load (or initialize) the document at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let mut document = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<ConfigDocument>(&raw)?
        } else {
            ConfigDocument::default()
        };

        // One-shot migration: legacy `s3_buckets` -> `storage_targets`.
        if document.storage_targets.is_empty() && !document.s3_buckets.is_empty() {
            document.storage_targets = std::mem::take(&mut document.s3_buckets);
        }

        Ok(Self {
            path,
            document: RwLock::new(document),
            sync_hook: None,
        })
    }

    pub fn with_sync_hook(mut self, hook: SyncHook) -> Self {
        self.sync_hook = Some(hook);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot the whole document.
    pub fn snapshot(&self) -> ConfigDocument {
        self.document.read().unwrap().clone()
    }

    /// Swap the in-memory document wholesale, used after a remote config
    /// download (spec.md Design Notes §9 "Config hot-reload").
    pub fn reload(&self, document: ConfigDocument) -> Result<()> {
        *self.document.write().unwrap() = document;
        Ok(())
    }

    fn next_id(ids: impl Iterator<Item = i64>) -> i64 {
        ids.max().map(|max| max + 1).unwrap_or(1)
    }

    /// Atomically persist the current in-memory document and fire the sync
    /// hook, per spec.md §4.1.
    fn persist(&self) -> Result<()> {
        let document = self.document.read().unwrap().clone();
        let serialized = serde_json::to_vec_pretty(&document)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            std::io::Write::write_all(&mut tmp, &serialized)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(hook) = &self.sync_hook {
            hook(&document);
        }

        Ok(())
    }

    // -- Databases -----------------------------------------------------

    pub fn get_database(&self, id: i64) -> Result<Database> {
        self.document
            .read()
            .unwrap()
            .databases
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| DbManagerError::NotFound(format!("database {id}")))
    }

    pub fn list_databases(&self) -> Vec<Database> {
        self.document.read().unwrap().databases.clone()
    }

    pub fn add_database(&self, mut database: Database) -> Result<Database> {
        migrate_storage_target_ids(&mut database);
        {
            let mut guard = self.document.write().unwrap();
            database.id = Self::next_id(guard.databases.iter().map(|d| d.id));
            guard.databases.push(database.clone());
        }
        self.persist()?;
        Ok(database)
    }

    pub fn update_database(&self, mut database: Database) -> Result<()> {
        migrate_storage_target_ids(&mut database);
        {
            let mut guard = self.document.write().unwrap();
            let slot = guard
                .databases
                .iter_mut()
                .find(|d| d.id == database.id)
                .ok_or_else(|| DbManagerError::NotFound(format!("database {}", database.id)))?;
            *slot = database;
        }
        self.persist()
    }

    pub fn remove_database(&self, id: i64) -> Result<()> {
        {
            let mut guard = self.document.write().unwrap();
            let before = guard.databases.len();
            guard.databases.retain(|d| d.id != id);
            if guard.databases.len() == before {
                return Err(DbManagerError::NotFound(format!("database {id}")));
            }
        }
        self.persist()
    }

    // -- Storage targets -------------------------------------------------

    pub fn list_storage_targets(&self) -> Vec<StorageTarget> {
        self.document.read().unwrap().storage_targets.clone()
    }

    pub fn get_storage_target(&self, id: i64) -> Result<StorageTarget> {
        self.document
            .read()
            .unwrap()
            .storage_targets
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| DbManagerError::NotFound(format!("storage target {id}")))
    }

    pub fn add_storage_target(&self, mut target: StorageTarget) -> Result<StorageTarget> {
        {
            let mut guard = self.document.write().unwrap();
            target.id = Self::next_id(guard.storage_targets.iter().map(|t| t.id));
            guard.storage_targets.push(target.clone());
        }
        self.persist()?;
        Ok(target)
    }

    pub fn update_storage_target(&self, target: StorageTarget) -> Result<()> {
        {
            let mut guard = self.document.write().unwrap();
            let slot = guard
                .storage_targets
                .iter_mut()
                .find(|t| t.id == target.id)
                .ok_or_else(|| DbManagerError::NotFound(format!("storage target {}", target.id)))?;
            *slot = target;
        }
        self.persist()
    }

    /// Delete a storage target; refuses with `InUse` when referenced by a
    /// database or by the config-sync pointer (spec.md §4.3).
    pub fn delete_storage_target(&self, id: i64) -> Result<()> {
        {
            let guard = self.document.read().unwrap();

            if guard.config_sync_bucket_id == Some(id) {
                return Err(DbManagerError::InUse(format!(
                    "storage target {id} is the config-sync target"
                )));
            }

            let referenced = guard
                .databases
                .iter()
                .any(|d| d.effective_storage_targets().contains(&id));
            if referenced {
                return Err(DbManagerError::InUse(format!(
                    "storage target {id} is referenced by a database"
                )));
            }
        }

        {
            let mut guard = self.document.write().unwrap();
            let before = guard.storage_targets.len();
            guard.storage_targets.retain(|t| t.id != id);
            if guard.storage_targets.len() == before {
                return Err(DbManagerError::NotFound(format!("storage target {id}")));
            }
        }

        self.persist()
    }

    // -- Schedules ---------------------------------------------------------

    pub fn list_schedules(&self) -> Vec<Schedule> {
        self.document.read().unwrap().schedules.clone()
    }

    pub fn upsert_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        {
            let mut guard = self.document.write().unwrap();
            match guard.schedules.iter_mut().find(|s| s.database_id == schedule.database_id) {
                Some(slot) => *slot = schedule.clone(),
                None => guard.schedules.push(schedule.clone()),
            }
        }
        self.persist()?;
        Ok(schedule)
    }

    // -- Global settings -----------------------------------------------------

    pub fn global_settings(&self) -> GlobalSettings {
        self.document.read().unwrap().global_settings.clone()
    }

    pub fn update_global_settings(&self, settings: GlobalSettings) -> Result<()> {
        self.document.write().unwrap().global_settings = settings;
        self.persist()
    }

    pub fn config_sync_bucket_id(&self) -> Option<i64> {
        self.document.read().unwrap().config_sync_bucket_id
    }

    pub fn set_config_sync_bucket_id(&self, id: Option<i64>) -> Result<()> {
        self.document.write().unwrap().config_sync_bucket_id = id;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DbProvider, StorageProviderKind};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn db(name: &str) -> Database {
        Database {
            id: 0,
            name: name.to_string(),
            provider: DbProvider::Postgres,
            params: HashMap::new(),
            retention: 2,
            storage_target_ids: Vec::new(),
            s3_bucket_id: None,
            s3_retention: 0,
        }
    }

    fn target(name: &str) -> StorageTarget {
        StorageTarget {
            id: 0,
            name: name.to_string(),
            provider: StorageProviderKind::Minio,
            bucket: Some("backups".to_string()),
            access_key: None,
            secret_key: None,
            endpoint_url: None,
            region: None,
            server: None,
            share_name: None,
            smb_username: None,
            smb_password: None,
            domain: None,
            remote_path: None,
        }
    }

    #[test]
    fn ids_assigned_sequentially() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();

        let first = store.add_database(db("acct")).unwrap();
        let second = store.add_database(db("billing")).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[test]
    fn delete_storage_target_refuses_when_in_use() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();

        let saved_target = store.add_storage_target(target("primary")).unwrap();
        let mut saved_db = db("acct");
        saved_db.storage_target_ids = vec![saved_target.id];
        store.add_database(saved_db).unwrap();

        let err = store.delete_storage_target(saved_target.id).unwrap_err();
        assert!(matches!(err, DbManagerError::InUse(_)));
    }

    #[test]
    fn persisted_document_reloads_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        {
            let store = ConfigStore::load(&path).unwrap();
            store.add_database(db("acct")).unwrap();
        }

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.list_databases().len(), 1);
    }

    #[test]
    fn legacy_s3_bucket_id_migrates_to_storage_target_ids_on_write() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();

        let mut legacy_db = db("acct");
        legacy_db.s3_bucket_id = Some(42);
        let saved = store.add_database(legacy_db).unwrap();

        assert_eq!(saved.storage_target_ids, vec![42]);
        assert_eq!(saved.s3_bucket_id, None);

        let reloaded = store.get_database(saved.id).unwrap();
        assert_eq!(reloaded.storage_target_ids, vec![42]);
    }

    #[test]
    fn legacy_s3_buckets_key_migrates_to_storage_targets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let legacy = serde_json::json!({
            "s3_buckets": [{
                "id": 1,
                "name": "legacy",
                "provider": "s3",
                "bucket": "old-bucket"
            }]
        });
        std::fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        let targets = store.list_storage_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "legacy");
    }
}
