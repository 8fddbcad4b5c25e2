//! Remote mirroring of the config document (spec.md §4.8).
//!
//! Mirrors `config.json` to a single nominated [`StorageTarget`] under
//! `config/config.json`, alongside a `config/metadata.json` carrying
//! `{sync_time, hostname, version}`. This module only moves bytes; the
//! policy of *when* to call it (every [`crate::config::ConfigStore`]
//! mutation, or at startup) lives with the process owner.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DbManagerError, Result};
use crate::storage::StorageBackend;

const REMOTE_CONFIG_KEY: &str = "config/config.json";
const REMOTE_METADATA_KEY: &str = "config/metadata.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SyncMetadata {
    sync_time: DateTime<Utc>,
    hostname: String,
    version: String,
}

/// Mirrors a config document against a single storage target.
pub struct ConfigSync<'a> {
    storage: &'a dyn StorageBackend,
}

impl<'a> ConfigSync<'a> {
    pub fn new(storage: &'a dyn StorageBackend) -> Self {
        Self { storage }
    }

    /// Upload the local document to the remote mirror. `silent` controls
    /// whether the caller wants failures surfaced: config-sync failures are
    /// always warnings to the mutator (spec.md §4.1), but direct callers of
    /// this method may still want the `Result`.
    pub async fn sync_to_storage(&self, config_path: &Path, silent: bool) -> Result<()> {
        let result = self.upload(config_path).await;
        if let Err(e) = &result {
            if silent {
                tracing::warn!("config-sync upload failed: {e}");
                return Ok(());
            }
        }
        result
    }

    async fn upload(&self, config_path: &Path) -> Result<()> {
        self.storage
            .upload(config_path, REMOTE_CONFIG_KEY, Default::default(), None)
            .await?;

        let metadata = SyncMetadata {
            sync_time: Utc::now(),
            hostname: hostname(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let tmp = tempfile::NamedTempFile::new()?;
        std::fs::write(tmp.path(), serde_json::to_vec(&metadata)?)?;
        self.storage
            .upload(tmp.path(), REMOTE_METADATA_KEY, Default::default(), None)
            .await?;

        Ok(())
    }

    /// Compare local mtime against the remote object's `last_modified`; if
    /// remote is newer (or local is missing), download it over `config_path`.
    pub async fn sync_on_startup(&self, config_path: &Path) -> Result<bool> {
        let remote_info = self.storage.get_info(REMOTE_CONFIG_KEY).await?;
        let Some(remote_info) = remote_info else {
            return Ok(false);
        };

        let local_is_missing = !config_path.exists();
        let local_is_stale = !local_is_missing
            && local_mtime(config_path)? < remote_info.last_modified;

        if local_is_missing || local_is_stale {
            self.storage.download(REMOTE_CONFIG_KEY, config_path).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Explicit pull. Refuses (non-interactive) or consults `confirm`
    /// (interactive) when the local document is newer than the remote one.
    /// Before overwriting, the local file is copied to
    /// `<config>.backup.<YYYYMMDD_HHMMSS>`.
    pub async fn sync_from_storage(
        &self,
        config_path: &Path,
        force: bool,
        confirm: Option<&dyn Fn() -> bool>,
    ) -> Result<()> {
        let remote_info = self
            .storage
            .get_info(REMOTE_CONFIG_KEY)
            .await?
            .ok_or_else(|| DbManagerError::NotFound("remote config object".to_string()))?;

        if config_path.exists() && !force {
            let local_mtime = local_mtime(config_path)?;
            if local_mtime > remote_info.last_modified {
                let proceed = confirm.map(|f| f()).unwrap_or(false);
                if !proceed {
                    return Err(DbManagerError::Validation(
                        "local config is newer than remote; refusing to overwrite".to_string(),
                    ));
                }
            }
        }

        if config_path.exists() {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let backup_path = config_path.with_extension(format!("json.backup.{timestamp}"));
            std::fs::copy(config_path, backup_path)?;
        }

        self.storage.download(REMOTE_CONFIG_KEY, config_path).await?;
        Ok(())
    }
}

fn local_mtime(path: &Path) -> Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
