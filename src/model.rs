//! Core data model: databases, storage targets, schedules and tasks.
//!
//! These types mirror the persisted config document (see [`crate::config`])
//! and are shared between the pipeline, storage and scheduler modules.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A database engine driven through its native dump/restore tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbProvider {
    Postgres,
    Mysql,
    Mariadb,
    Sqlserver,
    Mongodb,
}

/// A configured database, the unit of work for backup and restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: i64,
    pub name: String,
    pub provider: DbProvider,
    /// Provider-specific connection parameters (host, port, credentials, ...).
    pub params: HashMap<String, Value>,
    pub retention: i64,
    #[serde(default)]
    pub storage_target_ids: Vec<i64>,
    /// Legacy single-target pointer, kept for migration (spec.md §9 open question).
    #[serde(default)]
    pub s3_bucket_id: Option<i64>,
    #[serde(default)]
    pub s3_retention: i64,
}

impl Database {
    /// Authoritative list of storage targets: `storage_target_ids` if set,
    /// falling back to the legacy single `s3_bucket_id`.
    pub fn effective_storage_targets(&self) -> Vec<i64> {
        if !self.storage_target_ids.is_empty() {
            self.storage_target_ids.clone()
        } else if let Some(id) = self.s3_bucket_id {
            vec![id]
        } else {
            Vec::new()
        }
    }

    pub fn host(&self) -> Option<String> {
        self.params.get("host").and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    pub fn port(&self) -> Option<u16> {
        self.params.get("port").and_then(|v| v.as_u64()).map(|p| p as u16)
    }

    pub fn param_str(&self, key: &str) -> Option<String> {
        self.params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
    }
}

/// Storage target provider kind. `Minio`/`Garage`/`Aws`/`Cloudflare`/`Other`
/// are all S3-compatible and share a single code path; they exist only so
/// that UIs/configs can label the endpoint meaningfully.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageProviderKind {
    S3,
    Minio,
    Garage,
    Aws,
    Cloudflare,
    Other,
    Smb,
}

impl StorageProviderKind {
    /// Whether this kind is driven by the S3-compatible code path.
    pub fn is_s3_compatible(self) -> bool {
        !matches!(self, StorageProviderKind::Smb)
    }
}

/// A configured storage target (S3-compatible bucket or SMB share).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTarget {
    pub id: i64,
    pub name: String,
    pub provider: StorageProviderKind,

    // S3-compatible fields.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,

    // SMB fields.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub share_name: Option<String>,
    #[serde(default)]
    pub smb_username: Option<String>,
    #[serde(default)]
    pub smb_password: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub remote_path: Option<String>,
}

/// A cron-driven backup schedule for a single database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub database_id: i64,
    pub cron_expression: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

/// Compression settings shared by all backups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub algorithm: crate::compression::CompressionAlgorithm,
    pub level: i32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: crate::compression::CompressionAlgorithm::Gzip,
            level: 6,
        }
    }
}

/// Encryption settings shared by all backups.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionSettings {
    pub enabled: bool,
    pub password: Option<String>,
}

/// Global settings stored in the config document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalSettings {
    pub compression: CompressionSettings,
    pub encryption: EncryptionSettings,
}

/// Status of a long running [`Task`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// An externally observable handle for a long-running backup/restore
/// operation, uniquely identified by a UUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub description: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}
