//! Storage target abstraction: S3-compatible and SMB backends.
//!
//! Grounded on the teacher's `storage/mod.rs` trait shape, narrowed to the
//! capability set spec.md §4.2 actually needs: `upload`, `download`,
//! `delete`, `list`, `getInfo`, `testConnection`. Metadata is always a
//! `String -> String` map so callers never branch on provider kind
//! (spec.md Design Notes §9).

pub mod manager;
pub mod s3;
pub mod smb;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::model::StorageTarget;

/// Reserved metadata key marking an object as a deduplication pointer.
pub const DEDUP_REF_KEY: &str = "dedup_ref";

/// Literal body written for a deduplication pointer object (spec.md §3).
pub const DEDUP_POINTER_BODY: &str = "DEDUP_POINTER";

/// Metadata and size information about a remote object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// A single entry returned by [`StorageBackend::list`].
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Polymorphic storage backend capability set (spec.md §4.2).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload `local` to `key`, attaching `metadata`. If `dedup_ref` is set,
    /// the backend writes a pointer/reference instead of the object body
    /// (spec.md §4.2.1/§4.2.2 — S3 writes a literal pointer object, SMB
    /// performs a server-side copy).
    async fn upload(
        &self,
        local: &Path,
        key: &str,
        metadata: HashMap<String, String>,
        dedup_ref: Option<&str>,
    ) -> StorageResult<()>;

    /// Download `key` to `local`, following a dedup pointer if present.
    async fn download(&self, key: &str, local: &Path) -> StorageResult<()>;

    /// Delete `key`. Idempotent: deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects under `prefix`, optionally capped at `max_keys`. Order
    /// is unspecified; callers sort.
    async fn list(&self, prefix: &str, max_keys: Option<usize>) -> StorageResult<Vec<ListedObject>>;

    /// Fetch size/mtime/metadata for `key`, or `None` if absent.
    async fn get_info(&self, key: &str) -> StorageResult<Option<ObjectInfo>>;

    /// `HEAD bucket` + `LIST max=1` (S3) or share-mount probe (SMB).
    async fn test_connection(&self) -> StorageResult<()>;
}

/// Construct a [`StorageBackend`] for a configured [`StorageTarget`].
pub async fn build_backend(target: &StorageTarget) -> StorageResult<Box<dyn StorageBackend>> {
    if target.provider.is_s3_compatible() {
        Ok(Box::new(s3::S3Backend::new(target).await?))
    } else {
        Ok(Box::new(smb::SmbBackend::new(target)?))
    }
}
