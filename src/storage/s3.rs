//! S3-compatible storage backend (AWS, Minio, Garage, Cloudflare R2, ...).
//!
//! Grounded on the teacher's `storage/s3.rs`, narrowed to the operations
//! spec.md §4.2.1 requires and adapted to work from a local file path rather
//! than an in-memory `Bytes` buffer (artifacts can be large).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{ListedObject, ObjectInfo, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::model::StorageTarget;

/// S3-compatible storage backend. `endpoint_url` enables Minio/Garage/R2.
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub async fn new(target: &StorageTarget) -> StorageResult<Self> {
        let bucket = target
            .bucket
            .clone()
            .ok_or_else(|| StorageError::Other("missing bucket for S3 target".to_string()))?;
        let region = target.region.clone().unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = aws_config::from_env().region(Region::new(region));
        if let Some(endpoint) = &target.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&target.access_key, &target.secret_key) {
            builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key, secret_key, None, None, "dbmanager-static",
            ));
        }

        let config = builder.load().await;
        let client = Client::new(&config);

        Ok(Self { client, bucket })
    }

    fn map_err<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::Other(err.to_string())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn upload(
        &self,
        local: &Path,
        key: &str,
        metadata: HashMap<String, String>,
        dedup_ref: Option<&str>,
    ) -> StorageResult<()> {
        let mut request = self.client.put_object().bucket(&self.bucket).key(key);

        for (k, v) in &metadata {
            request = request.metadata(k, v);
        }

        let body = if let Some(target_key) = dedup_ref {
            request = request.metadata(super::DEDUP_REF_KEY, target_key);
            ByteStream::from(super::DEDUP_POINTER_BODY.as_bytes().to_vec())
        } else {
            ByteStream::from_path(local)
                .await
                .map_err(Self::map_err)?
        };

        request
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(())
    }

    async fn download(&self, key: &str, local: &Path) -> StorageResult<()> {
        let resolved_key = match self.get_info(key).await? {
            Some(info) => info
                .metadata
                .get(super::DEDUP_REF_KEY)
                .cloned()
                .unwrap_or_else(|| key.to_string()),
            None => return Err(StorageError::ObjectNotFound(key.to_string())),
        };

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&resolved_key)
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes();

        tokio::fs::write(local, &data)
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        // Idempotent: S3 DeleteObject already succeeds on a missing key.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn list(&self, prefix: &str, max_keys: Option<usize>) -> StorageResult<Vec<ListedObject>> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
        if let Some(max_keys) = max_keys {
            request = request.max_keys(max_keys as i32);
        }

        let output = request.send().await.map_err(Self::map_err)?;

        Ok(output
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ListedObject {
                    key: obj.key()?.to_string(),
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| {
                            chrono::DateTime::parse_from_rfc3339(&dt.to_string())
                                .ok()
                                .map(|dt| dt.with_timezone(&chrono::Utc))
                        })
                        .unwrap_or_else(chrono::Utc::now),
                })
            })
            .collect())
    }

    async fn get_info(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let result = self.client.head_object().bucket(&self.bucket).key(key).send().await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                if e.to_string().contains("NotFound") {
                    return Ok(None);
                }
                return Err(Self::map_err(e));
            }
        };

        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|dt| {
                    chrono::DateTime::parse_from_rfc3339(&dt.to_string())
                        .ok()
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                })
                .unwrap_or_else(chrono::Utc::now),
            metadata: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        }))
    }

    async fn test_connection(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(())
    }
}
