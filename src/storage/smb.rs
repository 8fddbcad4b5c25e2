//! SMB/CIFS share storage backend, driven through `libsmbclient` via `pavao`.
//!
//! SMB shares have no notion of object metadata or content-addressed
//! pointers, so both are faked with a `<key>.metadata.json` sidecar written
//! next to each object (spec.md §4.2.2 Design Notes §9). Deduplication is
//! achieved by copying bytes through the client rather than S3's pointer
//! object, since a share has no equivalent of a zero-byte reference.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use pavao::{SmbClient, SmbCredentials, SmbDirentType, SmbOpenOptions, SmbOptions};
use serde::{Deserialize, Serialize};

use super::{ListedObject, ObjectInfo, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::model::StorageTarget;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SmbSidecar {
    metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_ref: Option<String>,
}

/// Identifies a distinct SMB session. Two targets with the same server,
/// share and credentials share a single underlying `SmbClient` rather than
/// logging in again (spec.md §4.2.2: "one session per (server, user,
/// domain)... reuses it across calls"). Share is part of the key too,
/// since each `SmbClient` is constructed against one share mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    server: String,
    share: String,
    username: Option<String>,
    domain: Option<String>,
}

fn session_registry() -> &'static Mutex<HashMap<SessionKey, Arc<Mutex<SmbClient>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<SessionKey, Arc<Mutex<SmbClient>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// SMB/CIFS storage backend, addressing objects under a share-relative root.
pub struct SmbBackend {
    client: Arc<Mutex<SmbClient>>,
    root: String,
}

impl SmbBackend {
    pub fn new(target: &StorageTarget) -> StorageResult<Self> {
        let server = target
            .server
            .clone()
            .ok_or_else(|| StorageError::Other("missing server for SMB target".to_string()))?;
        let share = target
            .share_name
            .clone()
            .ok_or_else(|| StorageError::Other("missing share_name for SMB target".to_string()))?;

        let key = SessionKey {
            server: server.clone(),
            share: share.clone(),
            username: target.smb_username.clone(),
            domain: target.domain.clone(),
        };

        let mut registry = session_registry().lock().unwrap();
        let client = if let Some(existing) = registry.get(&key) {
            existing.clone()
        } else {
            let mut credentials = SmbCredentials::default()
                .server(format!("smb://{server}"))
                .share(format!("/{share}"));

            if let Some(username) = &target.smb_username {
                credentials = credentials.username(username);
            }
            if let Some(password) = &target.smb_password {
                credentials = credentials.password(password);
            }
            if let Some(domain) = &target.domain {
                credentials = credentials.workgroup(domain);
            }

            let built = SmbClient::new(credentials, SmbOptions::default())
                .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
            let built = Arc::new(Mutex::new(built));
            registry.insert(key, built.clone());
            built
        };
        drop(registry);

        let root = target.remote_path.clone().unwrap_or_default();

        Ok(Self { client, root })
    }

    fn remote_path(&self, key: &str) -> String {
        if self.root.is_empty() {
            format!("/{key}")
        } else {
            format!("/{}/{key}", self.root.trim_matches('/'))
        }
    }

    fn sidecar_path(&self, key: &str) -> String {
        format!("{}.metadata.json", self.remote_path(key))
    }

    /// `/a/b/c` -> `Some("/a/b")`; `/c` -> `None`.
    fn parent_dir(path: &str) -> Option<String> {
        let trimmed = path.trim_start_matches('/');
        let idx = trimmed.rfind('/')?;
        Some(format!("/{}", &trimmed[..idx]))
    }

    /// Create every missing intermediate directory above `path`, since a
    /// share does not create them implicitly on write (spec.md §4.2.2).
    fn ensure_parent_dir(&self, path: &str) -> StorageResult<()> {
        let Some(parent) = Self::parent_dir(path) else {
            return Ok(());
        };

        let client = self.client.lock().unwrap();
        let mut built = String::new();
        for segment in parent.trim_matches('/').split('/') {
            if segment.is_empty() {
                continue;
            }
            built.push('/');
            built.push_str(segment);
            if let Err(e) = client.mkdir(&built) {
                if !e.to_string().to_lowercase().contains("exist") {
                    return Err(StorageError::UploadFailed(e.to_string()));
                }
            }
        }

        Ok(())
    }

    fn read_file(&self, path: &str) -> StorageResult<Vec<u8>> {
        let client = self.client.lock().unwrap();
        let mut file = client
            .open_with(path, SmbOpenOptions::default().read(true))
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(buf)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.ensure_parent_dir(path)?;

        let client = self.client.lock().unwrap();
        let mut file = client
            .open_with(path, SmbOpenOptions::default().create(true).write(true).truncate(true))
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        file.write_all(data)
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(())
    }

    fn read_sidecar(&self, key: &str) -> StorageResult<Option<SmbSidecar>> {
        match self.read_file(&self.sidecar_path(key)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Other(e.to_string())),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl StorageBackend for SmbBackend {
    async fn upload(
        &self,
        local: &Path,
        key: &str,
        metadata: HashMap<String, String>,
        dedup_ref: Option<&str>,
    ) -> StorageResult<()> {
        let path = self.remote_path(key);

        if let Some(target_key) = dedup_ref {
            // No server-side copy primitive over SMB; fetch the referenced
            // object's bytes through the client and write them under the
            // new key so both names resolve to on-disk content.
            let data = self.read_file(&self.remote_path(target_key))?;
            self.write_file(&path, &data)?;
        } else {
            let data = tokio::fs::read(local)
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            self.write_file(&path, &data)?;
        }

        let sidecar = SmbSidecar {
            metadata,
            dedup_ref: dedup_ref.map(|s| s.to_string()),
        };
        let encoded = serde_json::to_vec(&sidecar).map_err(|e| StorageError::Other(e.to_string()))?;
        self.write_file(&self.sidecar_path(key), &encoded)?;

        Ok(())
    }

    async fn download(&self, key: &str, local: &Path) -> StorageResult<()> {
        let data = self.read_file(&self.remote_path(key))?;
        tokio::fs::write(local, &data)
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let client = self.client.lock().unwrap();
        let _ = client.unlink(&self.remote_path(key));
        let _ = client.unlink(&self.sidecar_path(key));
        Ok(())
    }

    async fn list(&self, prefix: &str, max_keys: Option<usize>) -> StorageResult<Vec<ListedObject>> {
        let dir_path = self.remote_path(prefix);
        let client = self.client.lock().unwrap();
        let entries = client
            .list_dir(&dir_path)
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut objects = Vec::new();
        for entry in entries {
            if entry.get_type() != SmbDirentType::File {
                continue;
            }
            let name = entry.name().to_string();
            if name.ends_with(".metadata.json") {
                continue;
            }
            objects.push(ListedObject {
                key: format!("{}/{}", prefix.trim_end_matches('/'), name),
                last_modified: Utc::now(),
            });
            if let Some(max_keys) = max_keys {
                if objects.len() >= max_keys {
                    break;
                }
            }
        }

        Ok(objects)
    }

    async fn get_info(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let path = self.remote_path(key);
        let stat = {
            let client = self.client.lock().unwrap();
            client.stat(&path)
        };

        let stat = match stat {
            Ok(stat) => stat,
            Err(_) => return Ok(None),
        };

        let sidecar = self.read_sidecar(key)?.unwrap_or_default();

        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: stat.size as u64,
            last_modified: Utc::now(),
            metadata: sidecar.metadata,
        }))
    }

    async fn test_connection(&self) -> StorageResult<()> {
        let root = if self.root.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.root.trim_matches('/'))
        };
        let client = self.client.lock().unwrap();
        client
            .list_dir(&root)
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}
