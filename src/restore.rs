//! Restore pipeline with safety-snapshot and rollback semantics (spec.md §4.5).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::backup::backup;
use crate::compression::{decompress_file, sniff};
use crate::config::ConfigStore;
use crate::crypto::{decrypt_bytes, read_sidecar, sha256_file};
use crate::error::{DbManagerError, Result};
use crate::providers::build_driver;
use crate::task::ProgressHandle;

/// Restore `backup_file` into `db_id`'s database.
///
/// `create_safety_snapshot` is `true` on the outermost call; the rollback
/// re-entry (step 9) always passes `false` so a failed rollback cannot spiral
/// into more snapshots.
pub fn restore<'a>(
    config: &'a Arc<ConfigStore>,
    data_dir: &'a Path,
    db_id: i64,
    backup_file: &'a Path,
    progress: Option<&'a ProgressHandle>,
    create_safety_snapshot: bool,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        // 1. Exist check + sidecar.
        if let Some(p) = progress {
            p.step("verifying backup file exists");
        }
        if !backup_file.exists() {
            return Err(DbManagerError::NotFound(format!(
                "backup file {}",
                backup_file.display()
            )));
        }
        let sidecar_path = sidecar_for(backup_file);
        let expected_hash = if sidecar_path.exists() {
            Some(read_sidecar(&sidecar_path)?)
        } else {
            None
        };

        // 2. Safety snapshot.
        let safety_snapshot_path = if create_safety_snapshot {
            if let Some(p) = progress {
                p.step("creating safety snapshot");
            }
            Some(
                backup(config, data_dir, db_id, Some("safety_snapshot"), None)
                    .await
                    .map_err(|e| {
                        DbManagerError::Critical(format!(
                            "aborting restore: safety snapshot failed: {e}"
                        ))
                    })?,
            )
        } else {
            None
        };

        let attempt = attempt_restore(config, db_id, backup_file, expected_hash.as_deref(), progress).await;

        match attempt {
            Ok(()) => Ok(()),
            Err(e) => {
                let Some(snapshot_path) = safety_snapshot_path else {
                    return Err(e);
                };

                if let Some(p) = progress {
                    p.step("rolling back to safety snapshot");
                }

                match restore(config, data_dir, db_id, &snapshot_path, None, false).await {
                    Ok(()) => Err(DbManagerError::Critical(format!(
                        "restore failed ({e}); ROLLBACK SUCCESSFUL"
                    ))),
                    Err(rollback_err) => Err(DbManagerError::Critical(format!(
                        "restore failed AND rollback failed: original error: {e}; rollback error: {rollback_err}"
                    ))),
                }
            }
        }
    })
}

/// Steps 3-7: stage, decrypt, verify, decompress, and invoke the provider.
async fn attempt_restore(
    config: &Arc<ConfigStore>,
    db_id: i64,
    backup_file: &Path,
    expected_hash: Option<&str>,
    progress: Option<&ProgressHandle>,
) -> Result<()> {
    let database = config.get_database(db_id)?;

    // 3. Stage into a fresh temp directory.
    if let Some(p) = progress {
        p.step("staging artifact");
    }
    let staging = tempfile::tempdir()?;
    let mut working_file = staging.path().join(
        backup_file
            .file_name()
            .ok_or_else(|| DbManagerError::Validation("backup file has no file name".to_string()))?,
    );
    std::fs::copy(backup_file, &working_file)?;

    // 4. Decrypt.
    if working_file.extension().and_then(|e| e.to_str()) == Some("enc") {
        if let Some(p) = progress {
            p.step("decrypting artifact");
        }
        let password = config
            .global_settings()
            .encryption
            .password
            .ok_or_else(|| DbManagerError::Validation("no encryption password configured".to_string()))?;
        let encrypted = std::fs::read(&working_file)?;
        let plaintext = decrypt_bytes(&encrypted, &password)?;

        let decrypted_path = working_file.with_extension("");
        std::fs::write(&decrypted_path, &plaintext)?;
        std::fs::remove_file(&working_file)?;
        working_file = decrypted_path;

        if expected_hash.is_none() {
            return Err(DbManagerError::IntegrityFailure(
                "missing required sidecar for encrypted restore".to_string(),
            ));
        }
    }

    // 5. Verify checksum against the sidecar's pre-encryption/post-compression digest.
    if let Some(p) = progress {
        p.step("verifying checksum");
    }
    if let Some(expected) = expected_hash {
        let actual = sha256_file(&working_file)?;
        if actual != expected {
            return Err(DbManagerError::IntegrityFailure(format!(
                "checksum mismatch: expected {expected}, got {actual}"
            )));
        }
    }

    // 6. Decompress.
    if let Some(algorithm) = sniff(&working_file) {
        if let Some(p) = progress {
            p.step("decompressing artifact");
        }
        let decompressed_path = working_file.with_extension("");
        decompress_file(&working_file, &decompressed_path, algorithm)?;
        std::fs::remove_file(&working_file)?;
        working_file = decompressed_path;
    }

    // 7. Provider restore.
    if let Some(p) = progress {
        p.step("invoking provider restore");
    }
    let driver = build_driver(&database);
    driver.restore(&working_file, progress).await?;

    Ok(())
}

fn sidecar_for(artifact: &Path) -> PathBuf {
    let mut name = artifact.file_name().unwrap_or_default().to_os_string();
    name.push(".sha256");
    artifact.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_for_appends_suffix() {
        let path = Path::new("/data/acct_20260101_000000.dump.enc");
        assert_eq!(
            sidecar_for(path),
            Path::new("/data/acct_20260101_000000.dump.enc.sha256")
        );
    }
}
