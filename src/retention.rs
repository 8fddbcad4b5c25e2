//! Local and remote retention enforcement (spec.md §4.4 step 9).
//!
//! Grounded on the teacher's `retention.rs` manager shape, narrowed from
//! GFS/time-based policy evaluation to the count-based retention the system
//! actually needs: keep the `k` most recent artifacts, locally by mtime and
//! per storage target by remote `last_modified`.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::StorageBackend;

/// Local artifacts beyond the retention count, along with their sidecars.
fn local_candidates(dir: &Path, keep: usize) -> std::io::Result<Vec<PathBuf>> {
    let mut artifacts: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext != "sha256")
                .unwrap_or(false)
        })
        .filter_map(|path| {
            let mtime = std::fs::metadata(&path).ok()?.modified().ok()?;
            Some((path, mtime))
        })
        .collect();

    artifacts.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(artifacts.into_iter().skip(keep).map(|(path, _)| path).collect())
}

/// Enforce local retention in `dir`: keep the `keep` most recent artifacts
/// by mtime, deleting everything older along with its `.sha256` sidecar.
pub fn enforce_local_retention(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let stale = local_candidates(dir, keep)?;
    let mut removed = Vec::new();

    for artifact in stale {
        let sidecar = sidecar_path(&artifact);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
        std::fs::remove_file(&artifact)?;
        removed.push(artifact);
    }

    Ok(removed)
}

/// Enforce remote retention under `prefix` on `storage`: keep the `keep`
/// most recent objects by `last_modified`, deleting the rest and their
/// `.sha256` sidecars by key suffix.
pub async fn enforce_remote_retention(
    storage: &dyn StorageBackend,
    prefix: &str,
    keep: usize,
) -> Result<Vec<String>> {
    let mut objects = storage.list(prefix, None).await?;
    objects.retain(|o| !o.key.ends_with(".sha256"));
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let mut removed = Vec::new();
    for object in objects.into_iter().skip(keep) {
        storage.delete(&object.key).await?;
        storage.delete(&format!("{}.sha256", object.key)).await?;
        removed.push(object.key);
    }

    Ok(removed)
}

fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.file_name().unwrap_or_default().to_os_string();
    name.push(".sha256");
    artifact.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, body: &[u8]) {
        std::fs::write(path, body).unwrap();
        sleep(Duration::from_millis(5));
    }

    #[test]
    fn local_retention_keeps_newest_and_its_sidecar() {
        let dir = tempdir().unwrap();

        for i in 0..4 {
            let artifact = dir.path().join(format!("acct_{i}.dump"));
            touch(&artifact, b"x");
            std::fs::write(sidecar_path(&artifact), "deadbeef  artifact\n").unwrap();
        }

        let removed = enforce_local_retention(dir.path(), 1).unwrap();
        assert_eq!(removed.len(), 3);

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();

        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|n| n == "acct_3.dump"));
        assert!(remaining.iter().any(|n| n == "acct_3.dump.sha256"));
    }

    #[test]
    fn local_retention_on_missing_dir_is_noop() {
        let removed = enforce_local_retention(Path::new("/nonexistent/path/xyz"), 1).unwrap();
        assert!(removed.is_empty());
    }
}
