//! MongoDB driver: `mongodump`/`mongorestore`, archived into a single file.
//!
//! `mongodump` produces a directory tree, not a single file, so this driver
//! tars and gzips it into one artifact (spec.md §4.6) to match the
//! single-file contract every other provider satisfies directly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{require_non_empty_file, run_tool, ProviderDriver};
use crate::error::Result;
use crate::model::Database;
use crate::task::ProgressHandle;

pub struct MongodbDriver {
    db: Database,
}

impl MongodbDriver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn uri(&self) -> String {
        if let Some(uri) = self.db.param_str("uri") {
            return uri;
        }
        let host = self.db.host().unwrap_or_else(|| "localhost".to_string());
        let port = self.db.port().unwrap_or(27017);
        match (self.db.param_str("username"), self.db.param_str("password")) {
            (Some(user), Some(pass)) => format!("mongodb://{user}:{pass}@{host}:{port}"),
            _ => format!("mongodb://{host}:{port}"),
        }
    }

    fn database_name(&self) -> String {
        self.db.param_str("database").unwrap_or_else(|| self.db.name.clone())
    }
}

#[async_trait]
impl ProviderDriver for MongodbDriver {
    async fn check_connection(&self) -> bool {
        let mut cmd = Command::new("mongosh");
        cmd.arg(self.uri()).arg("--eval").arg("db.runCommand({ping:1})");
        run_tool("mongosh", &mut cmd).await.is_ok()
    }

    async fn backup(&self, dir: &Path, progress: Option<&ProgressHandle>) -> Result<PathBuf> {
        if let Some(p) = progress {
            p.step("running mongodump");
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let dump_dir = dir.join(format!("{}_{}_dump", self.db.name, timestamp));
        let archive = dir.join(format!("{}_{}.tar.gz", self.db.name, timestamp));

        let mut cmd = Command::new("mongodump");
        cmd.arg("--uri").arg(self.uri())
            .arg("--db").arg(self.database_name())
            .arg("--gzip")
            .arg("--out").arg(&dump_dir);

        run_tool("mongodump", &mut cmd).await?;

        if let Some(p) = progress {
            p.step("archiving dump directory");
        }

        let mut tar_cmd = Command::new("tar");
        tar_cmd
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(dir)
            .arg(dump_dir.file_name().unwrap());

        run_tool("tar", &mut tar_cmd).await?;
        require_non_empty_file("mongodump", &archive).await?;

        let _ = tokio::fs::remove_dir_all(&dump_dir).await;

        Ok(archive)
    }

    async fn restore(&self, file: &Path, progress: Option<&ProgressHandle>) -> Result<()> {
        if let Some(p) = progress {
            p.step("extracting archive");
        }

        let extract_dir = file.with_extension("").with_extension("");
        tokio::fs::create_dir_all(&extract_dir)
            .await
            .map_err(crate::error::DbManagerError::Io)?;

        let mut untar_cmd = Command::new("tar");
        untar_cmd.arg("-xzf").arg(file).arg("-C").arg(&extract_dir);
        run_tool("tar", &mut untar_cmd).await?;

        if let Some(p) = progress {
            p.step("running mongorestore");
        }

        let mut entries = tokio::fs::read_dir(&extract_dir)
            .await
            .map_err(crate::error::DbManagerError::Io)?;
        let dump_dir = entries
            .next_entry()
            .await
            .map_err(crate::error::DbManagerError::Io)?
            .map(|e| e.path())
            .unwrap_or_else(|| extract_dir.clone());

        let mut cmd = Command::new("mongorestore");
        cmd.arg("--uri").arg(self.uri())
            .arg("--gzip")
            .arg("--drop")
            .arg(&dump_dir);

        run_tool("mongorestore", &mut cmd).await?;
        let _ = tokio::fs::remove_dir_all(&extract_dir).await;

        Ok(())
    }
}
