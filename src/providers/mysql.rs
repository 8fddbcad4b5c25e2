//! MySQL/MariaDB driver: `mysqldump`/`mysql` client tools (spec.md §4.6).
//!
//! MariaDB ships wire-compatible `mysqldump`/`mysql` binaries, so one driver
//! covers both engines; `flavor` only labels error messages.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{require_non_empty_file, run_tool, ProviderDriver};
use crate::error::Result;
use crate::model::Database;
use crate::task::ProgressHandle;

pub struct MysqlDriver {
    db: Database,
    flavor: &'static str,
}

impl MysqlDriver {
    pub fn new(db: Database, flavor: &'static str) -> Self {
        Self { db, flavor }
    }

    fn connection_args(&self, cmd: &mut Command) {
        if let Some(host) = self.db.host() {
            cmd.arg("--host").arg(host);
        }
        if let Some(port) = self.db.port() {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(username) = self.db.param_str("username") {
            cmd.arg("--user").arg(username);
        }
        // Secrets travel via MYSQL_PWD, never as a CLI argument (spec.md §4.6).
        if let Some(password) = self.db.param_str("password") {
            cmd.env("MYSQL_PWD", password);
        }
    }

    fn database_name(&self) -> String {
        self.db.param_str("database").unwrap_or_else(|| self.db.name.clone())
    }
}

#[async_trait]
impl ProviderDriver for MysqlDriver {
    async fn check_connection(&self) -> bool {
        let mut cmd = Command::new("mysqladmin");
        cmd.arg("ping");
        self.connection_args(&mut cmd);
        run_tool("mysqladmin", &mut cmd).await.is_ok()
    }

    async fn backup(&self, dir: &Path, progress: Option<&ProgressHandle>) -> Result<PathBuf> {
        if let Some(p) = progress {
            p.step(format!("running mysqldump ({})", self.flavor));
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.sql", self.db.name, timestamp));

        let mut cmd = Command::new("mysqldump");
        cmd.arg("--single-transaction")
            .arg("--routines")
            .arg("--triggers")
            .arg("--events")
            .arg("--add-drop-table")
            .arg("--extended-insert")
            .arg("--default-character-set=utf8mb4")
            .arg("--comments")
            .arg("--dump-date")
            .arg("--result-file")
            .arg(&path);
        self.connection_args(&mut cmd);
        cmd.arg(self.database_name());

        run_tool("mysqldump", &mut cmd).await?;
        require_non_empty_file("mysqldump", &path).await?;

        Ok(path)
    }

    async fn restore(&self, file: &Path, progress: Option<&ProgressHandle>) -> Result<()> {
        if let Some(p) = progress {
            p.step(format!("running mysql client ({})", self.flavor));
        }

        let file_contents = std::fs::File::open(file)
            .map_err(|e| crate::error::DbManagerError::ToolFailure {
                tool: "mysql".to_string(),
                stderr: e.to_string(),
            })?;

        let mut cmd = Command::new("mysql");
        self.connection_args(&mut cmd);
        cmd.arg(self.database_name()).stdin(file_contents);

        run_tool("mysql", &mut cmd).await?;
        Ok(())
    }
}
