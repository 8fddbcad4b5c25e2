//! SQL Server driver: a schema+data scripter for backup, `sqlcmd` for restore.
//!
//! The corpus has no native SQL Server dump tool bundled with the engine
//! the way `pg_dump`/`mysqldump` are; production deployments commonly pair
//! `sqlcmd` with a scripting tool such as `mssql-scripter` to produce a
//! portable `.sql` file, which is what this driver shells out to.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{require_non_empty_file, run_tool, ProviderDriver};
use crate::error::Result;
use crate::model::Database;
use crate::task::ProgressHandle;

pub struct SqlServerDriver {
    db: Database,
}

impl SqlServerDriver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn server_arg(&self) -> String {
        let host = self.db.host().unwrap_or_else(|| "localhost".to_string());
        match self.db.port() {
            Some(port) => format!("{host},{port}"),
            None => host,
        }
    }

    fn connection_args(&self, cmd: &mut Command) {
        cmd.arg("--server").arg(self.server_arg());
        if let Some(username) = self.db.param_str("username") {
            cmd.env("MSSQL_USER", username);
        }
        if let Some(password) = self.db.param_str("password") {
            cmd.env("MSSQL_PASSWORD", password);
        }
    }

    fn database_name(&self) -> String {
        self.db.param_str("database").unwrap_or_else(|| self.db.name.clone())
    }
}

#[async_trait]
impl ProviderDriver for SqlServerDriver {
    async fn check_connection(&self) -> bool {
        let mut cmd = Command::new("sqlcmd");
        self.connection_args(&mut cmd);
        cmd.arg("-Q").arg("SELECT 1");
        run_tool("sqlcmd", &mut cmd).await.is_ok()
    }

    async fn backup(&self, dir: &Path, progress: Option<&ProgressHandle>) -> Result<PathBuf> {
        if let Some(p) = progress {
            p.step("scripting schema and data via mssql-scripter");
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.bak", self.db.name, timestamp));

        let mut cmd = Command::new("mssql-scripter");
        cmd.arg("--server").arg(self.server_arg())
            .arg("--database").arg(self.database_name())
            .arg("--file-path").arg(&path)
            .arg("--schema-and-data");
        if let Some(username) = self.db.param_str("username") {
            cmd.arg("--user").arg(username);
        }
        if let Some(password) = self.db.param_str("password") {
            cmd.env("MSSQL_SCRIPTER_PASSWORD", password);
        }

        run_tool("mssql-scripter", &mut cmd).await?;
        require_non_empty_file("mssql-scripter", &path).await?;

        Ok(path)
    }

    async fn restore(&self, file: &Path, progress: Option<&ProgressHandle>) -> Result<()> {
        if let Some(p) = progress {
            p.step("running sqlcmd");
        }

        let mut cmd = Command::new("sqlcmd");
        self.connection_args(&mut cmd);
        cmd.arg("--database").arg(self.database_name()).arg("--input-file").arg(file);

        run_tool("sqlcmd", &mut cmd).await?;
        Ok(())
    }
}
