//! PostgreSQL driver: custom-format dumps via `pg_dump`/`pg_restore`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{require_non_empty_file, run_tool, ProviderDriver};
use crate::error::Result;
use crate::model::Database;
use crate::task::ProgressHandle;

pub struct PostgresDriver {
    db: Database,
}

impl PostgresDriver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn connection_args(&self, cmd: &mut Command) {
        if let Some(host) = self.db.host() {
            cmd.arg("--host").arg(host);
        }
        if let Some(port) = self.db.port() {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(username) = self.db.param_str("username") {
            cmd.arg("--username").arg(username);
        }
        // Secrets travel via PGPASSWORD, never as a CLI argument (spec.md §4.6).
        if let Some(password) = self.db.param_str("password") {
            cmd.env("PGPASSWORD", password);
        }
    }

    fn database_name(&self) -> String {
        self.db.param_str("database").unwrap_or_else(|| self.db.name.clone())
    }
}

#[async_trait]
impl ProviderDriver for PostgresDriver {
    async fn check_connection(&self) -> bool {
        let mut cmd = Command::new("pg_isready");
        self.connection_args(&mut cmd);
        run_tool("pg_isready", &mut cmd).await.is_ok()
    }

    async fn backup(&self, dir: &Path, progress: Option<&ProgressHandle>) -> Result<PathBuf> {
        if let Some(p) = progress {
            p.step("running pg_dump");
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.dump", self.db.name, timestamp));

        let mut cmd = Command::new("pg_dump");
        cmd.arg("--format=custom")
            .arg("--no-privileges")
            .arg("--no-owner")
            .arg("--file")
            .arg(&path)
            .arg("--dbname")
            .arg(self.database_name());
        self.connection_args(&mut cmd);

        run_tool("pg_dump", &mut cmd).await?;
        require_non_empty_file("pg_dump", &path).await?;

        Ok(path)
    }

    async fn restore(&self, file: &Path, progress: Option<&ProgressHandle>) -> Result<()> {
        if let Some(p) = progress {
            p.step("running pg_restore");
        }

        let is_custom_format = file.extension().and_then(|e| e.to_str()) == Some("dump");

        if is_custom_format {
            let mut cmd = Command::new("pg_restore");
            cmd.arg("--clean")
                .arg("--if-exists")
                .arg("--no-owner")
                .arg("--dbname")
                .arg(self.database_name())
                .arg(file);
            self.connection_args(&mut cmd);
            run_tool("pg_restore", &mut cmd).await?;
        } else {
            let mut cmd = Command::new("psql");
            cmd.arg("--dbname")
                .arg(self.database_name())
                .arg("--file")
                .arg(file);
            self.connection_args(&mut cmd);
            run_tool("psql", &mut cmd).await?;
        }

        Ok(())
    }
}
