//! Database engine drivers (spec.md §4.6).
//!
//! Grounded on the teacher's subprocess-invocation style (`Command` +
//! `.output()` + stderr propagation, as in the pg_dump caller this was
//! distilled from) and generalized into one shared trait plus one shared
//! process-invocation helper. Each driver owns only argument building and
//! output interpretation; timeout enforcement, stderr capture and the
//! `error:`-in-stderr sniff live here once.

pub mod mariadb;
pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{DbManagerError, Result};
use crate::model::{Database, DbProvider};
use crate::task::ProgressHandle;

const TOOL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Behavioral contract every engine driver implements (spec.md §4.6).
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    async fn check_connection(&self) -> bool;

    /// Run the native dump tool, producing a single non-empty file under
    /// `dir`, and return its path.
    async fn backup(&self, dir: &Path, progress: Option<&ProgressHandle>) -> Result<PathBuf>;

    /// Run the native restore tool against `file`.
    async fn restore(&self, file: &Path, progress: Option<&ProgressHandle>) -> Result<()>;
}

/// Construct the driver for a configured database.
pub fn build_driver(database: &Database) -> Box<dyn ProviderDriver> {
    match database.provider {
        DbProvider::Postgres => Box::new(postgres::PostgresDriver::new(database.clone())),
        DbProvider::Mysql => Box::new(mysql::MysqlDriver::new(database.clone(), "mysql")),
        DbProvider::Mariadb => Box::new(mariadb::MariadbDriver::new(database.clone(), "mariadb")),
        DbProvider::Sqlserver => Box::new(sqlserver::SqlServerDriver::new(database.clone())),
        DbProvider::Mongodb => Box::new(mongodb::MongodbDriver::new(database.clone())),
    }
}

/// Run `cmd` with the shared 1-hour timeout, surfacing a
/// [`DbManagerError::ToolFailure`] on non-zero exit or on stderr containing
/// `error:` even when the exit status is zero (observed for some tools,
/// spec.md §4.4 step 2).
pub(crate) async fn run_tool(tool: &str, cmd: &mut Command) -> Result<std::process::Output> {
    let output = tokio::time::timeout(TOOL_TIMEOUT, cmd.output())
        .await
        .map_err(|_| DbManagerError::ToolFailure {
            tool: tool.to_string(),
            stderr: format!("timed out after {:?}", TOOL_TIMEOUT),
        })?
        .map_err(|e| DbManagerError::ToolFailure {
            tool: tool.to_string(),
            stderr: e.to_string(),
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(DbManagerError::ToolFailure {
            tool: tool.to_string(),
            stderr: stderr.to_string(),
        });
    }

    if stderr.to_lowercase().contains("error:") {
        return Err(DbManagerError::ToolFailure {
            tool: tool.to_string(),
            stderr: stderr.to_string(),
        });
    }

    Ok(output)
}

/// Fail if `path` does not exist or is empty (spec.md §4.4 step 2).
pub(crate) async fn require_non_empty_file(tool: &str, path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| DbManagerError::ToolFailure {
        tool: tool.to_string(),
        stderr: format!("dump file missing: {e}"),
    })?;

    if metadata.len() == 0 {
        return Err(DbManagerError::ToolFailure {
            tool: tool.to_string(),
            stderr: "dump file is empty".to_string(),
        });
    }

    Ok(())
}
