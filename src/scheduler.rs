//! Declarative cron-entry CRUD (spec.md §4's scheduler bridge).
//!
//! Grounded on the teacher's `scheduler.rs` use of the `cron` crate for
//! expression validation, narrowed to the actual job here: this crate never
//! runs a loop that fires backups itself — the OS cron table does that, via
//! an external collaborator that applies the [`CronEntry`] values this
//! module renders. No `tokio::spawn` polling loop survives the rewrite.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{DbManagerError, Result};
use crate::model::Schedule;

/// A rendered line for the external cron-table writer to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    /// Discriminating comment: `dbmanager-backup:<db_id>`.
    pub comment: String,
    /// Full command line, e.g. `DBMANAGER_DATA_DIR=<dir> dbmanager perform-backup --db-id <id>`.
    pub command: String,
    pub cron_expression: String,
}

/// Validate a cron expression has exactly 5 whitespace-separated fields and
/// is otherwise well formed, per spec.md §3 "Schedule" invariant.
pub fn validate_cron_expression(expr: &str) -> Result<()> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(DbManagerError::Validation(format!(
            "cron expression must have 5 fields, got {}: '{}'",
            fields.len(),
            expr
        )));
    }

    // The `cron` crate parses 6/7 field (seconds-first) expressions; prefix
    // a seconds field of 0 to reuse it for validation and upcoming-run math.
    let with_seconds = format!("0 {expr}");
    cron::Schedule::from_str(&with_seconds)
        .map_err(|e| DbManagerError::Validation(format!("invalid cron expression: {e}")))?;

    Ok(())
}

/// Compute the next run time after `after` for a validated 5-field expression.
pub fn next_run_after(
    expr: &str,
    after: chrono::DateTime<chrono::Utc>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let with_seconds = format!("0 {expr}");
    let schedule = cron::Schedule::from_str(&with_seconds)
        .map_err(|e| DbManagerError::Validation(format!("invalid cron expression: {e}")))?;
    Ok(schedule.after(&after).next())
}

/// Render the cron-table entry for a schedule (spec.md §6 "Cron entries").
pub fn render_cron_entry(schedule: &Schedule, data_dir: &str) -> CronEntry {
    CronEntry {
        comment: format!("dbmanager-backup:{}", schedule.database_id),
        command: format!(
            "DBMANAGER_DATA_DIR={} dbmanager perform-backup --db-id {}",
            data_dir, schedule.database_id
        ),
        cron_expression: schedule.cron_expression.clone(),
    }
}

/// Declarative store of [`Schedule`] records keyed by `database_id`.
///
/// This is intentionally not the config document's source of truth (that is
/// [`crate::config::ConfigStore`]); it is an in-process cache used by the
/// HTTP/cron-table collaborators to avoid round-tripping the config store on
/// every lookup. Callers who mutate schedules persist through the config
/// store and then call [`BackupScheduler::refresh`].
pub struct BackupScheduler {
    schedules: Arc<RwLock<HashMap<i64, Schedule>>>,
}

impl BackupScheduler {
    pub fn new() -> Self {
        Self {
            schedules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the in-process cache wholesale (e.g. after a config reload).
    pub async fn refresh(&self, schedules: Vec<Schedule>) {
        let mut guard = self.schedules.write().await;
        guard.clear();
        for schedule in schedules {
            guard.insert(schedule.database_id, schedule);
        }
    }

    pub async fn upsert(&self, schedule: Schedule) -> Result<()> {
        validate_cron_expression(&schedule.cron_expression)?;
        let mut guard = self.schedules.write().await;
        guard.insert(schedule.database_id, schedule);
        Ok(())
    }

    pub async fn remove(&self, database_id: i64) -> Result<()> {
        let mut guard = self.schedules.write().await;
        guard
            .remove(&database_id)
            .ok_or_else(|| DbManagerError::NotFound(format!("schedule for db {database_id}")))?;
        Ok(())
    }

    pub async fn get(&self, database_id: i64) -> Option<Schedule> {
        self.schedules.read().await.get(&database_id).cloned()
    }

    pub async fn list(&self) -> Vec<Schedule> {
        self.schedules.read().await.values().cloned().collect()
    }

    /// Render cron-table entries for every enabled schedule.
    pub async fn render_entries(&self, data_dir: &str) -> Vec<CronEntry> {
        self.schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .map(|s| render_cron_entry(s, data_dir))
            .collect()
    }
}

impl Default for BackupScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Common cron expressions, offered for convenience (spec.md §6 examples).
pub struct ScheduleTemplates;

impl ScheduleTemplates {
    pub fn hourly() -> &'static str {
        "0 * * * *"
    }

    pub fn daily() -> &'static str {
        "0 0 * * *"
    }

    pub fn weekly() -> &'static str {
        "0 0 * * 0"
    }

    pub fn monthly() -> &'static str {
        "0 0 1 * *"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(database_id: i64, cron: &str) -> Schedule {
        Schedule {
            id: 1,
            database_id,
            cron_expression: cron.to_string(),
            enabled: true,
            last_run: None,
            next_run: None,
        }
    }

    #[test]
    fn rejects_non_five_field_expressions() {
        assert!(validate_cron_expression("0 0 * * * *").is_err());
        assert!(validate_cron_expression("0 0 * *").is_err());
        assert!(validate_cron_expression(ScheduleTemplates::daily()).is_ok());
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_cron() {
        let scheduler = BackupScheduler::new();
        let bad = schedule(7, "not a cron");
        assert!(scheduler.upsert(bad).await.is_err());
        assert!(scheduler.get(7).await.is_none());
    }

    #[tokio::test]
    async fn render_entries_uses_naming_convention() {
        let scheduler = BackupScheduler::new();
        scheduler.upsert(schedule(7, ScheduleTemplates::daily())).await.unwrap();

        let entries = scheduler.render_entries("/var/lib/dbmanager").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].comment, "dbmanager-backup:7");
        assert!(entries[0].command.contains("--db-id 7"));
        assert!(entries[0].command.contains("DBMANAGER_DATA_DIR=/var/lib/dbmanager"));
    }

    #[tokio::test]
    async fn disabled_schedules_are_not_rendered() {
        let scheduler = BackupScheduler::new();
        let mut disabled = schedule(9, ScheduleTemplates::hourly());
        disabled.enabled = false;
        scheduler.upsert(disabled).await.unwrap();

        assert!(scheduler.render_entries("/data").await.is_empty());
    }
}
