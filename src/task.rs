//! Task manager and progress reporting (spec.md §4.7, §5).
//!
//! Grounded on the teacher's `RwLock`-guarded statistics maps, built fresh
//! for the id-keyed task table and mutex-guarded progress handle the spec
//! actually calls for. `TaskManager` is the single writer of the task table;
//! `ProgressHandle` is a separate, per-operation object bridged into it by a
//! callback supplied at creation — the two are deliberately decoupled so the
//! HTTP/WebSocket layer can poll the task record without touching the
//! in-flight progress lock (spec.md Design Notes §9).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Task, TaskStatus};

/// Internal status of an in-flight operation, finer-grained than [`TaskStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Idle,
    Preparing,
    Running,
    Completed,
    Failed,
}

impl ProgressStatus {
    /// Map onto the coarser task status the spec's state machine uses.
    fn to_task_status(self) -> TaskStatus {
        match self {
            ProgressStatus::Idle | ProgressStatus::Preparing | ProgressStatus::Running => {
                TaskStatus::Running
            }
            ProgressStatus::Completed => TaskStatus::Completed,
            ProgressStatus::Failed => TaskStatus::Failed,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }
}

/// A snapshot of progress, handed to callbacks outside the lock.
#[derive(Debug, Clone)]
pub struct Progress {
    pub status: ProgressStatus,
    pub percentage: u8,
    pub message: String,
    pub steps_done: u32,
    pub steps_total: u32,
    pub started_at: chrono::DateTime<Utc>,
    pub ended_at: Option<chrono::DateTime<Utc>>,
    pub error: Option<String>,
}

struct ProgressInner {
    status: ProgressStatus,
    percentage: u8,
    message: String,
    steps_done: u32,
    steps_total: u32,
    started_at: chrono::DateTime<Utc>,
    ended_at: Option<chrono::DateTime<Utc>>,
    error: Option<String>,
}

/// Live progress channel for a single in-flight operation.
///
/// All fields live behind one mutex; callbacks fire after the lock is
/// released to avoid priority inversion with whatever the callback does
/// (spec.md §5 "Progress handle").
pub struct ProgressHandle {
    inner: Mutex<ProgressInner>,
    callback: Option<Box<dyn Fn(&Progress) + Send + Sync>>,
}

impl ProgressHandle {
    pub fn new(steps_total: u32) -> Self {
        Self {
            inner: Mutex::new(ProgressInner {
                status: ProgressStatus::Idle,
                percentage: 0,
                message: String::new(),
                steps_done: 0,
                steps_total,
                started_at: Utc::now(),
                ended_at: None,
                error: None,
            }),
            callback: None,
        }
    }

    pub fn with_callback(steps_total: u32, callback: Box<dyn Fn(&Progress) + Send + Sync>) -> Self {
        Self {
            callback: Some(callback),
            ..Self::new(steps_total)
        }
    }

    fn snapshot(inner: &ProgressInner) -> Progress {
        Progress {
            status: inner.status,
            percentage: inner.percentage,
            message: inner.message.clone(),
            steps_done: inner.steps_done,
            steps_total: inner.steps_total,
            started_at: inner.started_at,
            ended_at: inner.ended_at,
            error: inner.error.clone(),
        }
    }

    /// Advance to the next step with a human-readable message.
    pub fn step(&self, message: impl Into<String>) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.status = ProgressStatus::Running;
            inner.steps_done = (inner.steps_done + 1).min(inner.steps_total.max(1));
            inner.message = message.into();
            inner.percentage = if inner.steps_total == 0 {
                0
            } else {
                ((inner.steps_done as f64 / inner.steps_total as f64) * 100.0) as u8
            };
            Self::snapshot(&inner)
        };
        self.notify(&snapshot);
    }

    pub fn complete(&self, message: impl Into<String>) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.status = ProgressStatus::Completed;
            inner.percentage = 100;
            inner.message = message.into();
            inner.ended_at = Some(Utc::now());
            Self::snapshot(&inner)
        };
        self.notify(&snapshot);
    }

    pub fn fail(&self, error: impl Into<String>) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            let error = error.into();
            inner.status = ProgressStatus::Failed;
            inner.error = Some(error.clone());
            inner.message = error;
            inner.ended_at = Some(Utc::now());
            Self::snapshot(&inner)
        };
        self.notify(&snapshot);
    }

    pub fn snapshot_now(&self) -> Progress {
        let inner = self.inner.lock().unwrap();
        Self::snapshot(&inner)
    }

    fn notify(&self, progress: &Progress) {
        // Callback runs with the lock released; a panicking callback must
        // not poison the progress handle for the rest of the pipeline.
        if let Some(callback) = &self.callback {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(progress)));
        }
    }
}

/// Thread-safe, id-keyed table of [`Task`] records (spec.md §4.7).
pub struct TaskManager {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, task_type: impl Into<String>, description: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let task = Task {
            id,
            task_type: task_type.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            result: None,
        };
        self.tasks.write().unwrap().insert(id, task);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().unwrap().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.read().unwrap().values().cloned().collect()
    }

    /// Apply a [`Progress`] snapshot to the task record (the bridge the
    /// spec's callback wiring performs between `ProgressHandle` and `Task`).
    pub fn apply_progress(&self, id: Uuid, progress: &Progress) {
        let mut guard = self.tasks.write().unwrap();
        if let Some(task) = guard.get_mut(&id) {
            task.status = progress.status.to_task_status();
            task.progress = progress.percentage;
            task.message = progress.message.clone();
            task.error = progress.error.clone();
            task.updated_at = Utc::now();
            if progress.status.is_terminal() {
                task.completed_at = Some(progress.ended_at.unwrap_or_else(Utc::now));
                if progress.status == ProgressStatus::Completed {
                    task.progress = 100;
                }
            }
        }
    }

    pub fn complete(&self, id: Uuid, result: Option<Value>) {
        let mut guard = self.tasks.write().unwrap();
        if let Some(task) = guard.get_mut(&id) {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.result = result;
            task.updated_at = Utc::now();
            task.completed_at = Some(Utc::now());
        }
    }

    pub fn fail(&self, id: Uuid, error: impl Into<String>) {
        let mut guard = self.tasks.write().unwrap();
        if let Some(task) = guard.get_mut(&id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error.into());
            task.updated_at = Utc::now();
            task.completed_at = Some(Utc::now());
        }
    }

    /// Construct a [`ProgressHandle`] whose updates are mirrored into this
    /// task manager's table for `id`.
    pub fn progress_handle_for(self: &Arc<Self>, id: Uuid, steps_total: u32) -> ProgressHandle {
        let manager = self.clone();
        ProgressHandle::with_callback(
            steps_total,
            Box::new(move |progress: &Progress| manager.apply_progress(id, progress)),
        )
    }

    /// Remove completed/failed tasks whose `completed_at` is older than `hours`.
    pub fn cleanup_older_than(&self, hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let mut guard = self.tasks.write().unwrap();
        let before = guard.len();
        guard.retain(|_, task| match task.completed_at {
            Some(completed_at) => completed_at > cutoff,
            None => true,
        });
        before - guard.len()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_complete_sets_terminal_fields() {
        let manager = TaskManager::new();
        let id = manager.create("backup", "acct database backup");

        manager.complete(id, Some(serde_json::json!({"path": "/tmp/x"})));

        let task = manager.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn fail_records_error_and_completed_at() {
        let manager = TaskManager::new();
        let id = manager.create("restore", "acct database restore");

        manager.fail(id, "checksum mismatch");

        let task = manager.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("checksum mismatch"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn progress_handle_bridges_into_task_record() {
        let manager = Arc::new(TaskManager::new());
        let id = manager.create("backup", "acct database backup");
        let handle = manager.progress_handle_for(id, 4);

        handle.step("dumping");
        let mid = manager.get(id).unwrap();
        assert_eq!(mid.status, TaskStatus::Running);
        assert_eq!(mid.progress, 25);

        handle.complete("done");
        let done = manager.get(id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
    }

    #[test]
    fn cleanup_older_than_removes_only_stale_terminal_tasks() {
        let manager = TaskManager::new();
        let keep = manager.create("backup", "recent");
        let drop = manager.create("backup", "stale");

        manager.complete(keep, None);
        manager.complete(drop, None);
        {
            let mut guard = manager.tasks.write().unwrap();
            guard.get_mut(&drop).unwrap().completed_at = Some(Utc::now() - chrono::Duration::hours(100));
        }

        let removed = manager.cleanup_older_than(24);
        assert_eq!(removed, 1);
        assert!(manager.get(keep).is_some());
        assert!(manager.get(drop).is_none());
    }
}
