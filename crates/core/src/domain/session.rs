use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable record of a task's terminal outcome within a session. Appended in
/// monotonic timestamp order; a task id may recur across retries but carries
/// `completed` at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub status: CheckpointStatus,
    pub pr_link: Option<String>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Per-task failure bookkeeping inside a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskErrorRecord {
    pub iterations: u32,
    pub last_error: String,
    pub retried: bool,
    pub resolved: bool,
}

impl TaskErrorRecord {
    pub fn first(error: impl Into<String>) -> Self {
        Self {
            iterations: 1,
            last_error: error.into(),
            retried: false,
            resolved: false,
        }
    }

    pub fn record(&mut self, error: impl Into<String>) {
        self.iterations += 1;
        self.last_error = error.into();
        self.retried = true;
        self.resolved = false;
    }

    pub fn resolve(&mut self) {
        self.resolved = true;
    }
}

/// A single run instance. The four task sets plus `current_task` partition
/// the ids the session was created with: every id lives in exactly one of
/// pending / current / completed / failed at any point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub project: String,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub pending_tasks: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub worktrees: BTreeMap<String, String>,
    pub branches: BTreeMap<String, String>,
    pub prs: BTreeMap<String, String>,
    pub errors: BTreeMap<String, TaskErrorRecord>,
}

impl Session {
    pub fn new(
        project: impl Into<String>,
        phase: impl Into<String>,
        task_ids: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project: project.into(),
            phase: phase.into(),
            started_at: Utc::now(),
            last_checkpoint_at: None,
            current_task: None,
            pending_tasks: task_ids,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            worktrees: BTreeMap::new(),
            branches: BTreeMap::new(),
            prs: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    /// A session is active while it still has work: pending ids or a task
    /// in flight.
    pub fn is_active(&self) -> bool {
        !self.pending_tasks.is_empty() || self.current_task.is_some()
    }

    /// Move a task out of `pending_tasks` and mark it in flight.
    pub fn start_task(&mut self, task_id: &str) {
        self.pending_tasks.retain(|id| id != task_id);
        self.current_task = Some(task_id.to_string());
    }

    /// Apply a terminal checkpoint: clear `current_task`, file the id into
    /// the matching set, bump `last_checkpoint_at`.
    pub fn apply_checkpoint(&mut self, checkpoint: &Checkpoint) {
        if self.current_task.as_deref() == Some(checkpoint.task_id.as_str()) {
            self.current_task = None;
        }
        let bucket = match checkpoint.status {
            CheckpointStatus::Completed => &mut self.completed_tasks,
            CheckpointStatus::Failed => &mut self.failed_tasks,
        };
        if !bucket.contains(&checkpoint.task_id) {
            bucket.push(checkpoint.task_id.clone());
        }
        self.last_checkpoint_at = Some(checkpoint.timestamp);
    }

    /// Put an interrupted `current_task` back at the head of the queue.
    /// Used by resume after a crash between task start and checkpoint.
    pub fn requeue_current(&mut self) -> Option<String> {
        let task_id = self.current_task.take()?;
        if !self.pending_tasks.iter().any(|id| id == &task_id) {
            self.pending_tasks.insert(0, task_id.clone());
        }
        Some(task_id)
    }

    pub fn record_error(&mut self, task_id: &str, error: impl Into<String>) {
        match self.errors.get_mut(task_id) {
            Some(record) => record.record(error),
            None => {
                self.errors
                    .insert(task_id.to_string(), TaskErrorRecord::first(error));
            }
        }
    }

    pub fn resolve_error(&mut self, task_id: &str) {
        if let Some(record) = self.errors.get_mut(task_id) {
            record.resolve();
        }
    }
}
