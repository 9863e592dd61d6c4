//! Run lifecycle events published by the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every event with an id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "run.started")]
    RunStarted {
        session_id: Uuid,
        project: String,
        phase: String,
        task_count: usize,
    },

    #[serde(rename = "run.finished")]
    RunFinished {
        session_id: Uuid,
        completed: usize,
        failed: usize,
    },

    #[serde(rename = "wave.started")]
    WaveStarted {
        session_id: Uuid,
        wave: usize,
        task_ids: Vec<String>,
    },

    #[serde(rename = "task.started")]
    TaskStarted { session_id: Uuid, task_id: String },

    #[serde(rename = "task.completed")]
    TaskCompleted {
        session_id: Uuid,
        task_id: String,
        duration_ms: i64,
    },

    #[serde(rename = "task.failed")]
    TaskFailed {
        session_id: Uuid,
        task_id: String,
        error: String,
    },

    #[serde(rename = "worktree.created")]
    WorktreeCreated {
        session_id: Uuid,
        task_id: String,
        path: String,
        branch: String,
    },

    #[serde(rename = "pr.created")]
    PrCreated {
        session_id: Uuid,
        task_id: String,
        url: String,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}
