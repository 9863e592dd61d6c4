use std::collections::BTreeMap;

use atzentis_core::{Checkpoint, CheckpointStatus, Session, TaskErrorRecord};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{DbError, Result};

/// Row shape of the `sessions` table. The task-set columns are JSON-encoded
/// ordered lists; the map columns and `errors` are JSON-encoded objects.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub project: String,
    pub phase: String,
    pub started_at: i64,
    pub last_checkpoint_at: Option<i64>,
    pub current_task: Option<String>,
    pub pending_tasks: String,
    pub completed_tasks: String,
    pub failed_tasks: String,
    pub worktrees: String,
    pub branches: String,
    pub prs: String,
    pub errors: String,
}

impl SessionRow {
    pub fn into_domain(self) -> Result<Session> {
        Ok(Session {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            project: self.project,
            phase: self.phase,
            started_at: timestamp_to_datetime(self.started_at),
            last_checkpoint_at: self.last_checkpoint_at.map(timestamp_to_datetime),
            current_task: self.current_task,
            pending_tasks: decode_list(&self.pending_tasks, "pending_tasks")?,
            completed_tasks: decode_list(&self.completed_tasks, "completed_tasks")?,
            failed_tasks: decode_list(&self.failed_tasks, "failed_tasks")?,
            worktrees: decode_map(&self.worktrees, "worktrees")?,
            branches: decode_map(&self.branches, "branches")?,
            prs: decode_map(&self.prs, "prs")?,
            errors: decode_errors(&self.errors)?,
        })
    }
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.to_string(),
            project: session.project.clone(),
            phase: session.phase.clone(),
            started_at: datetime_to_timestamp(session.started_at),
            last_checkpoint_at: session.last_checkpoint_at.map(datetime_to_timestamp),
            current_task: session.current_task.clone(),
            pending_tasks: encode_json(&session.pending_tasks),
            completed_tasks: encode_json(&session.completed_tasks),
            failed_tasks: encode_json(&session.failed_tasks),
            worktrees: encode_json(&session.worktrees),
            branches: encode_json(&session.branches),
            prs: encode_json(&session.prs),
            errors: encode_json(&session.errors),
        }
    }
}

/// Row shape of the append-only `checkpoints` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRow {
    pub id: i64,
    pub session_id: String,
    pub timestamp: i64,
    pub task_id: String,
    pub status: String,
    pub pr_link: Option<String>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl CheckpointRow {
    pub fn into_domain(self) -> Checkpoint {
        Checkpoint {
            timestamp: timestamp_to_datetime(self.timestamp),
            task_id: self.task_id,
            status: CheckpointStatus::parse(&self.status).unwrap_or(CheckpointStatus::Failed),
            pr_link: self.pr_link,
            duration_ms: self.duration_ms,
            error: self.error,
        }
    }
}

fn decode_list(raw: &str, column: &'static str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|source| DbError::CorruptColumn { column, source })
}

fn decode_map(raw: &str, column: &'static str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(raw).map_err(|source| DbError::CorruptColumn { column, source })
}

fn decode_errors(raw: &str) -> Result<BTreeMap<String, TaskErrorRecord>> {
    serde_json::from_str(raw).map_err(|source| DbError::CorruptColumn {
        column: "errors",
        source,
    })
}

fn encode_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Timestamps are stored as unix milliseconds so checkpoint ordering
/// survives sub-second appends.
fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_default()
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
