use atzentis_core::{Checkpoint, CheckpointStatus, Session};
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::models::{CheckpointRow, SessionRow};

/// Optional fields carried by a checkpoint append.
#[derive(Debug, Clone, Default)]
pub struct CheckpointExtras {
    pub pr_link: Option<String>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Single-writer persistence for run sessions. Every mutation loads the
/// session row, applies the domain transition and writes it back inside one
/// transaction, so a crash never exposes a half-applied update.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project: &str,
        phase: &str,
        task_ids: Vec<String>,
    ) -> Result<Session> {
        let session = Session::new(project, phase, task_ids);
        let row = SessionRow::from(&session);

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, project, phase, started_at, last_checkpoint_at, current_task,
                pending_tasks, completed_tasks, failed_tasks, worktrees, branches, prs, errors
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.project)
        .bind(&row.phase)
        .bind(row.started_at)
        .bind(row.last_checkpoint_at)
        .bind(&row.current_task)
        .bind(&row.pending_tasks)
        .bind(&row.completed_tasks)
        .bind(&row.failed_tasks)
        .bind(&row.worktrees)
        .bind(&row.branches)
        .bind(&row.prs)
        .bind(&row.errors)
        .execute(&self.pool)
        .await?;

        debug!(session_id = %session.id, project, phase, "session created");
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_domain).transpose()
    }

    /// Most recently started session for the project, or `None` when that
    /// session has neither pending work nor a task in flight.
    pub async fn get_active(&self, project: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE project = ? ORDER BY started_at DESC, id DESC LIMIT 1",
        )
        .bind(project)
        .fetch_optional(&self.pool)
        .await?;

        let session = match row {
            Some(row) => row.into_domain()?,
            None => return Ok(None),
        };

        Ok(session.is_active().then_some(session))
    }

    pub async fn list_all(&self, project: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE project = ? ORDER BY started_at DESC, id DESC",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_domain).collect()
    }

    /// Move `task_id` out of the pending queue and mark it in flight.
    pub async fn start_task(&self, session_id: Uuid, task_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut session = load_tx(&mut tx, session_id).await?;

        session.start_task(task_id);

        save_tx(&mut tx, &session).await?;
        tx.commit().await?;

        debug!(session_id = %session_id, task_id, "task started");
        Ok(())
    }

    /// Append a terminal checkpoint and apply it to the session's task sets.
    /// The session update and the checkpoint insert share one transaction.
    pub async fn checkpoint(
        &self,
        session_id: Uuid,
        task_id: &str,
        status: CheckpointStatus,
        extras: CheckpointExtras,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            status,
            pr_link: extras.pr_link,
            duration_ms: extras.duration_ms,
            error: extras.error,
        };

        let mut tx = self.pool.begin().await?;
        let mut session = load_tx(&mut tx, session_id).await?;

        session.apply_checkpoint(&checkpoint);

        sqlx::query(
            r#"
            INSERT INTO checkpoints (session_id, timestamp, task_id, status, pr_link, duration_ms, error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id.to_string())
        .bind(checkpoint.timestamp.timestamp_millis())
        .bind(&checkpoint.task_id)
        .bind(checkpoint.status.as_str())
        .bind(&checkpoint.pr_link)
        .bind(checkpoint.duration_ms)
        .bind(&checkpoint.error)
        .execute(&mut *tx)
        .await?;

        save_tx(&mut tx, &session).await?;
        tx.commit().await?;

        debug!(
            session_id = %session_id,
            task_id,
            status = status.as_str(),
            "checkpoint appended"
        );
        Ok(checkpoint)
    }

    pub async fn record_error(&self, session_id: Uuid, task_id: &str, message: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut session = load_tx(&mut tx, session_id).await?;

        session.record_error(task_id, message);

        save_tx(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn resolve_error(&self, session_id: Uuid, task_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut session = load_tx(&mut tx, session_id).await?;

        session.resolve_error(task_id);

        save_tx(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn register_worktree(
        &self,
        session_id: Uuid,
        task_id: &str,
        path: &str,
    ) -> Result<()> {
        self.register(session_id, task_id, path, Registry::Worktrees)
            .await
    }

    pub async fn register_branch(
        &self,
        session_id: Uuid,
        task_id: &str,
        branch: &str,
    ) -> Result<()> {
        self.register(session_id, task_id, branch, Registry::Branches)
            .await
    }

    pub async fn register_pr(&self, session_id: Uuid, task_id: &str, url: &str) -> Result<()> {
        self.register(session_id, task_id, url, Registry::Prs).await
    }

    async fn register(
        &self,
        session_id: Uuid,
        task_id: &str,
        value: &str,
        registry: Registry,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut session = load_tx(&mut tx, session_id).await?;

        let map = match registry {
            Registry::Worktrees => &mut session.worktrees,
            Registry::Branches => &mut session.branches,
            Registry::Prs => &mut session.prs,
        };
        map.insert(task_id.to_string(), value.to_string());

        save_tx(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Resume support: put an interrupted `current_task` back at the head of
    /// the pending queue. Returns the re-queued id if there was one.
    pub async fn requeue_current(&self, session_id: Uuid) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let mut session = load_tx(&mut tx, session_id).await?;

        let requeued = session.requeue_current();
        if requeued.is_some() {
            save_tx(&mut tx, &session).await?;
        }
        tx.commit().await?;

        Ok(requeued)
    }

    /// Checkpoints for a session, in append order.
    pub async fn checkpoints(&self, session_id: Uuid) -> Result<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT * FROM checkpoints WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CheckpointRow::into_domain).collect())
    }

    /// Cascade-delete: checkpoints first, then the session row.
    pub async fn delete(&self, session_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

enum Registry {
    Worktrees,
    Branches,
    Prs,
}

async fn load_tx(tx: &mut Transaction<'_, Sqlite>, session_id: Uuid) -> Result<Session> {
    let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
        .bind(session_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

    row.ok_or(DbError::SessionNotFound(session_id))?.into_domain()
}

async fn save_tx(tx: &mut Transaction<'_, Sqlite>, session: &Session) -> Result<()> {
    let row = SessionRow::from(session);

    sqlx::query(
        r#"
        UPDATE sessions
        SET last_checkpoint_at = ?, current_task = ?, pending_tasks = ?,
            completed_tasks = ?, failed_tasks = ?, worktrees = ?, branches = ?,
            prs = ?, errors = ?
        WHERE id = ?
        "#,
    )
    .bind(row.last_checkpoint_at)
    .bind(&row.current_task)
    .bind(&row.pending_tasks)
    .bind(&row.completed_tasks)
    .bind(&row.failed_tasks)
    .bind(&row.worktrees)
    .bind(&row.branches)
    .bind(&row.prs)
    .bind(&row.errors)
    .bind(&row.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
