//! The run/resume state machines.
//!
//! Per task: worktree, prompt, agent, validation, commit, push, best-effort
//! PR, then the completed checkpoint. The checkpoint is always the last
//! state-changing step of a successful task, so a crash at any earlier point
//! leaves the session in a state resume can recover from: either the
//! checkpoint exists (task done) or it does not (task re-executed, with the
//! worktree and branch reattached idempotently).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use agent::AgentEngine;
use atzentis_core::{CheckpointStatus, Session, Task, TaskId};
use db::{CheckpointExtras, SessionStore};
use events::{Event, EventBus, EventEnvelope};
use futures::future::join_all;
use github::{GhCli, PrSpec};
use specs::TaskLoader;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vcs::{CommitOutcome, CreateOptions, WorktreeHandle, Worktrees};

use crate::error::{OrchestratorError, Result};
use crate::hooks::{HookContext, HookRunner};
use crate::prompts;
use crate::scheduler;
use crate::validation;

/// Extra attempts around the whole task pipeline, on top of the engine's
/// internal retries.
const OUTER_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub project: String,
    pub phase: String,
    pub parallel: bool,
    pub max_parallel: usize,
    /// Skip lint/test validation after agent completion.
    pub fast: bool,
    pub base_branch: String,
    pub remote: String,
    pub lint_command: Option<String>,
    pub test_command: Option<String>,
    pub commit_trailer: String,
    pub completion_token: String,
    pub create_prs: bool,
    pub pr_draft: bool,
    pub pr_base: Option<String>,
    pub agent_opts: agent::ExecOptions,
}

impl ExecutorConfig {
    pub fn new(project: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            phase: phase.into(),
            parallel: false,
            max_parallel: 3,
            fast: false,
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
            lint_command: None,
            test_command: None,
            commit_trailer: "Generated-by: atzentis".to_string(),
            completion_token: agent::DEFAULT_COMPLETION_TOKEN.to_string(),
            create_prs: false,
            pr_draft: false,
            pr_base: None,
            agent_opts: agent::ExecOptions::default(),
        }
    }

    pub fn with_parallel(mut self, max_parallel: usize) -> Self {
        self.parallel = true;
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    pub fn with_validation(
        mut self,
        lint: Option<String>,
        test: Option<String>,
    ) -> Self {
        self.lint_command = lint;
        self.test_command = test;
        self
    }
}

/// Final tallies of a run, read back from the session store.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: Uuid,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
}

impl RunReport {
    fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id,
            completed: session.completed_tasks.clone(),
            failed: session.failed_tasks.clone(),
            pending: session.pending_tasks.clone(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }
}

#[derive(Clone)]
pub struct TaskExecutor {
    store: SessionStore,
    worktrees: Arc<dyn Worktrees>,
    engine: Arc<dyn AgentEngine>,
    hooks: HookRunner,
    events: Option<EventBus>,
    github: Option<Arc<GhCli>>,
    config: Arc<ExecutorConfig>,
}

impl TaskExecutor {
    pub fn new(
        store: SessionStore,
        worktrees: Arc<dyn Worktrees>,
        engine: Arc<dyn AgentEngine>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            worktrees,
            engine,
            hooks: HookRunner::default(),
            events: None,
            github: None,
            config: Arc::new(config),
        }
    }

    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_github(mut self, github: Arc<GhCli>) -> Self {
        self.github = Some(github);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Start a fresh run over the given tasks. Scheduling is validated
    /// before any session or side effect is created, so a cyclic or broken
    /// DAG leaves no trace on disk.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunReport> {
        let ordered_ids = self.scheduled_order(&tasks)?;

        self.hooks.before_phase(&self.phase_ctx("", "")).await?;

        let session = self
            .store
            .create(&self.config.project, &self.config.phase, ordered_ids)
            .await?;

        info!(
            session_id = %session.id,
            project = %self.config.project,
            phase = %self.config.phase,
            tasks = tasks.len(),
            parallel = self.config.parallel,
            "run started"
        );
        self.publish(Event::RunStarted {
            session_id: session.id,
            project: self.config.project.clone(),
            phase: self.config.phase.clone(),
            task_count: tasks.len(),
        });

        self.execute_waves(session.id, &tasks).await
    }

    /// Resume the active session (or an explicit one). Returns `None` when
    /// there is nothing to resume.
    pub async fn resume(
        &self,
        loader: &TaskLoader,
        session_id: Option<Uuid>,
    ) -> Result<Option<RunReport>> {
        let session = match session_id {
            Some(id) => self
                .store
                .get(id)
                .await?
                .ok_or_else(|| OrchestratorError::ExecutionFailed(format!(
                    "session {} not found",
                    id
                )))?,
            None => match self.store.get_active(&self.config.project).await? {
                Some(session) => session,
                None => return Ok(None),
            },
        };

        if !session.is_active() {
            return Ok(None);
        }

        if let Some(interrupted) = &session.current_task {
            info!(task_id = %interrupted, "resuming interrupted task");
            self.store.requeue_current(session.id).await?;
        }

        let session = self
            .store
            .get(session.id)
            .await?
            .ok_or(db::DbError::SessionNotFound(session.id))?;

        let pending: Vec<TaskId> = session
            .pending_tasks
            .iter()
            .filter_map(|id| match TaskId::parse(id) {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(task_id = %id, "malformed id in pending set, skipping");
                    None
                }
            })
            .collect();

        let tasks = loader.load_tasks_by_id(&pending).await?;
        let completed: HashSet<String> = session.completed_tasks.iter().cloned().collect();
        let runnable = resume_subset(tasks, &completed);

        if runnable.is_empty() {
            info!(session_id = %session.id, "no runnable pending tasks");
            return Ok(Some(RunReport::from_session(&session)));
        }

        // Hooks and events must see the phase the session was created with,
        // not whatever phase the resume caller happened to configure.
        let executor = self.for_phase(&session.phase);

        executor
            .hooks
            .before_phase(&executor.phase_ctx("", ""))
            .await?;
        executor.publish(Event::RunStarted {
            session_id: session.id,
            project: executor.config.project.clone(),
            phase: executor.config.phase.clone(),
            task_count: runnable.len(),
        });

        executor.execute_waves(session.id, &runnable).await.map(Some)
    }

    /// Clone of this executor retargeted at another phase. Every context the
    /// clone builds (hook env vars, events, new sessions) carries that phase.
    fn for_phase(&self, phase: &str) -> Self {
        if phase == self.config.phase {
            return self.clone();
        }
        let mut config = (*self.config).clone();
        config.phase = phase.to_string();
        let mut executor = self.clone();
        executor.config = Arc::new(config);
        executor
    }

    /// Scheduled pending order: wave order in parallel mode, topological
    /// order in sequential mode. Also the run's fail-fast validation.
    fn scheduled_order(&self, tasks: &[Task]) -> Result<Vec<String>> {
        if self.config.parallel {
            let waves = scheduler::build_execution_waves(tasks)?;
            Ok(waves
                .iter()
                .flatten()
                .map(|t| t.id.to_string())
                .collect())
        } else {
            let sorted = scheduler::topological_sort(tasks)?;
            Ok(sorted.iter().map(|t| t.id.to_string()).collect())
        }
    }

    async fn execute_waves(&self, session_id: Uuid, tasks: &[Task]) -> Result<RunReport> {
        let mut any_failed = false;

        if self.config.parallel {
            let waves = scheduler::build_execution_waves(tasks)?;
            for (index, wave) in waves.iter().enumerate() {
                self.publish(Event::WaveStarted {
                    session_id,
                    wave: index,
                    task_ids: wave.iter().map(|t| t.id.to_string()).collect(),
                });
                debug!(wave = index, tasks = wave.len(), "wave started");

                for chunk in wave.chunks(self.config.max_parallel.max(1)) {
                    let mut handles = Vec::new();
                    for task in chunk {
                        let executor = self.clone();
                        let task = task.clone();
                        handles.push(tokio::spawn(async move {
                            executor.run_task(session_id, &task).await
                        }));
                    }

                    // All-settled: one task's failure never cancels its
                    // peers; it only poisons the final on_success.
                    for joined in join_all(handles).await {
                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                any_failed = true;
                                error!(error = %e, "task failed");
                            }
                            Err(e) => {
                                any_failed = true;
                                error!(error = %e, "task panicked");
                            }
                        }
                    }
                }
            }
        } else {
            let order = scheduler::topological_sort(tasks)?;
            for task in &order {
                if let Err(e) = self.run_task(session_id, task).await {
                    error!(task_id = %task.id, error = %e, "task failed, aborting sequential run");
                    self.finish(session_id, true).await?;
                    return Err(e);
                }
            }
        }

        self.finish(session_id, any_failed).await
    }

    async fn finish(&self, session_id: Uuid, any_failed: bool) -> Result<RunReport> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(db::DbError::SessionNotFound(session_id))?;
        let report = RunReport::from_session(&session);

        if !any_failed && report.failed.is_empty() {
            self.hooks.on_success(&self.phase_ctx("", "")).await;
        }

        self.publish(Event::RunFinished {
            session_id,
            completed: report.completed.len(),
            failed: report.failed.len(),
        });
        info!(
            session_id = %session_id,
            completed = report.completed.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            "run finished"
        );
        Ok(report)
    }

    /// One task through the outer retry envelope: between attempts the
    /// worktree is removed and recreated; after the last failure the error
    /// is recorded and a failed checkpoint is emitted.
    async fn run_task(&self, session_id: Uuid, task: &Task) -> Result<()> {
        self.store.start_task(session_id, task.id.as_str()).await?;
        self.publish(Event::TaskStarted {
            session_id,
            task_id: task.id.to_string(),
        });
        info!(task_id = %task.id, name = %task.name, "task started");

        let started = Instant::now();

        if let Err(e) = self.hooks.before_task(&self.task_ctx(task, "", "")).await {
            let message = e.to_string();
            self.store
                .record_error(session_id, task.id.as_str(), &message)
                .await?;
            self.checkpoint_failed(session_id, task, message, started)
                .await?;
            return Err(e);
        }

        let mut last_error: Option<OrchestratorError> = None;
        for attempt in 0..=OUTER_RETRIES {
            if attempt > 0 {
                warn!(task_id = %task.id, attempt, "retrying task after failure");
                if let Err(e) = self.worktrees.remove(&task.id, true).await {
                    warn!(task_id = %task.id, error = %e, "worktree cleanup failed (ignored)");
                }
            }

            match self.run_pipeline(session_id, task, started).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let message = e.to_string();
                    warn!(task_id = %task.id, attempt, error = %message, "task attempt failed");
                    self.store
                        .record_error(session_id, task.id.as_str(), &message)
                        .await?;
                    last_error = Some(e);
                }
            }
        }

        let e = last_error.expect("at least one attempt ran");
        self.checkpoint_failed(session_id, task, e.to_string(), started)
            .await?;
        Err(e)
    }

    /// One attempt of the full pipeline. Ordering is load-bearing: all git
    /// effects happen before the completed checkpoint.
    async fn run_pipeline(
        &self,
        session_id: Uuid,
        task: &Task,
        started: Instant,
    ) -> Result<()> {
        let handle = self
            .worktrees
            .create(
                &task.id,
                &CreateOptions {
                    base_branch: self.config.base_branch.clone(),
                    slug: Some(slugify(&task.name)),
                },
            )
            .await?;
        self.store
            .register_worktree(session_id, task.id.as_str(), &handle.path.display().to_string())
            .await?;
        self.store
            .register_branch(session_id, task.id.as_str(), &handle.branch)
            .await?;
        self.publish(Event::WorktreeCreated {
            session_id,
            task_id: task.id.to_string(),
            path: handle.path.display().to_string(),
            branch: handle.branch.clone(),
        });

        let prompt = prompts::build_task_prompt(task, &self.config.completion_token);
        let opts = self
            .config
            .agent_opts
            .clone()
            .with_working_directory(handle.path.clone());

        let result = self.engine.execute(&prompt, &opts).await?;
        if !result.completed {
            return Err(OrchestratorError::AgentIncomplete {
                task_id: task.id.to_string(),
                reason: result.error.unwrap_or_else(|| {
                    format!("no completion token (exit {})", result.exit_code)
                }),
            });
        }

        if !self.config.fast {
            if let Err(failure) = validation::run_validation(
                &handle.path,
                self.config.lint_command.as_deref(),
                self.config.test_command.as_deref(),
            )
            .await
            {
                return Err(OrchestratorError::ValidationFailed {
                    task_id: task.id.to_string(),
                    reason: failure.to_string(),
                });
            }
        }

        if self.worktrees.has_uncommitted_changes(&task.id).await? {
            let message = format!(
                "{}: {}\n\n{}",
                task.id, task.name, self.config.commit_trailer
            );
            match self.worktrees.commit(&task.id, &message, true).await? {
                CommitOutcome::Committed(sha) => {
                    info!(task_id = %task.id, sha = %sha, "changes committed")
                }
                CommitOutcome::NothingToCommit => {
                    debug!(task_id = %task.id, "nothing to commit")
                }
            }
        }
        self.worktrees
            .push(&task.id, true, &self.config.remote)
            .await?;

        let pr_link = self.create_pr(session_id, task, &handle).await;

        let duration_ms = started.elapsed().as_millis() as i64;
        self.store
            .checkpoint(
                session_id,
                task.id.as_str(),
                CheckpointStatus::Completed,
                CheckpointExtras {
                    pr_link: pr_link.clone(),
                    duration_ms: Some(duration_ms),
                    error: None,
                },
            )
            .await?;
        self.store
            .resolve_error(session_id, task.id.as_str())
            .await?;

        self.publish(Event::TaskCompleted {
            session_id,
            task_id: task.id.to_string(),
            duration_ms,
        });
        info!(task_id = %task.id, duration_ms, "task completed");

        self.hooks
            .after_task(&self.task_ctx(task, "success", ""))
            .await;
        Ok(())
    }

    /// Fire-and-forget PR creation. Failures never fail the task; a
    /// duplicate PR from a retried push is tolerated.
    async fn create_pr(
        &self,
        session_id: Uuid,
        task: &Task,
        handle: &WorktreeHandle,
    ) -> Option<String> {
        if !self.config.create_prs {
            return None;
        }
        let github = self.github.as_ref()?;

        let spec = PrSpec {
            task_id: task.id.to_string(),
            task_name: task.name.clone(),
            summary: task.description.clone(),
            branch: handle.branch.clone(),
            base: self
                .config
                .pr_base
                .clone()
                .unwrap_or_else(|| self.config.base_branch.clone()),
            draft: self.config.pr_draft,
        };

        match github.open_pull_request(&spec).await {
            Ok(pr) => {
                if let Err(e) = self
                    .store
                    .register_pr(session_id, task.id.as_str(), &pr.html_url)
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "failed to register PR url");
                }
                self.publish(Event::PrCreated {
                    session_id,
                    task_id: task.id.to_string(),
                    url: pr.html_url.clone(),
                });
                Some(pr.html_url)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "PR creation failed (ignored)");
                None
            }
        }
    }

    async fn checkpoint_failed(
        &self,
        session_id: Uuid,
        task: &Task,
        message: String,
        started: Instant,
    ) -> Result<()> {
        self.store
            .checkpoint(
                session_id,
                task.id.as_str(),
                CheckpointStatus::Failed,
                CheckpointExtras {
                    pr_link: None,
                    duration_ms: Some(started.elapsed().as_millis() as i64),
                    error: Some(message.clone()),
                },
            )
            .await?;

        self.publish(Event::TaskFailed {
            session_id,
            task_id: task.id.to_string(),
            error: message.clone(),
        });
        self.hooks
            .on_error(&self.task_ctx(task, "error", &message))
            .await;
        Ok(())
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish(EventEnvelope::new(event));
        }
    }

    fn phase_ctx(&self, status: &str, error: &str) -> HookContext {
        HookContext {
            project: self.config.project.clone(),
            phase: self.config.phase.clone(),
            task_id: String::new(),
            task_name: String::new(),
            status: status.to_string(),
            error: error.to_string(),
        }
    }

    fn task_ctx(&self, task: &Task, status: &str, error: &str) -> HookContext {
        HookContext {
            project: self.config.project.clone(),
            phase: self.config.phase.clone(),
            task_id: task.id.to_string(),
            task_name: task.name.clone(),
            status: status.to_string(),
            error: error.to_string(),
        }
    }
}

/// Reduce the resume subset to tasks whose dependencies can still be
/// satisfied: completed dependencies are dropped (transitively satisfied),
/// while tasks depending on failed or vanished ids stay pending until the
/// user re-queues the failure.
fn resume_subset(tasks: Vec<Task>, completed: &HashSet<String>) -> Vec<Task> {
    let mut runnable = tasks;

    loop {
        let ids: HashSet<String> = runnable.iter().map(|t| t.id.to_string()).collect();
        let (keep, dropped): (Vec<Task>, Vec<Task>) = runnable.into_iter().partition(|task| {
            task.dependencies.iter().all(|dep| {
                completed.contains(dep.as_str()) || ids.contains(dep.as_str())
            })
        });

        if dropped.is_empty() {
            runnable = keep;
            break;
        }
        for task in &dropped {
            warn!(
                task_id = %task.id,
                "dependency failed or missing, task stays pending"
            );
        }
        runnable = keep;
    }

    for task in &mut runnable {
        task.dependencies
            .retain(|dep| !completed.contains(dep.as_str()));
    }
    runnable
}

/// Branch-name suffix derived from the task name.
fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    slug.chars().take(32).collect()
}
