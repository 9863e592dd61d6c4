//! End-to-end executor scenarios: a scripted shell agent, filesystem-backed
//! fake worktrees and a real session store on disk.

use std::path::PathBuf;
use std::sync::Arc;

use agent::{AgentEngine, SubprocessAgent, SubprocessConfig, DEFAULT_COMPLETION_TOKEN};
use async_trait::async_trait;
use atzentis_core::{CheckpointStatus, PhaseId, Task, TaskId};
use db::{create_pool, run_migrations, SessionStore};
use events::{Event, EventBus};
use orchestrator::{build_execution_waves, ExecutorConfig, OrchestratorError, TaskExecutor};
use specs::TaskLoader;
use tempfile::TempDir;
use vcs::{CommitOutcome, CreateOptions, Result as VcsResult, WorktreeHandle, Worktrees};

/// Worktree manager double: real directories, no git.
struct FakeWorktrees {
    base: PathBuf,
    project: String,
}

impl FakeWorktrees {
    fn new(base: PathBuf, project: &str) -> Self {
        Self {
            base,
            project: project.to_string(),
        }
    }

    fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.base.join(&self.project).join(task_id.path_segment())
    }
}

#[async_trait]
impl Worktrees for FakeWorktrees {
    async fn create(&self, task_id: &TaskId, opts: &CreateOptions) -> VcsResult<WorktreeHandle> {
        let path = self.path_for(task_id);
        tokio::fs::create_dir_all(&path).await?;
        let mut branch = format!("{}/{}", self.project, task_id).to_lowercase();
        if let Some(slug) = &opts.slug {
            if !slug.is_empty() {
                branch.push('-');
                branch.push_str(slug);
            }
        }
        Ok(WorktreeHandle::new(task_id.clone(), path, branch))
    }

    async fn remove(&self, task_id: &TaskId, _force: bool) -> VcsResult<()> {
        let path = self.path_for(task_id);
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }
        Ok(())
    }

    async fn commit(
        &self,
        _task_id: &TaskId,
        _message: &str,
        _add_all: bool,
    ) -> VcsResult<CommitOutcome> {
        Ok(CommitOutcome::NothingToCommit)
    }

    async fn push(&self, _task_id: &TaskId, _set_upstream: bool, _remote: &str) -> VcsResult<()> {
        Ok(())
    }

    async fn has_uncommitted_changes(&self, _task_id: &TaskId) -> VcsResult<bool> {
        Ok(false)
    }

    async fn changed_files(&self, _task_id: &TaskId) -> VcsResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn diff(&self, _task_id: &TaskId, _staged: bool) -> VcsResult<String> {
        Ok(String::new())
    }
}

fn sh_engine(script: &str) -> Arc<dyn AgentEngine> {
    Arc::new(SubprocessAgent::new(
        "sh",
        SubprocessConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            prompt_via_stdin: false,
            completion_token: DEFAULT_COMPLETION_TOKEN.to_string(),
        },
    ))
}

fn completing_engine() -> Arc<dyn AgentEngine> {
    sh_engine("echo '<promise>COMPLETE</promise>'")
}

fn task(id: &str, deps: &[&str]) -> Task {
    Task::minimal(
        TaskId::parse(id).unwrap(),
        format!("task {}", id),
        PhaseId::parse("p00").unwrap(),
    )
    .with_dependencies(deps.iter().map(|d| TaskId::parse(d).unwrap()).collect())
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    store: SessionStore,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let url = format!("sqlite://{}", root.join("session.db").display());
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Self {
            _dir: dir,
            root,
            store: SessionStore::new(pool),
        }
    }

    fn executor(&self, engine: Arc<dyn AgentEngine>, config: ExecutorConfig) -> TaskExecutor {
        let worktrees = Arc::new(FakeWorktrees::new(self.root.join("worktrees"), "demo"));
        TaskExecutor::new(self.store.clone(), worktrees, engine, config)
    }
}

fn config() -> ExecutorConfig {
    ExecutorConfig::new("demo", "p00")
}

/// Scenario 1: linear three-task phase, sequential run.
#[tokio::test]
async fn linear_phase_completes_every_task() {
    let harness = Harness::new().await;
    let tasks = vec![
        task("T00-001", &[]),
        task("T00-002", &["T00-001"]),
        task("T00-003", &["T00-002"]),
    ];

    let waves = build_execution_waves(&tasks).unwrap();
    assert_eq!(waves.len(), 3);
    assert!(waves.iter().all(|w| w.len() == 1));

    let executor = harness.executor(completing_engine(), config());
    let report = executor.run(tasks).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.completed, vec!["T00-001", "T00-002", "T00-003"]);

    let session = harness.store.get(report.session_id).await.unwrap().unwrap();
    assert!(session.pending_tasks.is_empty());
    assert!(session.current_task.is_none());
    assert_eq!(session.branches.len(), 3);

    let checkpoints = harness.store.checkpoints(report.session_id).await.unwrap();
    assert_eq!(checkpoints.len(), 3);
    assert!(checkpoints
        .iter()
        .all(|c| c.status == CheckpointStatus::Completed));
}

/// Scenario 2: parallel fan-out with maxParallel = 2.
#[tokio::test]
async fn parallel_fan_out_completes_both_branches() {
    let harness = Harness::new().await;
    let tasks = vec![
        task("T00-001", &[]),
        task("T00-002", &["T00-001"]),
        task("T00-003", &["T00-001"]),
    ];

    let waves = build_execution_waves(&tasks).unwrap();
    assert_eq!(waves.len(), 2);
    assert_eq!(waves[1].len(), 2);

    let executor = harness.executor(completing_engine(), config().with_parallel(2));
    let report = executor.run(tasks).await.unwrap();

    assert!(report.all_succeeded());
    let mut completed = report.completed.clone();
    completed.sort();
    assert_eq!(completed, vec!["T00-001", "T00-002", "T00-003"]);
}

/// Scenario 3: a cyclic DAG fails before any session is created.
#[tokio::test]
async fn cycle_is_rejected_without_creating_a_session() {
    let harness = Harness::new().await;
    let tasks = vec![task("T00-001", &["T00-002"]), task("T00-002", &["T00-001"])];

    let executor = harness.executor(completing_engine(), config());
    let err = executor.run(tasks).await.unwrap_err();

    match err {
        OrchestratorError::CircularDependency { path } => {
            assert!(path.contains(&"T00-001".to_string()));
            assert!(path.contains(&"T00-002".to_string()));
        }
        other => panic!("expected CircularDependency, got {other}"),
    }

    assert!(harness.store.list_all("demo").await.unwrap().is_empty());
}

/// Scenario 4: crash between task start and checkpoint, then resume.
#[tokio::test]
async fn crash_mid_task_resumes_from_interrupted_task() {
    let harness = Harness::new().await;

    // Task records on disk for the resume loader.
    for (dir, deps) in [("T00-001-first", ""), ("T00-002-second", "[T00-001]")] {
        let path = harness.root.join("specs/P00-test").join(dir);
        tokio::fs::create_dir_all(&path).await.unwrap();
        tokio::fs::write(
            path.join("task.md"),
            format!("---\nname: {}\ndependencies: {}\n---\n", dir, deps),
        )
        .await
        .unwrap();
    }

    // Simulated crash: T00-001 checkpointed, T00-002 started but never
    // checkpointed.
    let session = harness
        .store
        .create("demo", "p00", vec!["T00-001".to_string(), "T00-002".to_string()])
        .await
        .unwrap();
    harness.store.start_task(session.id, "T00-001").await.unwrap();
    harness
        .store
        .checkpoint(
            session.id,
            "T00-001",
            CheckpointStatus::Completed,
            Default::default(),
        )
        .await
        .unwrap();
    harness.store.start_task(session.id, "T00-002").await.unwrap();

    let crashed = harness.store.get(session.id).await.unwrap().unwrap();
    assert_eq!(crashed.current_task.as_deref(), Some("T00-002"));
    assert_eq!(crashed.completed_tasks, vec!["T00-001"]);
    assert!(crashed.pending_tasks.is_empty());

    let loader = TaskLoader::new(&harness.root, "specs");
    let executor = harness.executor(completing_engine(), config());
    let report = executor.resume(&loader, None).await.unwrap().unwrap();

    let mut completed = report.completed.clone();
    completed.sort();
    assert_eq!(completed, vec!["T00-001", "T00-002"]);

    let after = harness.store.get(session.id).await.unwrap().unwrap();
    assert!(after.current_task.is_none());
    assert!(after.pending_tasks.is_empty());
}

/// Resume carries the stored session's phase into hooks and events, even
/// when the resume-time executor was configured with a different phase.
#[tokio::test]
async fn resume_uses_the_stored_sessions_phase() {
    let harness = Harness::new().await;

    let task_dir = harness.root.join("specs/P07-later/T07-001-only");
    tokio::fs::create_dir_all(&task_dir).await.unwrap();
    tokio::fs::write(task_dir.join("task.md"), "---\nname: only\n---\n")
        .await
        .unwrap();

    let session = harness
        .store
        .create("demo", "p07", vec!["T07-001".to_string()])
        .await
        .unwrap();

    let hook_out = harness.root.join("phase.out");
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    // The executor itself is (wrongly) configured for p00.
    let executor = harness
        .executor(completing_engine(), config())
        .with_hooks(orchestrator::HookRunner::new(orchestrator::HooksConfig {
            before_phase: Some(format!("echo \"$ATZENTIS_PHASE\" > {}", hook_out.display())),
            ..Default::default()
        }))
        .with_event_bus(bus);

    let loader = TaskLoader::new(&harness.root, "specs");
    let report = executor
        .resume(&loader, Some(session.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.completed, vec!["T07-001"]);

    let seen = tokio::fs::read_to_string(&hook_out).await.unwrap();
    assert_eq!(seen.trim(), "p07");

    let mut started_phase = None;
    while let Ok(envelope) = rx.try_recv() {
        if let Event::RunStarted { phase, .. } = envelope.event {
            started_phase = Some(phase);
        }
    }
    assert_eq!(started_phase.as_deref(), Some("p07"));
}

/// Resume never re-queues failed tasks, and a pending task behind a failed
/// dependency stays pending until the user intervenes.
#[tokio::test]
async fn resume_leaves_dependents_of_failed_tasks_pending() {
    let harness = Harness::new().await;

    let path = harness.root.join("specs/P00-test/T00-002-blocked");
    tokio::fs::create_dir_all(&path).await.unwrap();
    tokio::fs::write(
        path.join("task.md"),
        "---\nname: blocked\ndependencies: [T00-001]\n---\n",
    )
    .await
    .unwrap();

    let session = harness
        .store
        .create("demo", "p00", vec!["T00-001".to_string(), "T00-002".to_string()])
        .await
        .unwrap();
    harness.store.start_task(session.id, "T00-001").await.unwrap();
    harness
        .store
        .checkpoint(
            session.id,
            "T00-001",
            CheckpointStatus::Failed,
            Default::default(),
        )
        .await
        .unwrap();

    let loader = TaskLoader::new(&harness.root, "specs");
    let executor = harness.executor(completing_engine(), config());
    let report = executor.resume(&loader, None).await.unwrap().unwrap();

    // Nothing ran: T00-002's dependency failed and failed tasks are not
    // promoted to satisfied.
    assert_eq!(report.failed, vec!["T00-001"]);
    assert_eq!(report.pending, vec!["T00-002"]);
    assert!(report.completed.is_empty());
}

/// A failing before_task hook aborts the task before the agent ever runs.
#[tokio::test]
async fn before_task_hook_failure_fails_the_task_without_agent_run() {
    let harness = Harness::new().await;
    let marker = harness.root.join("agent-ran");
    let engine = sh_engine(&format!(
        "touch {}; echo '<promise>COMPLETE</promise>'",
        marker.display()
    ));

    let executor = harness.executor(engine, config()).with_hooks(
        orchestrator::HookRunner::new(orchestrator::HooksConfig {
            before_task: Some("exit 1".to_string()),
            ..Default::default()
        }),
    );

    let err = executor.run(vec![task("T00-001", &[])]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::HookFailed { .. }));
    assert!(!marker.exists());

    let all = harness.store.list_all("demo").await.unwrap();
    let session = &all[0];
    assert_eq!(session.failed_tasks, vec!["T00-001"]);
    assert_eq!(session.errors["T00-001"].iterations, 1);
}

/// Resuming with no active session reports nothing to do.
#[tokio::test]
async fn resume_without_active_session_returns_none() {
    let harness = Harness::new().await;
    let loader = TaskLoader::new(&harness.root, "specs");
    let executor = harness.executor(completing_engine(), config());

    assert!(executor.resume(&loader, None).await.unwrap().is_none());
}

/// Scenario 5: the engine's inner retry envelope absorbs two failures; the
/// outer envelope never fires.
#[tokio::test]
async fn engine_retries_internally_before_completing() {
    let harness = Harness::new().await;
    // Fails twice, completes on the third attempt. The counter lives in the
    // worktree, which survives inner retries.
    let engine = sh_engine(
        "n=$(cat n 2>/dev/null || echo 0); n=$((n+1)); echo $n > n; \
         if [ \"$n\" -ge 3 ]; then echo '<promise>COMPLETE</promise>'; else exit 1; fi",
    );

    let executor = harness.executor(engine, config());
    let report = executor.run(vec![task("T00-001", &[])]).await.unwrap();

    assert_eq!(report.completed, vec!["T00-001"]);

    let session = harness.store.get(report.session_id).await.unwrap().unwrap();
    // Outer envelope untouched: no error record was ever written.
    assert!(session.errors.is_empty());

    let attempts = tokio::fs::read_to_string(
        harness.root.join("worktrees/demo/00-001/n"),
    )
    .await
    .unwrap();
    assert_eq!(attempts.trim(), "3");
}

/// Scenario 6: agent completes but validation fails; the outer envelope
/// retries twice, then the task fails with three recorded iterations.
#[tokio::test]
async fn validation_failure_exhausts_outer_retries() {
    let harness = Harness::new().await;
    let mut config = config().with_validation(None, Some("exit 1".to_string()));
    config.agent_opts = config.agent_opts.with_max_retries(0);

    let executor = harness.executor(completing_engine(), config);
    let err = executor.run(vec![task("T00-001", &[])]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationFailed { .. }));

    let session = harness
        .store
        .get_active("demo")
        .await
        .unwrap();
    assert!(session.is_none());

    let all = harness.store.list_all("demo").await.unwrap();
    let session = &all[0];
    assert_eq!(session.failed_tasks, vec!["T00-001"]);
    assert_eq!(session.errors["T00-001"].iterations, 3);
    assert!(!session.errors["T00-001"].resolved);

    let checkpoints = harness.store.checkpoints(session.id).await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].status, CheckpointStatus::Failed);
    assert!(checkpoints[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Validation failed"));
}

/// Lifecycle events stream to subscribers in order.
#[tokio::test]
async fn run_publishes_lifecycle_events() {
    let harness = Harness::new().await;
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    let executor = harness
        .executor(completing_engine(), config())
        .with_event_bus(bus);
    executor.run(vec![task("T00-001", &[])]).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        kinds.push(match envelope.event {
            Event::RunStarted { .. } => "run.started",
            Event::TaskStarted { .. } => "task.started",
            Event::WorktreeCreated { .. } => "worktree.created",
            Event::TaskCompleted { .. } => "task.completed",
            Event::RunFinished { .. } => "run.finished",
            _ => "other",
        });
    }

    assert_eq!(
        kinds,
        vec![
            "run.started",
            "task.started",
            "worktree.created",
            "task.completed",
            "run.finished"
        ]
    );
}

/// Parallel mode keeps going after a failure; the report carries both
/// outcomes.
#[tokio::test]
async fn parallel_wave_survives_one_failure() {
    let harness = Harness::new().await;
    // T00-001 fails (marker file keyed by worktree), T00-002 completes.
    let engine = sh_engine(
        "case \"$PWD\" in *00-001*) exit 1;; *) echo '<promise>COMPLETE</promise>';; esac",
    );

    let mut config = config().with_parallel(2).with_fast(true);
    config.agent_opts = config.agent_opts.with_max_retries(0);

    let executor = harness.executor(engine, config);
    let report = executor
        .run(vec![task("T00-001", &[]), task("T00-002", &[])])
        .await
        .unwrap();

    assert_eq!(report.completed, vec!["T00-002"]);
    assert_eq!(report.failed, vec!["T00-001"]);
}
