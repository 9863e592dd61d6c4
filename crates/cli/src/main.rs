use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use atzentis_core::PhaseId;
use clap::{Parser, Subcommand};
use colored::Colorize;
use db::SessionStore;
use github::GhCli;
use orchestrator::{
    ExecutionPlan, ExecutorConfig, HookRunner, ProjectConfig, RunReport, TaskExecutor,
};
use specs::TaskLoader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use vcs::GitWorktrees;

#[derive(Parser)]
#[command(name = "atzentis")]
#[command(about = "Autonomous development orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute all tasks of a phase
    Run {
        /// Phase to run, e.g. p01
        #[arg(long)]
        phase: String,

        /// Run waves in parallel
        #[arg(long)]
        parallel: bool,

        /// Concurrent tasks per wave (implies --parallel)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Skip lint/test validation
        #[arg(long)]
        fast: bool,

        /// Print the execution plan without side effects
        #[arg(long)]
        dry_run: bool,
    },
    /// Resume the interrupted session
    Resume {
        /// Session id (defaults to the active session)
        session_id: Option<String>,
    },
    /// Show the active session
    Status,
    /// List all sessions for this project
    Sessions,
    /// Show the execution plan for a phase
    Plan {
        #[arg(long)]
        phase: String,
    },
    /// List the phases found under the specs root
    Phases,
    /// Remove worktrees no longer needed by the active session
    Clean,
    /// Delete a session and its checkpoints
    Delete {
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atzentis=info,orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    match cli.command {
        Commands::Run {
            phase,
            parallel,
            max_parallel,
            fast,
            dry_run,
        } => cmd_run(&root, &phase, parallel, max_parallel, fast, dry_run).await,
        Commands::Resume { session_id } => cmd_resume(&root, session_id).await,
        Commands::Status => cmd_status(&root).await,
        Commands::Sessions => cmd_sessions(&root).await,
        Commands::Plan { phase } => cmd_plan(&root, &phase).await,
        Commands::Phases => cmd_phases(&root).await,
        Commands::Clean => cmd_clean(&root).await,
        Commands::Delete { session_id } => cmd_delete(&root, &session_id).await,
    }
}

async fn cmd_run(
    root: &PathBuf,
    phase: &str,
    parallel: bool,
    max_parallel: Option<usize>,
    fast: bool,
    dry_run: bool,
) -> Result<()> {
    let phase = parse_phase(phase)?;
    let config = ProjectConfig::read(root).await;
    let loader = TaskLoader::new(root, &config.specs_root);

    let tasks = loader.load_tasks(&phase).await?;
    if tasks.is_empty() {
        bail!("no tasks found for phase {} under {}", phase, config.specs_root);
    }

    if dry_run {
        let plan = ExecutionPlan::build(&tasks)?;
        print_plan(&plan);
        return Ok(());
    }

    let executor = build_executor(root, &config, &phase, parallel, max_parallel, fast).await?;
    match executor.run(tasks).await {
        Ok(report) => {
            print_report(&report);
            if report.failed.is_empty() {
                Ok(())
            } else {
                suggest_resume();
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{} {}", "run failed:".red().bold(), e);
            suggest_resume();
            std::process::exit(1);
        }
    }
}

async fn cmd_resume(root: &PathBuf, session_id: Option<String>) -> Result<()> {
    if !db::store_exists(root) {
        bail!("no session store found at .atzentis/session.db; nothing to resume");
    }

    let session_id = session_id
        .map(|raw| Uuid::parse_str(&raw).context("invalid session id"))
        .transpose()?;

    let config = ProjectConfig::read(root).await;
    let loader = TaskLoader::new(root, &config.specs_root);
    // The executor retargets itself at the stored session's phase; this
    // placeholder never reaches hooks or events.
    let phase = PhaseId::parse("p00").expect("static phase id");
    let executor = build_executor(root, &config, &phase, false, None, false).await?;

    match executor.resume(&loader, session_id).await? {
        Some(report) => {
            print_report(&report);
            if !report.failed.is_empty() {
                suggest_resume();
                std::process::exit(1);
            }
        }
        None => println!("{}", "Nothing to resume: no active session.".green()),
    }
    Ok(())
}

async fn cmd_status(root: &PathBuf) -> Result<()> {
    let config = ProjectConfig::read(root).await;
    let store = open_store(root).await?;

    match store.get_active(&config.project).await? {
        Some(session) => {
            println!("{} {}", "session".bold(), session.id);
            println!("  phase:     {}", session.phase);
            println!("  started:   {}", session.started_at);
            if let Some(current) = &session.current_task {
                println!("  current:   {}", current.yellow());
            }
            println!("  pending:   {}", session.pending_tasks.len());
            println!("  completed: {}", session.completed_tasks.len());
            println!("  failed:    {}", session.failed_tasks.len());
        }
        None => println!("No active session for {}.", config.project),
    }
    Ok(())
}

async fn cmd_sessions(root: &PathBuf) -> Result<()> {
    let config = ProjectConfig::read(root).await;
    let store = open_store(root).await?;

    let sessions = store.list_all(&config.project).await?;
    if sessions.is_empty() {
        println!("No sessions for {}.", config.project);
        return Ok(());
    }

    for session in sessions {
        let state = if session.is_active() {
            "active".yellow()
        } else if session.failed_tasks.is_empty() {
            "completed".green()
        } else {
            "failed".red()
        };
        println!(
            "{}  {}  {}  {} done / {} failed / {} pending",
            session.id,
            session.phase,
            state,
            session.completed_tasks.len(),
            session.failed_tasks.len(),
            session.pending_tasks.len()
        );
    }
    Ok(())
}

async fn cmd_plan(root: &PathBuf, phase: &str) -> Result<()> {
    let phase = parse_phase(phase)?;
    let config = ProjectConfig::read(root).await;
    let loader = TaskLoader::new(root, &config.specs_root);

    let tasks = loader.load_tasks(&phase).await?;
    if tasks.is_empty() {
        bail!("no tasks found for phase {}", phase);
    }

    let plan = ExecutionPlan::build(&tasks)?;
    print_plan(&plan);
    Ok(())
}

async fn cmd_phases(root: &PathBuf) -> Result<()> {
    let config = ProjectConfig::read(root).await;
    let loader = TaskLoader::new(root, &config.specs_root);

    let phases = loader.list_phases().await?;
    if phases.is_empty() {
        println!("No phases under {}.", config.specs_root);
        return Ok(());
    }

    for phase in phases {
        let status = phase.status.unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<30}  {} tasks  [{}]",
            phase.id.to_string().bold(),
            phase.name,
            phase.task_count,
            status
        );
    }
    Ok(())
}

async fn cmd_clean(root: &PathBuf) -> Result<()> {
    use vcs::Worktrees;

    let config = ProjectConfig::read(root).await;
    let store = open_store(root).await?;
    let worktrees = GitWorktrees::new(
        root.clone(),
        root.join(&config.worktree_base),
        config.project.clone(),
    );

    // Worktrees of pending or in-flight tasks stay; everything else of this
    // project is reclaimable.
    let busy: std::collections::HashSet<String> = match store.get_active(&config.project).await? {
        Some(session) => session
            .pending_tasks
            .iter()
            .chain(session.current_task.iter())
            .cloned()
            .collect(),
        None => Default::default(),
    };

    let mut removed = 0;
    for handle in worktrees.list().await? {
        if busy.contains(handle.task_id.as_str()) {
            continue;
        }
        worktrees.remove(&handle.task_id, true).await?;
        println!("{} {}", "removed".dimmed(), handle.path.display());
        removed += 1;
    }
    println!("{} worktrees removed", removed);
    Ok(())
}

async fn cmd_delete(root: &PathBuf, session_id: &str) -> Result<()> {
    let session_id = Uuid::parse_str(session_id).context("invalid session id")?;
    let store = open_store(root).await?;

    if store.delete(session_id).await? {
        println!("Session {} deleted.", session_id);
    } else {
        bail!("session {} not found", session_id);
    }
    Ok(())
}

fn parse_phase(raw: &str) -> Result<PhaseId> {
    PhaseId::parse(raw).map_err(|e| anyhow::anyhow!("{e}"))
}

async fn open_store(root: &PathBuf) -> Result<SessionStore> {
    let pool = db::open_project_pool(root)
        .await
        .context("cannot open session store")?;
    db::run_migrations(&pool)
        .await
        .context("cannot migrate session store")?;
    Ok(SessionStore::new(pool))
}

async fn build_executor(
    root: &PathBuf,
    config: &ProjectConfig,
    phase: &PhaseId,
    parallel: bool,
    max_parallel: Option<usize>,
    fast: bool,
) -> Result<TaskExecutor> {
    let store = open_store(root).await?;

    let worktree_base = root.join(&config.worktree_base);
    let worktrees = Arc::new(GitWorktrees::new(
        root.clone(),
        worktree_base,
        config.project.clone(),
    ));

    let registry = agent::EngineRegistry::with_known_variants(config.subprocess_config());
    let engine = registry
        .get(&config.agent.command)
        .context("agent engine not registered")?;

    let mut exec_config = ExecutorConfig::new(config.project.clone(), phase.to_string());
    exec_config.base_branch = config.base_branch.clone();
    exec_config.remote = config.remote.clone();
    exec_config.lint_command = config.commands.lint.clone();
    exec_config.test_command = config.commands.test.clone();
    exec_config.commit_trailer = config.commit_trailer.clone();
    exec_config.completion_token = config.agent.completion_token.clone();
    exec_config.fast = fast;
    exec_config.create_prs = config.pr.enabled;
    exec_config.pr_draft = config.pr.draft;
    exec_config.pr_base = config.pr.base.clone();
    exec_config.agent_opts = config.agent_exec_options();
    if parallel || max_parallel.is_some() {
        exec_config.parallel = true;
        exec_config.max_parallel = max_parallel.unwrap_or(config.max_parallel).max(1);
    }

    let mut executor = TaskExecutor::new(store, worktrees, engine, exec_config)
        .with_hooks(HookRunner::new(config.hooks.clone()));

    if config.pr.enabled {
        match GhCli::detect(root).await {
            Some(gh) => executor = executor.with_github(Arc::new(gh)),
            None => eprintln!(
                "{}",
                "gh CLI unavailable, pull requests will be skipped".yellow()
            ),
        }
    }

    Ok(executor)
}

fn suggest_resume() {
    eprintln!(
        "{}",
        "Run `atzentis resume` to continue from the last checkpoint.".yellow()
    );
}

fn print_report(report: &RunReport) {
    for id in &report.completed {
        println!("{} {}", "✓".green(), id);
    }
    for id in &report.failed {
        println!("{} {}", "✗".red(), id);
    }
    for id in &report.pending {
        println!("{} {} (pending)", "·".dimmed(), id);
    }
    println!(
        "\n{} completed, {} failed, {} pending",
        report.completed.len(),
        report.failed.len(),
        report.pending.len()
    );
}

fn print_plan(plan: &ExecutionPlan) {
    println!(
        "{} tasks in {} waves, estimated {}",
        plan.task_count,
        plan.waves.len(),
        plan.total_estimate()
    );
    for wave in &plan.waves {
        println!(
            "\n{} {} ({}h)",
            "wave".bold(),
            wave.index + 1,
            wave.estimate_hours
        );
        for task in &wave.tasks {
            let deps = if task.dependencies.is_empty() {
                String::new()
            } else {
                format!("  after {}", task.dependencies.join(", ")).dimmed().to_string()
            };
            println!(
                "  {} [{}] {} ({}h){}",
                task.id, task.priority, task.name, task.estimate_hours, deps
            );
        }
    }
}
