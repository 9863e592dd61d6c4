//! Task loading: phase directories in, typed [`Task`] records out.
//!
//! Per-task files are authored narratively and parse best-effort; the phase
//! metadata ledger is maintained by planning tools and is the ground truth
//! for execution, so its fields overlay whatever the task files claim.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use atzentis_core::{Estimate, PhaseId, Priority, Task, TaskId, TaskStatus};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fields::Fields;
use crate::frontmatter;
use crate::metadata::{PhaseMetadata, TaskEntry, METADATA_FILE};

const TASK_JSON: &str = "task.json";
const TASK_MD: &str = "task.md";

pub struct TaskLoader {
    specs_root: PathBuf,
}

impl TaskLoader {
    /// `specs_root` is resolved against `cwd`; the conventional layout is
    /// `<cwd>/specs/P<PP>-<slug>/T<PP>-<NNN>-<slug>/`.
    pub fn new(cwd: &Path, specs_root: impl AsRef<Path>) -> Self {
        Self {
            specs_root: cwd.join(specs_root.as_ref()),
        }
    }

    pub fn specs_root(&self) -> &Path {
        &self.specs_root
    }

    /// All tasks of a phase, ascending by id. A missing phase directory is
    /// an empty load, not an error.
    pub async fn load_tasks(&self, phase: &PhaseId) -> Result<Vec<Task>> {
        let Some(phase_dir) = self.find_phase_dir(phase).await? else {
            debug!(phase = %phase, root = %self.specs_root.display(), "phase directory not found");
            return Ok(Vec::new());
        };

        let metadata = read_metadata(&phase_dir).await;
        let index: BTreeMap<String, TaskEntry> = metadata
            .map(|m| {
                m.tasks
                    .into_iter()
                    .map(|entry| (entry.id.clone(), entry))
                    .collect()
            })
            .unwrap_or_default();

        let task_dir_re = task_dir_regex();
        let mut tasks = Vec::new();

        let mut entries = tokio::fs::read_dir(&phase_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = task_dir_re.captures(&dir_name) else {
                continue;
            };
            if caps.get(1).map(|m| m.as_str()) != Some(phase.digits()) {
                continue;
            }

            let id_str = format!(
                "T{}-{}",
                caps.get(1).unwrap().as_str(),
                caps.get(2).unwrap().as_str()
            );
            let Ok(task_id) = TaskId::parse(&id_str) else {
                continue;
            };
            let slug = caps.get(3).map(|m| m.as_str().to_string());

            let mut task = load_task_dir(&entry.path(), task_id, slug, phase).await;
            if let Some(entry) = index.get(task.id.as_str()) {
                overlay_metadata(&mut task, entry);
            }
            tasks.push(task);
        }

        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    /// Single task by id, or `None` when its directory does not exist.
    pub async fn load_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let phase = PhaseId::parse(&format!("p{:02}", task_id.phase_number()))
            .expect("task id phase component is two digits");

        let tasks = self.load_tasks(&phase).await?;
        Ok(tasks.into_iter().find(|task| &task.id == task_id))
    }

    /// Records for an explicit id set (the resume path), ascending by id.
    /// Ids whose directories vanished are skipped with a warning.
    pub async fn load_tasks_by_id(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        let mut phases: BTreeMap<u8, Vec<&TaskId>> = BTreeMap::new();
        for id in ids {
            phases.entry(id.phase_number()).or_default().push(id);
        }

        let mut tasks = Vec::new();
        for (phase_number, wanted) in phases {
            let phase = PhaseId::parse(&format!("p{:02}", phase_number))
                .expect("phase number fits two digits");
            let loaded = self.load_tasks(&phase).await?;
            for id in wanted {
                match loaded.iter().find(|task| &task.id == id) {
                    Some(task) => tasks.push(task.clone()),
                    None => warn!(task_id = %id, "task no longer on disk, skipping"),
                }
            }
        }

        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn find_phase_dir(&self, phase: &PhaseId) -> Result<Option<PathBuf>> {
        if !self.specs_root.exists() {
            return Ok(None);
        }

        let re = Regex::new(r"^P(\d{2})-").expect("static regex");
        let mut entries = tokio::fs::read_dir(&self.specs_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(caps) = re.captures(&name) {
                if caps.get(1).map(|m| m.as_str()) == Some(phase.digits()) {
                    return Ok(Some(entry.path()));
                }
            }
        }
        Ok(None)
    }
}

fn task_dir_regex() -> Regex {
    Regex::new(r"^T(\d{2})-(\d{3})(?:-(.+))?$").expect("static regex")
}

async fn read_metadata(phase_dir: &Path) -> Option<PhaseMetadata> {
    let path = phase_dir.join(METADATA_FILE);
    if !path.exists() {
        return None;
    }

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read phase metadata");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed phase metadata, skipping overlay");
            None
        }
    }
}

/// Load one task directory. Never fails: an unreadable or unparseable
/// descriptor degrades to a minimal record derived from the directory name.
async fn load_task_dir(dir: &Path, task_id: TaskId, slug: Option<String>, phase: &PhaseId) -> Task {
    let fallback_name = slug
        .map(|s| s.replace('-', " "))
        .unwrap_or_else(|| task_id.to_string());

    let fields = read_descriptor(dir).await;
    let mut task = Task::minimal(task_id, fallback_name, phase.clone());

    let Some(fields) = fields else {
        return task;
    };

    if let Some(name) = fields.text_any(&["name", "title"]) {
        task.name = name;
    }
    task.description = fields.text("description");
    if let Some(status) = fields.text("status").and_then(|s| TaskStatus::parse(&s)) {
        task.status = status;
    }
    if let Some(group) = fields.number("parallel_group") {
        task.parallel_group = (group as u32).max(1);
    }
    if let Some(deps) = fields.list_any(&["dependencies", "deps"]) {
        task.dependencies = parse_dependencies(&task.id, &deps);
    }
    if let Some(files) = fields.list("files") {
        task.files = files;
    }
    if let Some(criteria) = fields.list("acceptance_criteria") {
        task.acceptance_criteria = criteria;
    }
    if let Some(estimate) = parse_estimate(&fields) {
        task.estimate = estimate;
    }
    if let Some(priority) = fields.text("priority").and_then(|p| Priority::parse(&p)) {
        task.priority = priority;
    }
    if let Some(requirements) = fields.list("requirements") {
        task.requirements = requirements;
    }
    if let Some(rules) = fields.list("business_rules") {
        task.business_rules = rules;
    }
    if let Some(testing) = fields.list("testing_requirements") {
        task.testing_requirements = testing;
    }
    if let Some(skills) = fields.list("skills") {
        task.skills = skills;
    }

    task
}

/// Structured descriptor wins over front-matter; anything unparseable is a
/// warning, not a failure.
async fn read_descriptor(dir: &Path) -> Option<Fields> {
    let json_path = dir.join(TASK_JSON);
    if json_path.exists() {
        match tokio::fs::read_to_string(&json_path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => {
                    let fields = Fields::from_json(&value);
                    if !fields.is_empty() {
                        return Some(fields);
                    }
                }
                Err(e) => {
                    warn!(path = %json_path.display(), error = %e, "malformed task.json, degrading");
                }
            },
            Err(e) => warn!(path = %json_path.display(), error = %e, "cannot read task.json"),
        }
    }

    let md_path = dir.join(TASK_MD);
    if md_path.exists() {
        match tokio::fs::read_to_string(&md_path).await {
            Ok(content) => return frontmatter::parse(&content),
            Err(e) => warn!(path = %md_path.display(), error = %e, "cannot read task.md"),
        }
    }

    None
}

fn parse_dependencies(task_id: &TaskId, raw: &[String]) -> Vec<TaskId> {
    raw.iter()
        .filter_map(|dep| match TaskId::parse(dep) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(task_id = %task_id, dep = %dep, "skipping malformed dependency id");
                None
            }
        })
        .collect()
}

fn parse_estimate(fields: &Fields) -> Option<Estimate> {
    if let Some(text) = fields.text("estimate") {
        if let Ok(estimate) = Estimate::parse(&text) {
            return Some(estimate);
        }
    }
    fields.number("estimate").map(Estimate::from_hours)
}

/// The metadata ledger is authoritative: dependencies, estimate, priority
/// and status replace whatever the task file declared.
fn overlay_metadata(task: &mut Task, entry: &TaskEntry) {
    task.dependencies = parse_dependencies(&task.id, &entry.dependencies);

    if let Some(hours) = entry.estimate {
        task.estimate = Estimate::from_hours(hours);
    }
    if let Some(priority) = entry.priority.as_deref().and_then(Priority::parse) {
        task.priority = priority;
    }
    if let Some(status) = entry.status.as_deref().and_then(TaskStatus::parse_metadata) {
        task.status = status;
    }
    if task.name == task.id.as_str() {
        if let Some(name) = entry.name.clone().or_else(|| entry.title.clone()) {
            task.name = name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    fn phase(s: &str) -> PhaseId {
        PhaseId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_missing_phase_dir_loads_empty() {
        let dir = TempDir::new().unwrap();
        let loader = TaskLoader::new(dir.path(), "specs");

        let tasks = loader.load_tasks(&phase("p01")).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_front_matter_descriptor_loaded() {
        let dir = TempDir::new().unwrap();
        let task_md = dir
            .path()
            .join("specs/P01-foundation/T01-001-scaffold/task.md");
        write(
            &task_md,
            r#"---
name: Project scaffolding
description: Set up the workspace
estimate: 4h
priority: P1
files:
  - Cargo.toml
acceptance_criteria:
  - workspace builds
skills: [rust]
---
Narrative body.
"#,
        )
        .await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let tasks = loader.load_tasks(&phase("p01")).await.unwrap();

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.id.as_str(), "T01-001");
        assert_eq!(task.name, "Project scaffolding");
        assert_eq!(task.description.as_deref(), Some("Set up the workspace"));
        assert_eq!(task.estimate.hours(), 4.0);
        assert_eq!(task.priority, Priority::P1);
        assert_eq!(task.files, vec!["Cargo.toml"]);
        assert_eq!(task.skills, vec!["rust"]);
    }

    #[tokio::test]
    async fn test_task_json_preferred_over_markdown() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("specs/P01-foundation/T01-001-scaffold");
        write(
            &base.join("task.json"),
            r#"{"name": "From JSON", "estimate": 2, "parallelGroup": 3}"#,
        )
        .await;
        write(&base.join("task.md"), "---\nname: From markdown\n---\n").await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let tasks = loader.load_tasks(&phase("p01")).await.unwrap();

        assert_eq!(tasks[0].name, "From JSON");
        assert_eq!(tasks[0].estimate.hours(), 2.0);
        assert_eq!(tasks[0].parallel_group, 3);
    }

    #[tokio::test]
    async fn test_malformed_descriptor_degrades_to_minimal() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("specs/P01-foundation/T01-002-session-store");
        write(&base.join("task.json"), "{ not valid json").await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let tasks = loader.load_tasks(&phase("p01")).await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_str(), "T01-002");
        assert_eq!(tasks[0].name, "session store");
        assert_eq!(tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_metadata_overlay_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let phase_dir = dir.path().join("specs/P01-foundation");
        write(
            &phase_dir.join("T01-001-scaffold/task.md"),
            r#"---
name: Scaffold
estimate: 1h
priority: P3
dependencies: []
---
"#,
        )
        .await;
        write(
            &phase_dir.join("T01-002-store/task.md"),
            "---\nname: Store\n---\n",
        )
        .await;
        write(
            &phase_dir.join(METADATA_FILE),
            r#"{
                "phase": "p01",
                "phaseNumber": 1,
                "phaseName": "Foundation",
                "tasks": [
                    {"id": "T01-001", "estimate": 6, "priority": "P0", "status": "in_progress", "dependencies": []},
                    {"id": "T01-002", "estimate": 8, "priority": "P1", "status": "not_started", "dependencies": ["T01-001"]}
                ]
            }"#,
        )
        .await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let tasks = loader.load_tasks(&phase("p01")).await.unwrap();

        let first = &tasks[0];
        assert_eq!(first.estimate.hours(), 6.0);
        assert_eq!(first.priority, Priority::P0);
        assert_eq!(first.status, TaskStatus::InProgress);

        let second = &tasks[1];
        assert_eq!(second.dependencies.len(), 1);
        assert_eq!(second.dependencies[0].as_str(), "T01-001");
        assert_eq!(second.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_malformed_metadata_skips_overlay() {
        let dir = TempDir::new().unwrap();
        let phase_dir = dir.path().join("specs/P01-foundation");
        write(
            &phase_dir.join("T01-001-scaffold/task.md"),
            "---\nname: Scaffold\npriority: P3\n---\n",
        )
        .await;
        write(&phase_dir.join(METADATA_FILE), "{ broken").await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let tasks = loader.load_tasks(&phase("p01")).await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, Priority::P3);
    }

    #[tokio::test]
    async fn test_tasks_sorted_ascending_by_id() {
        let dir = TempDir::new().unwrap();
        let phase_dir = dir.path().join("specs/P02-build");
        for ordinal in ["003", "001", "002"] {
            write(
                &phase_dir.join(format!("T02-{ordinal}-t/task.md")),
                "---\nname: t\n---\n",
            )
            .await;
        }

        let loader = TaskLoader::new(dir.path(), "specs");
        let tasks = loader.load_tasks(&phase("P02")).await.unwrap();

        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T02-001", "T02-002", "T02-003"]);
    }

    #[tokio::test]
    async fn test_load_single_task() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("specs/P01-foundation/T01-001-scaffold/task.md"),
            "---\nname: Scaffold\n---\n",
        )
        .await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let found = loader
            .load_task(&TaskId::parse("T01-001").unwrap())
            .await
            .unwrap();
        assert_eq!(found.unwrap().name, "Scaffold");

        let missing = loader
            .load_task(&TaskId::parse("T01-009").unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_load_tasks_by_id_spans_phases() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("specs/P01-a/T01-001-one/task.md"),
            "---\nname: one\n---\n",
        )
        .await;
        write(
            &dir.path().join("specs/P02-b/T02-001-two/task.md"),
            "---\nname: two\n---\n",
        )
        .await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let ids = vec![
            TaskId::parse("T02-001").unwrap(),
            TaskId::parse("T01-001").unwrap(),
        ];
        let tasks = loader.load_tasks_by_id(&ids).await.unwrap();

        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }
}
