//! Phase directory discovery, independent of a single phase's task load.

use std::path::PathBuf;

use atzentis_core::PhaseId;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::loader::TaskLoader;
use crate::metadata::{PhaseMetadata, METADATA_FILE};

/// One phase as found on disk, with whatever the metadata ledger adds.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub id: PhaseId,
    pub name: String,
    pub dir_name: String,
    pub task_count: usize,
    pub status: Option<String>,
}

impl TaskLoader {
    /// All phase directories under the specs root, ascending by phase
    /// number. Metadata is read best-effort for names and status; a phase
    /// without a ledger still lists with its directory slug.
    pub async fn list_phases(&self) -> Result<Vec<PhaseSummary>> {
        let root = self.specs_root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let re = Regex::new(r"^P(\d{2})-(.+)$").expect("static regex");
        let mut phases = Vec::new();

        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = re.captures(&dir_name) else {
                continue;
            };

            let digits = caps.get(1).unwrap().as_str();
            let Ok(id) = PhaseId::parse(&format!("p{}", digits)) else {
                continue;
            };
            let slug = caps.get(2).unwrap().as_str().replace('-', " ");

            let metadata = read_summary_metadata(&entry.path()).await;
            let name = metadata
                .as_ref()
                .map(|m| m.phase_name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or(slug);
            let (task_count, status) = match &metadata {
                Some(m) => (m.tasks.len(), m.status.clone()),
                None => (count_task_dirs(&entry.path(), digits).await, None),
            };

            phases.push(PhaseSummary {
                id,
                name,
                dir_name,
                task_count,
                status,
            });
        }

        phases.sort_by_key(|p| p.id.number());
        Ok(phases)
    }
}

async fn read_summary_metadata(phase_dir: &PathBuf) -> Option<PhaseMetadata> {
    let path = phase_dir.join(METADATA_FILE);
    let content = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed phase metadata");
            None
        }
    }
}

async fn count_task_dirs(phase_dir: &PathBuf, digits: &str) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(phase_dir).await else {
        return 0;
    };
    let prefix = format!("T{}-", digits);
    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    async fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_root_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let loader = TaskLoader::new(dir.path(), "specs");
        assert!(loader.list_phases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_phases_sorted_with_metadata_names() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("specs/P02-backend/tasks.json"),
            r#"{"phase": "p02", "phaseNumber": 2, "phaseName": "Backend services",
                "status": "in_progress",
                "tasks": [{"id": "T02-001"}, {"id": "T02-002"}]}"#,
        )
        .await;
        write(
            &dir.path().join("specs/P01-foundation/T01-001-setup/task.md"),
            "---\nname: setup\n---\n",
        )
        .await;

        let loader = TaskLoader::new(dir.path(), "specs");
        let phases = loader.list_phases().await.unwrap();

        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].id.as_str(), "p01");
        assert_eq!(phases[0].name, "foundation");
        assert_eq!(phases[0].task_count, 1);
        assert!(phases[0].status.is_none());

        assert_eq!(phases[1].id.as_str(), "p02");
        assert_eq!(phases[1].name, "Backend services");
        assert_eq!(phases[1].task_count, 2);
        assert_eq!(phases[1].status.as_deref(), Some("in_progress"));
    }

    #[tokio::test]
    async fn test_non_phase_dirs_are_ignored() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("specs/notes"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("specs/P01-real"))
            .await
            .unwrap();

        let loader = TaskLoader::new(dir.path(), "specs");
        let phases = loader.list_phases().await.unwrap();
        assert_eq!(phases.len(), 1);
    }
}
