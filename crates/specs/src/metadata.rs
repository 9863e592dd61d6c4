//! Phase metadata: the authoritative task ledger maintained by the planning
//! tools. Wherever a field exists both here and in a per-task descriptor,
//! this file wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// File name of the metadata ledger inside a phase directory.
pub const METADATA_FILE: &str = "tasks.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PhaseMetadata {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub phase_number: u32,
    #[serde(default)]
    pub phase_name: String,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    pub stats: Option<PhaseStats>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub generated: Option<String>,
    #[serde(default)]
    pub last_synced: Option<String>,
}

impl PhaseMetadata {
    /// Index entries by task id for the overlay pass.
    pub fn by_id(&self) -> HashMap<&str, &TaskEntry> {
        self.tasks
            .iter()
            .map(|entry| (entry.id.as_str(), entry))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Hours.
    #[serde(default)]
    pub estimate: Option<f64>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub subtasks: Option<Subtasks>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Subtasks {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStats {
    #[serde(default)]
    pub total_tasks: u32,
    #[serde(default)]
    pub completed_tasks: u32,
    #[serde(default)]
    pub total_estimate: f64,
}
