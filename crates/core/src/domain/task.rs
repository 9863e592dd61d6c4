use serde::{Deserialize, Serialize};

use crate::domain::ids::{PhaseId, TaskId};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Parse a status as written by the planning tools in phase metadata,
    /// where a task that has not run yet is `not_started`.
    pub fn parse_metadata(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::Pending),
            other => Self::parse(other),
        }
    }
}

/// Task priority. The derived order is the scheduling order: P0 first.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "P0" | "p0" => Some(Self::P0),
            "P1" | "p1" => Some(Self::P1),
            "P2" | "p2" => Some(Self::P2),
            "P3" | "p3" => Some(Self::P3),
            _ => None,
        }
    }
}

/// Work estimate normalised to hours. Accepts `"Nh"`, `"Nd"` (1d = 8h) or a
/// bare number of hours.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(transparent)]
pub struct Estimate {
    hours: f64,
}

impl Estimate {
    pub fn from_hours(hours: f64) -> Self {
        Self { hours }
    }

    pub fn hours(&self) -> f64 {
        self.hours
    }

    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some(n) = trimmed.strip_suffix(['h', 'H']) {
            let hours: f64 = n
                .trim()
                .parse()
                .map_err(|_| CoreError::InvalidEstimate(s.to_string()))?;
            return Ok(Self { hours });
        }
        if let Some(n) = trimmed.strip_suffix(['d', 'D']) {
            let days: f64 = n
                .trim()
                .parse()
                .map_err(|_| CoreError::InvalidEstimate(s.to_string()))?;
            return Ok(Self { hours: days * 8.0 });
        }
        trimmed
            .parse()
            .map(|hours| Self { hours })
            .map_err(|_| CoreError::InvalidEstimate(s.to_string()))
    }
}

impl Default for Estimate {
    fn default() -> Self {
        Self { hours: 0.0 }
    }
}

impl std::fmt::Display for Estimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}h", self.hours)
    }
}

/// A unit of work loaded from a phase directory. Immutable for the duration
/// of a run; execution progress lives in the session, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    /// Author-declared wave partition hint; higher groups always run later.
    pub parallel_group: u32,
    pub dependencies: Vec<TaskId>,
    pub files: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub estimate: Estimate,
    pub priority: Priority,
    pub phase: PhaseId,
    pub requirements: Vec<String>,
    pub business_rules: Vec<String>,
    pub testing_requirements: Vec<String>,
    pub skills: Vec<String>,
}

impl Task {
    /// Degraded record used when a task directory exists but its descriptor
    /// cannot be parsed: the id and a name derived from it, nothing else.
    pub fn minimal(id: TaskId, name: impl Into<String>, phase: PhaseId) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            status: TaskStatus::Pending,
            parallel_group: 1,
            dependencies: Vec::new(),
            files: Vec::new(),
            acceptance_criteria: Vec::new(),
            estimate: Estimate::default(),
            priority: Priority::default(),
            phase,
            requirements: Vec::new(),
            business_rules: Vec::new(),
            testing_requirements: Vec::new(),
            skills: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_parallel_group(mut self, group: u32) -> Self {
        self.parallel_group = group.max(1);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate(mut self, estimate: Estimate) -> Self {
        self.estimate = estimate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_id(s: &str) -> TaskId {
        TaskId::parse(s).unwrap()
    }

    fn phase_id(s: &str) -> PhaseId {
        PhaseId::parse(s).unwrap()
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(TaskStatus::parse("pending"), Some(TaskStatus::Pending));
        assert_eq!(
            TaskStatus::parse("in_progress"),
            Some(TaskStatus::InProgress)
        );
        assert_eq!(TaskStatus::parse("nope"), None);
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
    }

    #[test]
    fn test_metadata_status_maps_not_started() {
        assert_eq!(
            TaskStatus::parse_metadata("not_started"),
            Some(TaskStatus::Pending)
        );
        assert_eq!(
            TaskStatus::parse_metadata("blocked"),
            Some(TaskStatus::Blocked)
        );
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P1 < Priority::P2);
        assert!(Priority::P2 < Priority::P3);
        assert_eq!(Priority::parse("P1"), Some(Priority::P1));
        assert_eq!(Priority::parse("p3"), Some(Priority::P3));
        assert_eq!(Priority::parse("P9"), None);
    }

    #[test]
    fn test_estimate_parsing() {
        assert_eq!(Estimate::parse("4h").unwrap().hours(), 4.0);
        assert_eq!(Estimate::parse("2d").unwrap().hours(), 16.0);
        assert_eq!(Estimate::parse("1.5h").unwrap().hours(), 1.5);
        assert_eq!(Estimate::parse("6").unwrap().hours(), 6.0);
        assert!(Estimate::parse("soon").is_err());
    }

    #[test]
    fn test_estimate_display_in_hours() {
        assert_eq!(Estimate::parse("2d").unwrap().to_string(), "16h");
        assert_eq!(Estimate::from_hours(4.0).to_string(), "4h");
    }

    #[test]
    fn test_minimal_task_defaults() {
        let task = Task::minimal(task_id("T01-001"), "setup", phase_id("p01"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.parallel_group, 1);
        assert_eq!(task.priority, Priority::P2);
        assert!(task.dependencies.is_empty());
    }

    #[test]
    fn test_parallel_group_floor_is_one() {
        let task = Task::minimal(task_id("T01-001"), "setup", phase_id("p01"))
            .with_parallel_group(0);
        assert_eq!(task.parallel_group, 1);
    }
}
