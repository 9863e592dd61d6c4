//! Dry-run planning: the wave layout and estimates a run would use, with no
//! side effects.

use atzentis_core::{Estimate, Task};
use serde::Serialize;

use crate::error::Result;
use crate::scheduler;

#[derive(Debug, Clone, Serialize)]
pub struct PlannedTask {
    pub id: String,
    pub name: String,
    pub estimate_hours: f64,
    pub priority: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedWave {
    pub index: usize,
    pub tasks: Vec<PlannedTask>,
    /// Wave cost under parallel execution: its largest estimate.
    pub estimate_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub waves: Vec<PlannedWave>,
    pub task_count: usize,
    pub total_estimate_hours: f64,
}

impl ExecutionPlan {
    /// Compute the plan. Scheduling errors (cycles, unknown deps) surface
    /// exactly as they would on a real run.
    pub fn build(tasks: &[Task]) -> Result<Self> {
        let waves = scheduler::build_execution_waves(tasks)?;
        let total_estimate_hours = scheduler::waves_duration_hours(&waves);

        let planned = waves
            .iter()
            .enumerate()
            .map(|(index, wave)| PlannedWave {
                index,
                estimate_hours: wave
                    .iter()
                    .map(|t| t.estimate.hours())
                    .fold(0.0, f64::max),
                tasks: wave.iter().map(planned_task).collect(),
            })
            .collect();

        Ok(Self {
            waves: planned,
            task_count: tasks.len(),
            total_estimate_hours,
        })
    }

    pub fn total_estimate(&self) -> Estimate {
        Estimate::from_hours(self.total_estimate_hours)
    }
}

fn planned_task(task: &Task) -> PlannedTask {
    PlannedTask {
        id: task.id.to_string(),
        name: task.name.clone(),
        estimate_hours: task.estimate.hours(),
        priority: task.priority.as_str().to_string(),
        dependencies: task.dependencies.iter().map(|d| d.to_string()).collect(),
    }
}
