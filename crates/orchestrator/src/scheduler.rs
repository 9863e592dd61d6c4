//! Wave scheduling over the task DAG.
//!
//! Two-level partition: the author-declared `parallel_group` forces coarse
//! ordering (higher groups always run after lower), and within each group
//! repeated Kahn-style sweeps expand the dependency DAG into waves. Waves
//! execute strictly in order; tasks within one wave never depend on each
//! other.

use std::collections::{BTreeMap, HashMap, HashSet};

use atzentis_core::{Estimate, Task};
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Partition tasks into ordered execution waves.
pub fn build_execution_waves(tasks: &[Task]) -> Result<Vec<Vec<Task>>> {
    validate_dependencies(tasks)?;
    detect_cycles(tasks)?;

    let mut groups: BTreeMap<u32, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.parallel_group).or_default().push(task);
    }

    let mut waves: Vec<Vec<Task>> = Vec::new();
    let mut completed: HashSet<&str> = HashSet::new();

    for (group, mut remaining) in groups {
        while !remaining.is_empty() {
            let (eligible, blocked): (Vec<&Task>, Vec<&Task>) = remaining
                .into_iter()
                .partition(|task| {
                    task.dependencies
                        .iter()
                        .all(|dep| completed.contains(dep.as_str()))
                });

            if eligible.is_empty() {
                // Dependencies point at a later group; no sweep can make
                // progress inside this one.
                return Err(OrchestratorError::UnschedulableTasks {
                    remaining: blocked.iter().map(|t| t.id.to_string()).collect(),
                });
            }

            let mut wave: Vec<Task> = eligible.iter().map(|t| (*t).clone()).collect();
            wave.sort_by(|a, b| a.id.cmp(&b.id));
            completed.extend(eligible.iter().map(|t| t.id.as_str()));

            debug!(
                group,
                wave = waves.len(),
                tasks = wave.len(),
                "wave scheduled"
            );
            waves.push(wave);
            remaining = blocked;
        }
    }

    Ok(waves)
}

/// Linearisation for sequential mode. Ready tasks are drained in
/// `(parallel_group asc, priority asc, id asc)` order.
pub fn topological_sort(tasks: &[Task]) -> Result<Vec<Task>> {
    validate_dependencies(tasks)?;
    detect_cycles(tasks)?;

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        for dep in &task.dependencies {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(task.id.as_str());
        }
    }

    let mut ready: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.dependencies.is_empty())
        .collect();
    let mut sorted = Vec::with_capacity(tasks.len());

    while !ready.is_empty() {
        ready.sort_by(|a, b| {
            (a.parallel_group, a.priority, &a.id).cmp(&(b.parallel_group, b.priority, &b.id))
        });
        let next = ready.remove(0);
        sorted.push(next.clone());

        for dependent in dependents.get(next.id.as_str()).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).expect("known id");
            *degree -= 1;
            if *degree == 0 {
                ready.push(by_id[dependent]);
            }
        }
    }

    Ok(sorted)
}

/// Total run estimate: tasks in one wave run in parallel, so a wave costs
/// its largest estimate and the run costs the sum over waves.
pub fn estimated_duration(tasks: &[Task]) -> Result<Estimate> {
    let waves = build_execution_waves(tasks)?;
    Ok(Estimate::from_hours(waves_duration_hours(&waves)))
}

pub fn waves_duration_hours(waves: &[Vec<Task>]) -> f64 {
    waves
        .iter()
        .map(|wave| {
            wave.iter()
                .map(|t| t.estimate.hours())
                .fold(0.0, f64::max)
        })
        .sum()
}

fn validate_dependencies(tasks: &[Task]) -> Result<()> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(OrchestratorError::UnknownDependency {
                    task: task.id.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Depth-first traversal with an explicit recursion stack; revisiting an
/// in-stack node is a cycle, reported with the path around it.
fn detect_cycles(tasks: &[Task]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    let deps: HashMap<&str, Vec<&str>> = tasks
        .iter()
        .map(|t| {
            (
                t.id.as_str(),
                t.dependencies.iter().map(|d| d.as_str()).collect(),
            )
        })
        .collect();
    let mut marks: HashMap<&str, Mark> = tasks
        .iter()
        .map(|t| (t.id.as_str(), Mark::Unvisited))
        .collect();

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        marks.insert(node, Mark::InStack);
        stack.push(node);

        for next in deps.get(node).into_iter().flatten() {
            match marks.get(next).copied().unwrap_or(Mark::Done) {
                Mark::InStack => {
                    let start = stack.iter().position(|n| n == next).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(next.to_string());
                    return Err(OrchestratorError::CircularDependency { path });
                }
                Mark::Unvisited => visit(next, deps, marks, stack)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    let mut stack = Vec::new();
    for task in tasks {
        if marks[task.id.as_str()] == Mark::Unvisited {
            visit(task.id.as_str(), &deps, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}
