//! Task graph resolution.
//!
//! Turns a template's task list into a deterministic linear schedule the
//! executor pool can consume, while preserving each task's declared
//! predecessors. Kahn's algorithm with a min-heap ready set, so tasks at
//! the same depth always emerge in ascending ordinal order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use flowgrid_core::types::RunStatus;
use thiserror::Error;

use crate::model::{RunTask, TaskTemplate};

/// Why a task set could not be ordered. Never produces a partial ordering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate task ordinal {0}")]
    DuplicateOrdinal(u32),
    #[error("task {ordinal} depends on undefined ordinal {dependency}")]
    UnknownDependency { ordinal: u32, dependency: u32 },
    #[error("task {0} depends on itself")]
    SelfDependency(u32),
    #[error("dependency cycle involving tasks {0:?}")]
    Cycle(Vec<u32>),
}

/// Validate a task set and produce its topological ordering.
///
/// The returned tasks carry their resolved `position` and start `pending`;
/// dependency lists are kept verbatim so the executor can still gate each
/// task on its predecessors' success.
pub fn resolve(templates: &[TaskTemplate]) -> Result<Vec<RunTask>, GraphError> {
    let mut by_ordinal: HashMap<u32, &TaskTemplate> = HashMap::with_capacity(templates.len());
    for task in templates {
        if by_ordinal.insert(task.ordinal, task).is_some() {
            return Err(GraphError::DuplicateOrdinal(task.ordinal));
        }
    }

    // Validate edges before ordering so the error names the bad edge, not
    // a misleading "cycle".
    for task in templates {
        for &dep in &task.depends_on {
            if dep == task.ordinal {
                return Err(GraphError::SelfDependency(task.ordinal));
            }
            if !by_ordinal.contains_key(&dep) {
                return Err(GraphError::UnknownDependency {
                    ordinal: task.ordinal,
                    dependency: dep,
                });
            }
        }
    }

    let mut indegree: HashMap<u32, usize> = HashMap::with_capacity(templates.len());
    let mut dependents: HashMap<u32, Vec<u32>> = HashMap::new();
    for task in templates {
        let deps: HashSet<u32> = task.depends_on.iter().copied().collect();
        indegree.insert(task.ordinal, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(task.ordinal);
        }
    }

    let mut ready: BinaryHeap<Reverse<u32>> = indegree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&ordinal, _)| Reverse(ordinal))
        .collect();

    let mut ordered = Vec::with_capacity(templates.len());
    while let Some(Reverse(ordinal)) = ready.pop() {
        let template = by_ordinal[&ordinal];
        ordered.push(RunTask {
            ordinal,
            name: template.name.clone(),
            depends_on: template.depends_on.clone(),
            status: RunStatus::Pending,
            instructions: template.instructions.clone(),
            position: ordered.len() as u32,
        });
        for &next in dependents.get(&ordinal).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(deg) = indegree.get_mut(&next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
    }

    if ordered.len() < templates.len() {
        let placed: HashSet<u32> = ordered.iter().map(|t| t.ordinal).collect();
        let mut stuck: Vec<u32> = by_ordinal
            .keys()
            .copied()
            .filter(|o| !placed.contains(o))
            .collect();
        stuck.sort_unstable();
        return Err(GraphError::Cycle(stuck));
    }

    Ok(ordered)
}
