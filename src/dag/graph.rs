// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::task::{Task, TaskId};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct GraphNode {
    label: String,
    /// Direct dependencies inside the graph.
    deps: Vec<TaskId>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskId>,
}

/// Read-only adjacency view over a set of tasks.
///
/// The scheduler itself never needs it (watchers only look at direct
/// dependencies); it is used for planning output and diagnostics.
/// Dependencies outside the set are ignored.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    order: Vec<TaskId>,
    nodes: HashMap<TaskId, GraphNode>,
}

impl TaskGraph {
    pub fn from_tasks(tasks: &[Arc<Task>]) -> Self {
        let members: HashSet<TaskId> = tasks.iter().map(|t| t.id()).collect();
        let mut nodes: HashMap<TaskId, GraphNode> = HashMap::new();
        let mut order = Vec::with_capacity(tasks.len());

        // First pass: nodes with their dependency lists.
        for task in tasks {
            if nodes.contains_key(&task.id()) {
                continue;
            }
            let mut deps: Vec<TaskId> = Vec::new();
            for dep in task.dependencies() {
                if members.contains(&dep.id()) && !deps.contains(&dep.id()) {
                    deps.push(dep.id());
                }
            }
            order.push(task.id());
            nodes.insert(
                task.id(),
                GraphNode {
                    label: task.label().to_string(),
                    deps,
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: dependents from deps.
        for id in &order {
            let deps = nodes.get(id).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(*id);
                }
            }
        }

        Self { order, nodes }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Task ids in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.order.iter().copied()
    }

    pub fn label_of(&self, id: TaskId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.label.as_str())
    }

    pub fn dependencies_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks without dependencies inside the graph.
    pub fn roots(&self) -> Vec<TaskId> {
        self.tasks()
            .filter(|id| self.dependencies_of(*id).is_empty())
            .collect()
    }

    /// Every task that (directly or not) depends on `id`.
    pub fn transitive_dependents(&self, id: TaskId) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<TaskId> = self.dependents_of(id).to_vec();

        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend_from_slice(self.dependents_of(next));
            }
        }
        seen
    }

    /// Group tasks into levels: level 0 holds the roots, level `n` the tasks
    /// whose deepest dependency sits on level `n - 1`.
    pub fn levels(&self) -> Vec<Vec<TaskId>> {
        let mut depth: HashMap<TaskId, usize> = HashMap::new();
        let mut remaining: Vec<TaskId> = self.order.clone();

        // Tasks are built after their dependencies, so this settles quickly.
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|id| {
                let deps = self.dependencies_of(*id);
                if deps.iter().all(|d| depth.contains_key(d)) {
                    let level = deps
                        .iter()
                        .filter_map(|d| depth.get(d))
                        .max()
                        .map_or(0, |d| d + 1);
                    depth.insert(*id, level);
                    false
                } else {
                    true
                }
            });
            if remaining.len() == before {
                break;
            }
        }

        let max_level = depth.values().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); max_level];
        for id in &self.order {
            if let Some(level) = depth.get(id) {
                levels[*level].push(*id);
            }
        }
        levels
    }
}
