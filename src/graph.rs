//! The arena that owns every task of a computation.
//!
//! Tasks are moved into a [`TaskGraph`] as they are described and from then on
//! they are referred to by a [`TaskHandle`]. A handle is a small copyable
//! token: two handles are the same node exactly when they compare equal, so
//! structural sharing (diamonds, a task used twice as an input) is preserved
//! without relying on object addresses.
//!
//! Edges always point at tasks that were added earlier, which makes cycles
//! impossible to construct.

use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::LoomError;
use crate::task::{Input, Task};

static NEXT_GRAPH: AtomicU64 = AtomicU64::new(0);

/// A type-safe reference to a task placed in a [`TaskGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle {
    pub(crate) graph: u64,
    pub(crate) index: NodeIndex,
}

impl TaskHandle {
    /// Position of the task in its graph, in insertion order.
    pub fn index(&self) -> usize {
        self.index.index()
    }
}

pub struct TaskGraph {
    id: u64,
    pub(crate) graph: Graph<Task, ()>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed),
            graph: Graph::new(),
        }
    }

    /// Places a task in the graph.
    ///
    /// Fails if one of its inputs is a handle of another graph.
    pub fn add(&mut self, task: Task) -> Result<TaskHandle, LoomError> {
        let dependencies = task
            .inputs
            .iter()
            .filter_map(|input| match input {
                Input::Task(handle) => Some(self.check(handle).map(|_| handle.index)),
                Input::Remote(_) => None,
            })
            .collect::<Result<Vec<_>, _>>()?;

        let index = self.graph.add_node(task);

        for dependency in dependencies {
            self.graph.add_edge(dependency, index, ());
        }

        Ok(TaskHandle {
            graph: self.id,
            index,
        })
    }

    pub fn get(&self, handle: TaskHandle) -> Result<&Task, LoomError> {
        self.check(&handle)?;
        Ok(&self.graph[handle.index])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub(crate) fn check(&self, handle: &TaskHandle) -> Result<(), LoomError> {
        if handle.graph != self.id || handle.index.index() >= self.graph.node_count() {
            return Err(LoomError::InvalidPlanNode(format!(
                "handle #{} doesn't belong to this task graph",
                handle.index.index()
            )));
        }

        Ok(())
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task
                .label
                .as_deref()
                .unwrap_or(&task.task_type)
                .replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;

            for input in &task.inputs {
                if let Input::Remote(future) = input {
                    writeln!(f, "    R{}((\"{}\")) --> {:?}", future.id(), future.id(), index.index())?;
                }
            }
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks;

    #[test]
    fn test_add_links_inputs() {
        let mut graph = TaskGraph::new();
        let a = graph.add(tasks::constant("a")).unwrap();
        let b = graph.add(tasks::constant("b")).unwrap();
        let c = graph.add(tasks::merge([a, b, a], "")).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(c.index(), 2);
        assert_eq!(graph.graph.edge_count(), 3);
        assert_eq!(graph.get(c).unwrap().get_inputs().len(), 3);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = TaskGraph::new();
        let mut second = TaskGraph::new();
        let a = first.add(tasks::constant("a")).unwrap();

        assert!(matches!(
            second.add(tasks::size(a)),
            Err(LoomError::InvalidPlanNode(_))
        ));
        assert!(second.is_empty());
        assert!(second.get(a).is_err());
    }

    #[test]
    fn test_display() {
        let mut graph = TaskGraph::new();
        let a = graph.add(tasks::constant("a").label("src")).unwrap();
        graph.add(tasks::size(a)).unwrap();

        let text = graph.to_string();
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("0[\"src\"]"));
        assert!(text.contains("1[\"loom/base/size\"]"));
        assert!(text.contains("0 --> 1"));
    }
}
