use crate::graph::{Graph, TaskHandle, TaskMut, Work};
use crate::{NodeError, Subflow};

/// Shared construction API of everything that owns a graph:
/// frameworks, work groups and subflows.
pub trait GraphBuilder {
    /// Mutable access to the owned graph. Frameworks refuse it while
    /// any of their topologies is still running.
    fn graph_mut(&mut self) -> &mut Graph;

    fn emplace<F>(&mut self, body: F) -> TaskHandle
    where
        F: Fn() -> Result<(), NodeError> + Send + Sync + 'static,
    {
        self.graph_mut().emplace(Work::from_fn(body))
    }

    /// Adds a task whose body receives a [`Subflow`] to spawn more tasks into.
    fn emplace_subflow<F>(&mut self, body: F) -> TaskHandle
    where
        F: Fn(&mut Subflow) -> Result<(), NodeError> + Send + Sync + 'static,
    {
        self.graph_mut().emplace(Work::from_subflow(body))
    }

    fn placeholder(&mut self) -> TaskHandle {
        self.graph_mut().emplace(Work::Placeholder)
    }

    fn precede(&mut self, from: TaskHandle, to: TaskHandle) {
        self.graph_mut().precede(from, to);
    }

    fn broadcast(&mut self, from: TaskHandle, to: &[TaskHandle]) {
        let graph = self.graph_mut();
        for &task in to {
            graph.precede(from, task);
        }
    }

    fn gather(&mut self, from: &[TaskHandle], to: TaskHandle) {
        let graph = self.graph_mut();
        for &task in from {
            graph.precede(task, to);
        }
    }

    /// Chains the tasks in order: `tasks[0] -> tasks[1] -> ...`.
    fn linearize(&mut self, tasks: &[TaskHandle]) {
        let graph = self.graph_mut();
        for pair in tasks.windows(2) {
            graph.precede(pair[0], pair[1]);
        }
    }

    /// Chainable view of one task: `builder.task(a).name("A").precede(b)`.
    fn task(&mut self, task: TaskHandle) -> TaskMut<'_> {
        TaskMut::new(self.graph_mut(), task)
    }
}
