use crate::{Framework, NodeError, Subflow};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Body of a plain task.
pub type StaticWork = Arc<dyn Fn() -> Result<(), NodeError> + Send + Sync>;

/// Body of a task that may grow the graph while it runs.
pub type SubflowWork = Arc<dyn Fn(&mut Subflow) -> Result<(), NodeError> + Send + Sync>;

/// What a node does when the executor dispatches it.
#[derive(Clone)]
pub enum Work {
    Static(StaticWork),
    Subflow(SubflowWork),
    /// Runs a whole framework as one nested topology.
    Framework(Arc<Framework>),
    Placeholder,
}

impl Work {
    pub fn from_fn<F>(body: F) -> Self
    where
        F: Fn() -> Result<(), NodeError> + Send + Sync + 'static,
    {
        Work::Static(Arc::new(body))
    }

    pub fn from_subflow<F>(body: F) -> Self
    where
        F: Fn(&mut Subflow) -> Result<(), NodeError> + Send + Sync + 'static,
    {
        Work::Subflow(Arc::new(body))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Work::Placeholder)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Static(_) => f.write_str("Static"),
            Work::Subflow(_) => f.write_str("Subflow"),
            Work::Framework(framework) => f.debug_tuple("Framework").field(&framework.name()).finish(),
            Work::Placeholder => f.write_str("Placeholder"),
        }
    }
}

/// Stable handle to a node, valid for the lifetime of the graph that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(NodeIndex);

impl TaskHandle {
    pub fn index(self) -> usize {
        self.0.index()
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    work: Work,
    predecessors: usize,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    /// Number of declared incoming edges. Each run starts its
    /// dependency counter for this node from this value.
    pub fn num_predecessors(&self) -> usize {
        self.predecessors
    }
}

/// Insertion-ordered DAG of nodes. Nodes are never removed, so every
/// `TaskHandle` it hands out stays valid.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    dag: DiGraph<Node, ()>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }

    pub fn emplace(&mut self, work: Work) -> TaskHandle {
        TaskHandle(self.dag.add_node(Node {
            name: String::new(),
            work,
            predecessors: 0,
        }))
    }

    /// Adds the edge `from -> to`. Acyclicity is the caller's responsibility.
    pub fn precede(&mut self, from: TaskHandle, to: TaskHandle) {
        self.dag.add_edge(from.0, to.0, ());
        self.dag[to.0].predecessors += 1;
    }

    pub fn set_name(&mut self, task: TaskHandle, name: impl Into<String>) {
        self.dag[task.0].name = name.into();
    }

    pub fn name(&self, task: TaskHandle) -> &str {
        &self.dag[task.0].name
    }

    pub fn set_work(&mut self, task: TaskHandle, work: Work) {
        self.dag[task.0].work = work;
    }

    pub fn node(&self, task: TaskHandle) -> &Node {
        &self.dag[task.0]
    }

    pub fn tasks(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.dag.node_indices().map(TaskHandle)
    }

    /// Nodes with no predecessors; the first to become ready in a run.
    pub fn sources(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.tasks().filter(|task| self.dag[task.0].predecessors == 0)
    }

    /// Successors in the order their edges were declared.
    pub fn successors(&self, task: TaskHandle) -> Vec<TaskHandle> {
        // petgraph walks edges newest first
        let mut successors: Vec<TaskHandle> = self
            .dag
            .neighbors_directed(task.0, Direction::Outgoing)
            .map(TaskHandle)
            .collect();
        successors.reverse();
        successors
    }

    /// Renders the graph as DOT, one line per node.
    pub fn dump(&self, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(title));
        for task in self.tasks() {
            let node = &self.dag[task.0];
            let label = if node.name.is_empty() {
                format!("n{}", task.index())
            } else {
                escape(&node.name)
            };
            let attrs = match node.work {
                Work::Framework(_) => " shape=box",
                Work::Subflow(_) => " shape=diamond",
                Work::Placeholder => " style=dashed",
                Work::Static(_) => "",
            };
            let _ = write!(out, "  n{} [label=\"{}\"{}];", task.index(), label, attrs);

            let successors = self.successors(task);
            if !successors.is_empty() {
                let _ = write!(out, " n{} -> {{", task.index());
                for successor in successors {
                    let _ = write!(out, " n{}", successor.index());
                }
                out.push_str(" };");
            }
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Mutable view of one node, for chained naming and wiring.
pub struct TaskMut<'a> {
    graph: &'a mut Graph,
    task: TaskHandle,
}

impl<'a> TaskMut<'a> {
    pub(crate) fn new(graph: &'a mut Graph, task: TaskHandle) -> Self {
        Self { graph, task }
    }

    pub fn handle(&self) -> TaskHandle {
        self.task
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.graph.set_name(self.task, name);
        self
    }

    pub fn precede(self, other: TaskHandle) -> Self {
        self.graph.precede(self.task, other);
        self
    }

    pub fn succeed(self, other: TaskHandle) -> Self {
        self.graph.precede(other, self.task);
        self
    }

    /// Replaces the body, typically of a placeholder.
    pub fn work<F>(self, body: F) -> Self
    where
        F: Fn() -> Result<(), NodeError> + Send + Sync + 'static,
    {
        self.graph.set_work(self.task, Work::from_fn(body));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Work {
        Work::from_fn(|| Ok(()))
    }

    #[test]
    fn precede_counts_predecessors() {
        let mut graph = Graph::new();
        let a = graph.emplace(noop());
        let b = graph.emplace(noop());
        let c = graph.emplace(noop());
        graph.precede(a, c);
        graph.precede(b, c);

        assert_eq!(graph.node(a).num_predecessors(), 0);
        assert_eq!(graph.node(c).num_predecessors(), 2);
        assert_eq!(graph.sources().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn successors_keep_declaration_order() {
        let mut graph = Graph::new();
        let a = graph.emplace(noop());
        let b = graph.emplace(noop());
        let c = graph.emplace(noop());
        let d = graph.emplace(noop());
        graph.precede(a, d);
        graph.precede(a, b);
        graph.precede(a, c);

        assert_eq!(graph.successors(a), vec![d, b, c]);
        assert!(graph.successors(d).is_empty());
    }

    #[test]
    fn task_view_wires_and_fills_placeholders() {
        let mut graph = Graph::new();
        let a = graph.emplace(noop());
        let slot = graph.emplace(Work::Placeholder);
        assert!(graph.node(slot).work().is_placeholder());

        let view = TaskMut::new(&mut graph, slot).name("slot").succeed(a).work(|| Ok(()));
        assert_eq!(view.handle(), slot);

        assert!(!graph.node(slot).work().is_placeholder());
        assert_eq!(graph.name(slot), "slot");
        assert_eq!(graph.successors(a), vec![slot]);
        assert_eq!(graph.node(slot).num_predecessors(), 1);
    }

    #[test]
    fn dump_is_one_line_per_node() {
        let mut graph = Graph::new();
        let a = graph.emplace(noop());
        let b = graph.emplace(Work::Placeholder);
        let c = graph.emplace(Work::from_subflow(|_| Ok(())));
        graph.set_name(a, "A");
        graph.set_name(c, "say \"hi\"");
        graph.precede(a, b);
        graph.precede(a, c);

        let expected = "digraph \"demo\" {\n\
                        \x20 n0 [label=\"A\"]; n0 -> { n1 n2 };\n\
                        \x20 n1 [label=\"n1\" style=dashed];\n\
                        \x20 n2 [label=\"say \\\"hi\\\"\" shape=diamond];\n\
                        }\n";
        assert_eq!(graph.dump("demo"), expected);
    }
}
