use crate::builder::GraphBuilder;
use crate::framework::{Flow, Framework, TopologyRegistry};
use crate::graph::{Graph, TaskHandle, Work};
use std::sync::Arc;

/// A graph whose tasks may be whole frameworks.
///
/// An edge between two embedded frameworks means the first framework's
/// entire run finishes before the second one starts. Plain tasks can be
/// mixed in through [`GraphBuilder`]. A work group has the same reuse rules
/// as a framework.
#[derive(Debug)]
pub struct WorkGroup {
    flow: Framework,
}

impl WorkGroup {
    pub fn new() -> Self {
        Self {
            flow: Framework::owned_by("work group", ""),
        }
    }

    pub fn name(&self) -> &str {
        self.flow.name()
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.flow.set_name(name);
        self
    }

    /// Embeds `framework` as a single task, named after the framework.
    pub fn emplace_framework(&mut self, framework: Arc<Framework>) -> TaskHandle {
        let name = framework.name().to_string();
        let graph = self.graph_mut();
        let task = graph.emplace(Work::Framework(framework));
        if !name.is_empty() {
            graph.set_name(task, name);
        }
        task
    }

    pub fn num_nodes(&self) -> usize {
        self.flow.num_nodes()
    }

    pub fn num_topologies(&self) -> usize {
        self.flow.num_topologies()
    }

    pub fn dump(&self) -> String {
        let title = if self.name().is_empty() { "WorkGroup" } else { self.name() };
        self.flow.graph().dump(title)
    }
}

impl Default for WorkGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder for WorkGroup {
    fn graph_mut(&mut self) -> &mut Graph {
        self.flow.graph_mut()
    }
}

impl Flow for WorkGroup {
    fn name(&self) -> &str {
        self.flow.name()
    }

    fn graph(&self) -> &Arc<Graph> {
        self.flow.graph()
    }

    fn topologies(&self) -> &TopologyRegistry {
        self.flow.topologies()
    }
}
