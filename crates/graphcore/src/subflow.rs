use crate::builder::GraphBuilder;
use crate::graph::Graph;

/// Scratch graph handed to a running task so it can spawn more tasks.
///
/// By default the spawning task joins: it completes only after every spawned
/// task has. After [`Subflow::detach`], spawned tasks run on their own; the
/// spawning task and its successors go ahead without them, while the
/// enclosing topology still waits for them before it finishes.
#[derive(Debug, Default)]
pub struct Subflow {
    graph: Graph,
    detached: bool,
}

impl Subflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self) {
        self.detached = false;
    }

    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.len()
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl GraphBuilder for Subflow {
    fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}
