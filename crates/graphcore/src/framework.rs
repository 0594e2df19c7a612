use crate::builder::GraphBuilder;
use crate::graph::Graph;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub type TopologyId = Uuid;

/// Anything the executor can launch: a named graph plus the list of
/// topologies currently running over it.
pub trait Flow: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn graph(&self) -> &Arc<Graph>;

    fn topologies(&self) -> &TopologyRegistry;
}

/// Guarded list of in-flight topology ids.
#[derive(Debug, Clone, Default)]
pub struct TopologyRegistry {
    inner: Arc<Mutex<Vec<TopologyId>>>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: TopologyId) {
        self.lock().push(id);
    }

    pub fn unregister(&self, id: TopologyId) {
        let mut topologies = self.lock();
        if let Some(pos) = topologies.iter().position(|t| *t == id) {
            topologies.swap_remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<TopologyId> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TopologyId>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reusable task dependency graph.
///
/// A framework can be launched any number of times, including while earlier
/// launches are still running; every launch gets its own topology with its own
/// dependency counters. The graph is shared with running topologies, so it
/// must not change underneath them: mutating or dropping a framework with
/// outstanding topologies panics.
#[derive(Debug)]
pub struct Framework {
    name: String,
    /// Owner kind used in reuse-violation reports.
    kind: &'static str,
    graph: Arc<Graph>,
    topologies: TopologyRegistry,
}

impl Framework {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::owned_by("framework", name)
    }

    pub(crate) fn owned_by(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            graph: Arc::default(),
            topologies: TopologyRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.len()
    }

    /// Number of topologies currently running over this framework.
    pub fn num_topologies(&self) -> usize {
        self.topologies.len()
    }

    pub fn dump(&self) -> String {
        self.graph.dump(&self.name)
    }

    pub(crate) fn ensure_idle(&self, action: &str) {
        let outstanding = self.topologies.len();
        if outstanding > 0 {
            reuse_violation(self.kind, &self.name, action, outstanding);
        }
    }
}

impl GraphBuilder for Framework {
    fn graph_mut(&mut self) -> &mut Graph {
        self.ensure_idle("modified");
        // finished runs may still hold the old snapshot; they keep it
        Arc::make_mut(&mut self.graph)
    }
}

impl Flow for Framework {
    fn name(&self) -> &str {
        &self.name
    }

    fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    fn topologies(&self) -> &TopologyRegistry {
        &self.topologies
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::named("")
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.ensure_idle("dropped");
        }
    }
}

#[cold]
#[track_caller]
fn reuse_violation(kind: &str, name: &str, action: &str, outstanding: usize) -> ! {
    tracing::error!(
        owner = kind,
        name,
        outstanding,
        "Graph {} while topologies are running",
        action
    );
    panic!(
        "reuse violation: {} '{}' {} with {} outstanding topologies",
        kind, name, action, outstanding
    );
}
