use graphcore::{FlowError, Graph, TaskHandle, TopologyId, TopologyRegistry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Summary of one finished topology
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyReport {
    pub topology_id: TopologyId,
    pub flow: String,
    /// Bodies run in this topology, subflow tasks included. Nested
    /// topologies of embedded frameworks report their own counts.
    pub nodes_executed: usize,
    pub duration_ms: u64,
}

type Outcome = Option<Result<TopologyReport, FlowError>>;

/// One execution instance of a graph.
pub(crate) struct TopologyState {
    pub(crate) id: TopologyId,
    pub(crate) flow: String,
    /// Nodes not yet completed, across the top graph and every subflow.
    join_counter: AtomicUsize,
    executed: AtomicUsize,
    failed: AtomicBool,
    failure: Mutex<Option<FlowError>>,
    started: Instant,
    registry: TopologyRegistry,
    completion: watch::Sender<Outcome>,
}

impl TopologyState {
    /// Registers a new topology with `registry` and returns it with its handle.
    pub(crate) fn launch(
        flow: &str,
        num_nodes: usize,
        registry: TopologyRegistry,
    ) -> (Arc<Self>, TopologyHandle) {
        let id = Uuid::new_v4();
        registry.register(id);

        let (completion, receiver) = watch::channel(None);
        let state = Arc::new(Self {
            id,
            flow: flow.to_string(),
            join_counter: AtomicUsize::new(num_nodes),
            executed: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            started: Instant::now(),
            registry,
            completion,
        });
        let handle = TopologyHandle {
            id,
            completion: receiver,
        };
        (state, handle)
    }

    /// Accounts for nodes added at run time. Must happen before the node
    /// that added them completes.
    pub(crate) fn add_pending(&self, nodes: usize) {
        self.join_counter.fetch_add(nodes, Ordering::AcqRel);
    }

    /// Returns true for the completion that brings the topology to zero.
    pub(crate) fn complete_one(&self) -> bool {
        self.join_counter.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Keeps the first failure; later ones are dropped.
    pub(crate) fn record_failure(&self, error: FlowError) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(error);
        }
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn report(&self) -> TopologyReport {
        TopologyReport {
            topology_id: self.id,
            flow: self.flow.clone(),
            nodes_executed: self.executed.load(Ordering::Acquire),
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    pub(crate) fn take_failure(&self) -> Option<FlowError> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Leaves the registry, then wakes every waiter. The order lets a waiter
    /// modify the framework as soon as `wait` returns.
    pub(crate) fn complete(&self, outcome: Result<TopologyReport, FlowError>) {
        self.registry.unregister(self.id);
        self.completion.send_replace(Some(outcome));
    }
}

/// Waitable handle to a running topology
#[derive(Debug, Clone)]
pub struct TopologyHandle {
    id: TopologyId,
    completion: watch::Receiver<Outcome>,
}

impl TopologyHandle {
    pub fn id(&self) -> TopologyId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Waits for every node, detached subflow tasks included, to finish.
    /// Returns the first task failure, if any.
    pub async fn wait(&self) -> Result<TopologyReport, FlowError> {
        let mut completion = self.completion.clone();
        let outcome = completion
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlowError::Execution(format!("topology {} dropped before completing", self.id)))?;
        outcome.clone().unwrap_or_else(|| {
            Err(FlowError::Execution(format!("topology {} has no outcome", self.id)))
        })
    }
}

/// One pass over one graph within a topology: the top graph, or the scratch
/// graph of a subflow.
pub(crate) struct GraphRun {
    pub(crate) graph: Arc<Graph>,
    pub(crate) topology: Arc<TopologyState>,
    /// Not-yet-completed predecessors per node, for this pass only.
    pending: Vec<AtomicUsize>,
    remaining: AtomicUsize,
    drained: Notify,
}

impl GraphRun {
    pub(crate) fn new(graph: Arc<Graph>, topology: Arc<TopologyState>) -> Arc<Self> {
        let pending = graph
            .tasks()
            .map(|task| AtomicUsize::new(graph.node(task).num_predecessors()))
            .collect();
        let remaining = AtomicUsize::new(graph.len());
        Arc::new(Self {
            graph,
            topology,
            pending,
            remaining,
            drained: Notify::new(),
        })
    }

    /// Drops one pending predecessor of `task`; true when it became ready.
    pub(crate) fn release(&self, task: TaskHandle) -> bool {
        self.pending[task.index()].fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn complete_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_one();
        }
    }

    /// Resolves once every node of this pass has completed.
    pub(crate) async fn drained(&self) {
        self.drained.notified().await;
    }
}
