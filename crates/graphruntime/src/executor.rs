use crate::topology::{GraphRun, TopologyHandle, TopologyState};
use chrono::Utc;
use graphcore::{
    EventBus, ExecutionEvent, Flow, FlowError, Framework, Node, NodeError, Subflow, SubflowWork,
    TaskHandle, Work,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Semaphore;
use tokio::task;

/// Runs graphs on the Tokio worker pool.
///
/// Every ready node becomes its own Tokio task. When a node finishes, its
/// successors' dependency counters drop and whichever reaches zero is
/// spawned. A node that waits, either on a joined subflow or on an embedded
/// framework, suspends at an `.await` and frees its worker for other nodes.
pub struct Executor {
    events: Arc<EventBus>,
    permits: Semaphore,
}

impl Executor {
    /// `max_parallel_nodes` bounds how many task bodies run at the same time.
    pub fn new(max_parallel_nodes: usize, events: Arc<EventBus>) -> Self {
        Self {
            events,
            permits: Semaphore::new(max_parallel_nodes.max(1)),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Launches one topology over `flow`. Must be called inside a Tokio runtime.
    pub fn run_topology<F: Flow + ?Sized>(self: &Arc<Self>, flow: &F) -> TopologyHandle {
        let graph = Arc::clone(flow.graph());
        let (topology, handle) =
            TopologyState::launch(flow.name(), graph.len(), flow.topologies().clone());

        tracing::info!(topology = %topology.id, flow = flow.name(), nodes = graph.len(), "Starting topology");
        self.events.emit(ExecutionEvent::TopologyStarted {
            topology_id: topology.id,
            flow: flow.name().to_string(),
            num_nodes: graph.len(),
            timestamp: Utc::now(),
        });

        if graph.is_empty() {
            self.finish(&topology);
        } else {
            self.start_run(GraphRun::new(graph, topology));
        }
        handle
    }

    fn start_run(self: &Arc<Self>, run: Arc<GraphRun>) {
        for task in run.graph.sources() {
            self.schedule(Arc::clone(&run), task);
        }
    }

    /// Dispatches a node whose dependency counter reached zero.
    pub(crate) fn schedule(self: &Arc<Self>, run: Arc<GraphRun>, task: TaskHandle) {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.invoke(run, task).await });
    }

    async fn invoke(self: Arc<Self>, run: Arc<GraphRun>, task: TaskHandle) {
        let topology = Arc::clone(&run.topology);

        if topology.has_failed() {
            tracing::debug!(topology = %topology.id, node = task.index(), "Skipping node after earlier failure");
        } else {
            let node = run.graph.node(task);
            let name = display_name(node, task);
            self.events.emit(ExecutionEvent::NodeStarted {
                topology_id: topology.id,
                node: task.index(),
                name: name.clone(),
                timestamp: Utc::now(),
            });

            let start = Instant::now();
            let outcome = match node.work() {
                Work::Placeholder => Ok(()),
                Work::Static(body) => self
                    .call(|| body())
                    .await
                    .map_err(|source| FlowError::Task {
                        task: name.clone(),
                        source,
                    }),
                Work::Subflow(body) => self.spawn_subflow(&run, task, &name, body).await,
                Work::Framework(framework) => self.embed(framework).await,
            };
            let duration_ms = start.elapsed().as_millis() as u64;
            topology.record_executed();

            match outcome {
                Ok(()) => {
                    tracing::debug!(topology = %topology.id, node = %name, "Node completed in {}ms", duration_ms);
                    self.events.emit(ExecutionEvent::NodeCompleted {
                        topology_id: topology.id,
                        node: task.index(),
                        name,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                Err(error) => {
                    tracing::error!(topology = %topology.id, node = %name, "Node failed: {}", error);
                    self.events.emit(ExecutionEvent::NodeFailed {
                        topology_id: topology.id,
                        node: task.index(),
                        name,
                        error: error.to_string(),
                        timestamp: Utc::now(),
                    });
                    topology.record_failure(error);
                }
            }
        }

        self.on_node_done(&run, task);
    }

    /// Runs a body under a concurrency permit. The permit is released before
    /// any waiting on subflows or nested topologies.
    async fn call<F>(&self, body: F) -> Result<(), NodeError>
    where
        F: FnOnce() -> Result<(), NodeError>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| NodeError::failed("executor is shut down"))?;
        run_blocking(|| guard(body))
    }

    async fn spawn_subflow(
        self: &Arc<Self>,
        run: &Arc<GraphRun>,
        parent: TaskHandle,
        name: &str,
        body: &SubflowWork,
    ) -> Result<(), FlowError> {
        let mut subflow = Subflow::new();
        self.call(|| body(&mut subflow))
            .await
            .map_err(|source| FlowError::Task {
                task: name.to_string(),
                source,
            })?;

        if subflow.is_empty() {
            return Ok(());
        }

        let detached = subflow.is_detached();
        let num_nodes = subflow.num_nodes();
        let topology = &run.topology;
        // counted before the parent completes, so the topology can't drain early
        topology.add_pending(num_nodes);

        tracing::debug!(topology = %topology.id, parent = name, nodes = num_nodes, detached, "Spawning subflow");
        self.events.emit(ExecutionEvent::SubflowSpawned {
            topology_id: topology.id,
            parent: parent.index(),
            num_nodes,
            detached,
            timestamp: Utc::now(),
        });

        let child = GraphRun::new(Arc::new(subflow.into_graph()), Arc::clone(topology));
        self.start_run(Arc::clone(&child));
        if !detached {
            child.drained().await;
        }
        Ok(())
    }

    /// Runs an embedded framework as a nested topology and waits for it.
    async fn embed(self: &Arc<Self>, framework: &Framework) -> Result<(), FlowError> {
        self.run_topology(framework).wait().await.map(|_| ())
    }

    /// Completion bookkeeping for one node: releases successors, then
    /// settles the pass and the topology.
    pub(crate) fn on_node_done(self: &Arc<Self>, run: &Arc<GraphRun>, task: TaskHandle) {
        for successor in run.graph.successors(task) {
            if run.release(successor) {
                self.schedule(Arc::clone(run), successor);
            }
        }
        run.complete_one();
        if run.topology.complete_one() {
            self.finish(&run.topology);
        }
    }

    fn finish(&self, topology: &TopologyState) {
        let report = topology.report();
        let failure = topology.take_failure();

        match &failure {
            None => tracing::info!(
                topology = %topology.id,
                flow = %topology.flow,
                "Topology completed: {} nodes in {}ms",
                report.nodes_executed,
                report.duration_ms
            ),
            Some(error) => tracing::error!(topology = %topology.id, flow = %topology.flow, "Topology failed: {}", error),
        }
        self.events.emit(ExecutionEvent::TopologyCompleted {
            topology_id: topology.id,
            success: failure.is_none(),
            nodes_executed: report.nodes_executed,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });

        topology.complete(match failure {
            None => Ok(report),
            Some(error) => Err(error),
        });
    }
}

/// Runs synchronous caller code without stalling the worker's other tasks.
/// A current-thread runtime has no `block_in_place`; the body runs inline.
pub(crate) fn run_blocking<R>(body: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(body),
        _ => body(),
    }
}

/// Runs caller code, turning a panic into [`NodeError::Panicked`].
pub(crate) fn guard<R>(body: impl FnOnce() -> Result<R, NodeError>) -> Result<R, NodeError> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => Err(NodeError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn display_name(node: &Node, task: TaskHandle) -> String {
    if node.name().is_empty() {
        format!("n{}", task.index())
    } else {
        node.name().to_string()
    }
}
