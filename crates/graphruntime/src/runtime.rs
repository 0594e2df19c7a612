use crate::pipeline::{self, Overlap, PipelineHandle, Step};
use crate::{Executor, TopologyHandle};
use graphcore::{EventBus, ExecutionEvent, Flow, NodeError};
use serde::Deserialize;
use std::sync::Arc;

/// Main entry point for running graphs
pub struct GraphRuntime {
    executor: Arc<Executor>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl GraphRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(Executor::new(
            config.max_parallel_nodes,
            Arc::clone(&event_bus),
        ));

        Self {
            executor,
            event_bus,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Launch one topology over a framework or work group
    pub fn run<F: Flow + ?Sized>(&self, flow: &F) -> TopologyHandle {
        self.executor.run_topology(flow)
    }

    /// Run `flow` `n` times, one iteration after another
    pub fn run_n<F: Flow>(&self, flow: Arc<F>, n: usize) -> PipelineHandle {
        let mut remaining = n;
        self.run_until(
            flow,
            move || {
                if remaining == 0 {
                    return true;
                }
                remaining -= 1;
                false
            },
            || Ok(()),
        )
    }

    /// Run `flow` repeatedly until `stop` returns true. `stop` is checked
    /// before each iteration, after the previous one has finished.
    pub fn run_until<F, P, E>(&self, flow: Arc<F>, mut stop: P, epilogue: E) -> PipelineHandle
    where
        F: Flow,
        P: FnMut() -> bool + Send + 'static,
        E: FnOnce() -> Result<(), NodeError> + Send + 'static,
    {
        pipeline::launch(
            Arc::clone(&self.executor),
            flow,
            Overlap::Sequential,
            move || Ok(if stop() { Step::Done } else { Step::Continue }),
            epilogue,
        )
    }

    /// Stream `flow` against `generator`: each `Step::Continue` launches one
    /// more topology, while up to `pipeline_depth` earlier ones may still be
    /// running. `epilogue` runs once after the last topology finishes.
    pub fn pipeline_until<F, G, E>(&self, flow: Arc<F>, generator: G, epilogue: E) -> PipelineHandle
    where
        F: Flow,
        G: FnMut() -> Result<Step, NodeError> + Send + 'static,
        E: FnOnce() -> Result<(), NodeError> + Send + 'static,
    {
        pipeline::launch(
            Arc::clone(&self.executor),
            flow,
            Overlap::Pipelined {
                depth: self.config.pipeline_depth,
            },
            generator,
            epilogue,
        )
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for GraphRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on task bodies executing at the same time.
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Topologies a pipeline may keep in flight. With 1, iteration i+1's
    /// generator overlaps iteration i, but the topologies themselves never do.
    pub pipeline_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            pipeline_depth: 1,
        }
    }
}
