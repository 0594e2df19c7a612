use crate::executor::{guard, run_blocking, Executor};
use crate::topology::TopologyHandle;
use chrono::Utc;
use graphcore::{ExecutionEvent, Flow, FlowError, NodeError, PipelineId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// What a pipeline generator tells the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Launch another iteration.
    Continue,
    /// The source is exhausted; finish the issued iterations and stop.
    Done,
}

/// Summary of a finished pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub pipeline_id: PipelineId,
    pub iterations: usize,
    pub nodes_executed: usize,
}

type Outcome = Option<Result<PipelineReport, FlowError>>;

/// Waitable handle to a running pipeline
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    id: PipelineId,
    completion: watch::Receiver<Outcome>,
}

impl PipelineHandle {
    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Resolves after the generator stopped, every issued topology finished
    /// and the epilogue ran.
    pub async fn wait(&self) -> Result<PipelineReport, FlowError> {
        let mut completion = self.completion.clone();
        let outcome = completion
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlowError::Execution(format!("pipeline {} dropped before completing", self.id)))?;
        outcome.clone().unwrap_or_else(|| {
            Err(FlowError::Execution(format!("pipeline {} has no outcome", self.id)))
        })
    }
}

/// How iterations may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overlap {
    /// The generator runs only once the previous iteration has finished.
    Sequential,
    /// The generator runs while earlier iterations are still in flight;
    /// at most `depth` topologies run at once.
    Pipelined { depth: usize },
}

/// Spawns the driver task and returns its handle.
pub(crate) fn launch<F, G, E>(
    executor: Arc<Executor>,
    flow: Arc<F>,
    overlap: Overlap,
    generator: G,
    epilogue: E,
) -> PipelineHandle
where
    F: Flow,
    G: FnMut() -> Result<Step, NodeError> + Send + 'static,
    E: FnOnce() -> Result<(), NodeError> + Send + 'static,
{
    let id = Uuid::new_v4();
    let (completion, receiver) = watch::channel(None);
    tokio::spawn(async move {
        let outcome = drive(id, executor, flow, overlap, generator, epilogue).await;
        completion.send_replace(Some(outcome));
    });
    PipelineHandle {
        id,
        completion: receiver,
    }
}

async fn drive<F, G, E>(
    id: PipelineId,
    executor: Arc<Executor>,
    flow: Arc<F>,
    overlap: Overlap,
    mut generator: G,
    epilogue: E,
) -> Result<PipelineReport, FlowError>
where
    F: Flow,
    G: FnMut() -> Result<Step, NodeError>,
    E: FnOnce() -> Result<(), NodeError>,
{
    let depth = match overlap {
        Overlap::Sequential => 1,
        Overlap::Pipelined { depth } => depth.max(1),
    };
    let mut in_flight: VecDeque<TopologyHandle> = VecDeque::new();
    let mut progress = Progress::new(id);

    tracing::info!(pipeline = %id, flow = flow.name(), ?overlap, "Starting pipeline");

    loop {
        match overlap {
            Overlap::Sequential => progress.settle_all(&mut in_flight).await,
            Overlap::Pipelined { .. } => progress.settle_finished(&mut in_flight).await,
        }
        if progress.failure.is_some() {
            break;
        }

        match run_blocking(|| guard(&mut generator)) {
            Ok(Step::Continue) => {}
            Ok(Step::Done) => break,
            Err(error) => {
                progress.fail(FlowError::Generator(error));
                break;
            }
        }

        while in_flight.len() >= depth {
            if let Some(oldest) = in_flight.pop_front() {
                progress.settle(oldest).await;
            }
        }
        if progress.failure.is_some() {
            break;
        }

        let topology = executor.run_topology(flow.as_ref());
        progress.iterations += 1;
        executor.events().emit(ExecutionEvent::PipelineIteration {
            pipeline_id: id,
            iteration: progress.iterations,
            topology_id: topology.id(),
            timestamp: Utc::now(),
        });
        in_flight.push_back(topology);
    }

    progress.settle_all(&mut in_flight).await;

    if let Err(error) = run_blocking(|| guard(epilogue)) {
        progress.fail(FlowError::Epilogue(error));
    }
    progress.finish()
}

struct Progress {
    id: PipelineId,
    iterations: usize,
    nodes_executed: usize,
    failure: Option<FlowError>,
}

impl Progress {
    fn new(id: PipelineId) -> Self {
        Self {
            id,
            iterations: 0,
            nodes_executed: 0,
            failure: None,
        }
    }

    fn fail(&mut self, error: FlowError) {
        if self.failure.is_none() {
            tracing::error!(pipeline = %self.id, "Pipeline failed: {}", error);
            self.failure = Some(error);
        }
    }

    async fn settle(&mut self, topology: TopologyHandle) {
        match topology.wait().await {
            Ok(report) => self.nodes_executed += report.nodes_executed,
            Err(error) => self.fail(error),
        }
    }

    /// Collects iterations that already finished, oldest first.
    async fn settle_finished(&mut self, in_flight: &mut VecDeque<TopologyHandle>) {
        while in_flight.front().is_some_and(TopologyHandle::is_finished) {
            if let Some(topology) = in_flight.pop_front() {
                self.settle(topology).await;
            }
        }
    }

    async fn settle_all(&mut self, in_flight: &mut VecDeque<TopologyHandle>) {
        while let Some(topology) = in_flight.pop_front() {
            self.settle(topology).await;
        }
    }

    fn finish(self) -> Result<PipelineReport, FlowError> {
        match self.failure {
            Some(error) => Err(error),
            None => {
                tracing::info!(
                    pipeline = %self.id,
                    "Pipeline completed: {} iterations, {} nodes",
                    self.iterations,
                    self.nodes_executed
                );
                Ok(PipelineReport {
                    pipeline_id: self.id,
                    iterations: self.iterations,
                    nodes_executed: self.nodes_executed,
                })
            }
        }
    }
}
