use crate::TopologyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type PipelineId = Uuid;

/// Events emitted while topologies and pipelines run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    TopologyStarted {
        topology_id: TopologyId,
        flow: String,
        num_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    TopologyCompleted {
        topology_id: TopologyId,
        success: bool,
        nodes_executed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        topology_id: TopologyId,
        node: usize,
        name: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        topology_id: TopologyId,
        node: usize,
        name: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        topology_id: TopologyId,
        node: usize,
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    SubflowSpawned {
        topology_id: TopologyId,
        parent: usize,
        num_nodes: usize,
        detached: bool,
        timestamp: DateTime<Utc>,
    },
    PipelineIteration {
        pipeline_id: PipelineId,
        iteration: usize,
        topology_id: TopologyId,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for execution events. Emitting with no subscriber is a no-op.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
