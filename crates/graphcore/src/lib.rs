//! Core abstractions for the task graph engine
//!
//! Graphs, the reusable [`Framework`] and [`WorkGroup`] that own them, the
//! run-time [`Subflow`] API, the lock-free [`spsc`] queue and the event
//! types. Nothing in here schedules work; see the `graphruntime` crate.

mod builder;
mod error;
pub mod events;
mod framework;
mod graph;
pub mod spsc;
mod subflow;
mod workgroup;

pub use builder::GraphBuilder;
pub use error::{FlowError, NodeError};
pub use events::*;
pub use framework::{Flow, Framework, TopologyId, TopologyRegistry};
pub use graph::{Graph, Node, StaticWork, SubflowWork, TaskHandle, TaskMut, Work};
pub use subflow::Subflow;
pub use workgroup::WorkGroup;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
