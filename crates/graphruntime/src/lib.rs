//! Task graph execution runtime
//!
//! This crate provides the executor that runs graphs on Tokio, the
//! per-launch topology lifecycle and the generator-driven pipeline.

mod executor;
mod pipeline;
mod runtime;
mod topology;

pub use executor::Executor;
pub use pipeline::{PipelineHandle, PipelineReport, Step};
pub use runtime::{GraphRuntime, RuntimeConfig};
pub use topology::{TopologyHandle, TopologyReport};
