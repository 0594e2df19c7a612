mod bus;

pub use bus::{EventBus, ExecutionEvent, PipelineId};
