use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Task '{task}' failed: {source}")]
    Task {
        task: String,
        #[source]
        source: NodeError,
    },

    #[error("Generator failed: {0}")]
    Generator(NodeError),

    #[error("Epilogue failed: {0}")]
    Epilogue(NodeError),

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Error raised by a task body, a pipeline generator or an epilogue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }
}
