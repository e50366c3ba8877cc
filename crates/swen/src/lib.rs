pub mod config;
pub mod document;
pub mod workflow;

pub use document::{FlowDocument, StepDocument};
pub use workflow::{
    ExecutionGraph, Flow, FlowExecutor, RunState, StatusObserver, StepDefinition, StepOutcome,
    StepStatus,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document error: {0}")]
    Document(#[from] serde_yaml::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to launch step '{step}' ({program}): {source}")]
    Launch {
        step: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Step '{0}' has already been executed")]
    AlreadyExecuted(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
