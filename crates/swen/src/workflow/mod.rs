pub mod engine;
pub mod executor;
pub mod flow;
pub mod state;
pub mod step;

pub use engine::{ExecutionGraph, FlowExecutor, Visit};
pub use executor::StepOutcome;
pub use flow::Flow;
pub use state::RunState;
pub use step::{StatusObserver, StepDefinition, StepStatus};
