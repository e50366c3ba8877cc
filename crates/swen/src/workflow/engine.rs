use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::ExecutionConfig,
    workflow::{Flow, RunState, StepDefinition, StepOutcome},
    Error, Result,
};

/// A single step the executor was handed by the traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visit {
    pub step_id: String,
    pub visited_at: DateTime<Utc>,
}

/// Ordered, append-only record of the steps a run visited. Used for audit
/// only; routing never looks at it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionGraph {
    visits: Vec<Visit>,
}

impl ExecutionGraph {
    fn record(&mut self, step_id: &str) {
        self.visits.push(Visit {
            step_id: step_id.to_string(),
            visited_at: Utc::now(),
        });
    }

    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.visits.iter().map(|visit| visit.step_id.as_str()).collect()
    }

    pub fn last(&self) -> Option<&Visit> {
        self.visits.last()
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}

/// Drives one [`Flow`] to completion.
pub struct FlowExecutor {
    run_id: Uuid,
    flow: Flow,
    config: ExecutionConfig,
    graph: ExecutionGraph,
    state: RunState,
}

impl FlowExecutor {
    pub fn new(flow: Flow) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            flow,
            config: ExecutionConfig::default(),
            graph: ExecutionGraph::default(),
            state: RunState::Pending,
        }
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(Self::new(Flow::from_yaml(data)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Flow::from_path(path)?))
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn execution_graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// The visited steps, in visit order, as they are now.
    pub fn visited_steps(&self) -> Vec<&StepDefinition> {
        self.graph
            .visits()
            .iter()
            .filter_map(|visit| self.flow.step(&visit.step_id))
            .collect()
    }

    /// Runs the flow and returns the outcome of the last step that executed.
    ///
    /// A flow with no runnable steps returns an all-`None` outcome. Check
    /// [`FlowExecutor::state`] afterwards to tell a completed run from one
    /// halted by a failing step.
    pub fn execute(&mut self) -> Result<StepOutcome> {
        if self.state.is_final() || self.state == RunState::Running {
            return Err(Error::Execution(format!(
                "Flow run {} has already been executed (state: {})",
                self.run_id, self.state
            )));
        }

        let span = info_span!("flow", run_id = %self.run_id, flow = ?self.flow.id);
        let _enter = span.enter();

        info!("Executing flow with {} steps", self.flow.len());
        self.state = RunState::Running;

        match self.run() {
            Ok(outcome) => {
                info!(
                    "Flow finished: state={}, exit_code={:?}, visited={:?}",
                    self.state,
                    outcome.exit_code,
                    self.graph.step_ids()
                );
                Ok(outcome)
            }
            Err(e) => {
                error!("Flow execution failed: {}", e);
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    fn run(&mut self) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();

        while let Some(step) = self.flow.next_step()? {
            self.graph.record(&step.id);

            if step.is_placeholder() {
                debug!("Step {} has no command, skipping", step.id);
                continue;
            }

            outcome = step.execute(std::mem::take(&mut outcome), &self.config)?;

            if !outcome.is_success() && step.failure_target().is_none() {
                warn!(
                    "Step {} failed with exit code {:?} and has no on_failure step; halting",
                    step.id, outcome.exit_code
                );
                self.state = RunState::Halted;
                return Ok(outcome);
            }
        }

        self.state = RunState::Completed;
        Ok(outcome)
    }

    /// JSON audit of the run: id, state, visits and the flow as it ended.
    pub fn report(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "run_id": self.run_id.to_string(),
            "state": self.state.to_string(),
            "execution_graph": self.graph,
            "flow": self.flow.to_json()?,
        }))
    }
}
