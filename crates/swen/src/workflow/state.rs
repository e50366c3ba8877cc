use serde::Serialize;
use std::fmt;

/// Where a run stands. `Completed` means the traversal ran out of steps,
/// `Halted` that a failing step without an `on_failure` route stopped it,
/// and `Failed` that the run itself errored (e.g. a step could not launch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Completed,
    Halted,
    Failed,
}

impl RunState {
    /// A run in a final state has already used up its one execution.
    pub fn is_final(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Halted | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "Pending"),
            RunState::Running => write!(f, "Running"),
            RunState::Completed => write!(f, "Completed"),
            RunState::Halted => write!(f, "Halted"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_variant_names() {
        assert_eq!(RunState::Pending.to_string(), "Pending");
        assert_eq!(RunState::Halted.to_string(), "Halted");
        assert_eq!(RunState::Failed.to_string(), "Failed");
    }

    #[test]
    fn only_finished_runs_are_final() {
        assert!(!RunState::Pending.is_final());
        assert!(!RunState::Running.is_final());
        assert!(RunState::Completed.is_final());
        assert!(RunState::Halted.is_final());
        assert!(RunState::Failed.is_final());
    }
}
