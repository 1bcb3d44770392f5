use codeloop_core::OrchestrationState;

use crate::error::{OrchestratorError, Result};

/// Legal moves of one orchestration run.
pub struct RunStateMachine;

impl RunStateMachine {
    pub fn validate_transition(from: &OrchestrationState, to: &OrchestrationState) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &OrchestrationState) -> Vec<OrchestrationState> {
        use OrchestrationState::*;

        match from {
            Analyzing => vec![Synthesizing, Failed],
            Synthesizing => vec![Executing, Failed],
            Executing => vec![Completed, Visualizing, Repairing, Failed],
            Repairing => vec![Executing, Failed],
            Visualizing => vec![Completed],
            Completed | Failed => vec![],
        }
    }

    pub fn can_transition(from: &OrchestrationState, to: &OrchestrationState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

/// Current state of a run plus the path it took to get there.
#[derive(Debug, Clone)]
pub struct RunState {
    current: OrchestrationState,
    trail: Vec<OrchestrationState>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            current: OrchestrationState::Analyzing,
            trail: vec![OrchestrationState::Analyzing],
        }
    }

    pub fn current(&self) -> OrchestrationState {
        self.current
    }

    pub fn trail(&self) -> &[OrchestrationState] {
        &self.trail
    }

    /// Move to `to`, returning the state left behind.
    pub fn advance(&mut self, to: OrchestrationState) -> Result<OrchestrationState> {
        RunStateMachine::validate_transition(&self.current, &to)?;
        let from = std::mem::replace(&mut self.current, to);
        self.trail.push(to);
        Ok(from)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
