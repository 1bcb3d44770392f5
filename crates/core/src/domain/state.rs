use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle of one orchestration run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    #[default]
    Analyzing,
    Synthesizing,
    Executing,
    Repairing,
    /// Optional enrichment of a verified artifact.
    Visualizing,
    Completed,
    Failed,
}

impl OrchestrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Synthesizing => "synthesizing",
            Self::Executing => "executing",
            Self::Repairing => "repairing",
            Self::Visualizing => "visualizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyzing" => Some(Self::Analyzing),
            "synthesizing" => Some(Self::Synthesizing),
            "executing" => Some(Self::Executing),
            "repairing" => Some(Self::Repairing),
            "visualizing" => Some(Self::Visualizing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrchestrationState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownState(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(OrchestrationState::Completed.is_terminal());
        assert!(OrchestrationState::Failed.is_terminal());
        assert!(!OrchestrationState::Repairing.is_terminal());
        assert!(!OrchestrationState::Visualizing.is_terminal());
    }

    #[test]
    fn test_parse_roundtrip_names() {
        for state in [
            OrchestrationState::Analyzing,
            OrchestrationState::Synthesizing,
            OrchestrationState::Executing,
            OrchestrationState::Repairing,
            OrchestrationState::Visualizing,
            OrchestrationState::Completed,
            OrchestrationState::Failed,
        ] {
            assert_eq!(OrchestrationState::parse(state.as_str()), Some(state));
        }
        assert!("idle".parse::<OrchestrationState>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&OrchestrationState::Repairing).unwrap();
        assert_eq!(json, "\"repairing\"");
    }
}
