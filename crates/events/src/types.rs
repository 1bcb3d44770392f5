//! Event types for the codeloop progress stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the emitting run's stream (0 when unsequenced)
    #[serde(default)]
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Create an envelope stamped with a stream position
    pub fn sequenced(event: Event, sequence: u64) -> Self {
        Self {
            sequence,
            ..Self::new(event)
        }
    }
}

/// All possible progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An orchestration run was accepted
    #[serde(rename = "run.started")]
    RunStarted { run_id: Uuid, max_iterations: u32 },

    /// The run entered a new state
    #[serde(rename = "run.state_changed")]
    StateChanged {
        run_id: Uuid,
        from: Option<String>,
        state: String,
        message: String,
    },

    /// One execute cycle finished
    #[serde(rename = "run.iteration")]
    IterationCompleted {
        run_id: Uuid,
        iteration: u32,
        passed: bool,
        score: u8,
        message: String,
    },

    /// The run reached a terminal state
    #[serde(rename = "run.finished")]
    RunFinished {
        run_id: Uuid,
        state: String,
        cause: Option<String>,
    },

    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the run ID associated with this event, if any
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Event::RunStarted { run_id, .. } => Some(*run_id),
            Event::StateChanged { run_id, .. } => Some(*run_id),
            Event::IterationCompleted { run_id, .. } => Some(*run_id),
            Event::RunFinished { run_id, .. } => Some(*run_id),
            Event::Error { .. } => None,
        }
    }

    /// The state this event reports, if it reports one
    pub fn state(&self) -> Option<&str> {
        match self {
            Event::StateChanged { state, .. } | Event::RunFinished { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Human-readable one-liner for progress displays
    pub fn message(&self) -> String {
        match self {
            Event::RunStarted { max_iterations, .. } => {
                format!("Run started (up to {} iterations)", max_iterations)
            }
            Event::StateChanged { message, .. } => message.clone(),
            Event::IterationCompleted { message, .. } => message.clone(),
            Event::RunFinished { state, cause, .. } => match cause {
                Some(cause) => format!("Run {}: {}", state, cause),
                None => format!("Run {}", state),
            },
            Event::Error { message, .. } => message.clone(),
        }
    }
}
