mod candidate;
mod cycle;
mod execution;
mod state;

pub use candidate::{Artifact, Candidate};
pub use cycle::{parity_score, CycleRecord, MAX_SCORE};
pub use execution::{
    ExecutionRequest, ExecutionResult, FailureKind, VariablePreview, FATAL_ENGINE_PREFIX,
    MAX_PREVIEW_CHARS,
};
pub use state::OrchestrationState;
