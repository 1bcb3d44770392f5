pub mod convergence;
pub mod emitter;
pub mod error;
pub mod prompts;
pub mod state_machine;
pub mod synthesis;

pub use convergence::{
    ConvergenceConfig, ConvergenceOrchestrator, OrchestrationReport, MAX_ITERATION_CEILING,
};
pub use emitter::OrderedEventEmitter;
pub use error::{OrchestratorError, ProviderError, Result};
pub use state_machine::{RunState, RunStateMachine};
pub use synthesis::{
    ChatCompletionProvider, Enricher, FallbackProvider, ProviderConfig, RepairRequest,
    SynthesisProvider,
};
