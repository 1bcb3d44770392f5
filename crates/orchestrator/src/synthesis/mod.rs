//! The synthesis collaborator: specification in, candidate out.

mod chat;
mod fallback;
mod parser;
mod types;

pub use chat::{ChatCompletionProvider, ProviderConfig};
pub use fallback::FallbackProvider;
pub use parser::{extract_json_from_response, parse_candidate, strip_code_fence};
pub use types::{ChatMessage, Role};

use async_trait::async_trait;
use codeloop_core::{Artifact, Candidate};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Everything a repair call gets to see about the failing iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub specification: String,
    pub prior_code: String,
    pub prior_tests: String,
    pub failure_logs: String,
    /// Iteration whose failure is being repaired.
    pub iteration: u32,
}

#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Label used in logs, e.g. the model id.
    fn name(&self) -> String;

    async fn synthesize(&self, specification: &str) -> Result<Candidate, ProviderError>;

    async fn repair(&self, request: &RepairRequest) -> Result<Candidate, ProviderError>;
}

/// Optional post-verification enrichment of a verified artifact.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, specification: &str, artifact: &Artifact)
        -> Result<String, ProviderError>;
}
