use async_trait::async_trait;
use codeloop_core::Candidate;
use std::sync::Arc;
use tracing::warn;

use super::{RepairRequest, SynthesisProvider};
use crate::error::ProviderError;

/// Tries a primary provider and, on a fallback-eligible error, retries the
/// same call exactly once against a secondary one.
pub struct FallbackProvider {
    primary: Arc<dyn SynthesisProvider>,
    secondary: Arc<dyn SynthesisProvider>,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn SynthesisProvider>, secondary: Arc<dyn SynthesisProvider>) -> Self {
        Self { primary, secondary }
    }

    fn should_fall_back(&self, operation: &str, err: &ProviderError) -> bool {
        if !err.is_fallback_eligible() {
            return false;
        }
        warn!(
            operation,
            primary = %self.primary.name(),
            secondary = %self.secondary.name(),
            error = %err,
            "Primary provider unavailable, falling back"
        );
        true
    }
}

#[async_trait]
impl SynthesisProvider for FallbackProvider {
    fn name(&self) -> String {
        format!("{} (fallback: {})", self.primary.name(), self.secondary.name())
    }

    async fn synthesize(&self, specification: &str) -> Result<Candidate, ProviderError> {
        match self.primary.synthesize(specification).await {
            Err(e) if self.should_fall_back("synthesize", &e) => {
                self.secondary.synthesize(specification).await
            }
            outcome => outcome,
        }
    }

    async fn repair(&self, request: &RepairRequest) -> Result<Candidate, ProviderError> {
        match self.primary.repair(request).await {
            Err(e) if self.should_fall_back("repair", &e) => self.secondary.repair(request).await,
            outcome => outcome,
        }
    }
}
