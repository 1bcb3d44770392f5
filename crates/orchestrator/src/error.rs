use sandbox::BootstrapError;
use thiserror::Error;

/// Failure of the synthesis collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Provider denied access: {0}")]
    PermissionDenied(String),

    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Provider API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Errors a lower-tier model may get past: throttling, access and availability.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::PermissionDenied(_)
                | Self::QuotaExceeded(_)
                | Self::NotFound(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Specification is empty")]
    EmptySpecification,

    #[error("Synthesis failed: {0}")]
    Synthesis(#[from] ProviderError),

    #[error("Sandbox unavailable: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("An execution is already in flight")]
    ExecutionBusy,

    #[error("Runtime corrupted at iteration {iteration}: {logs}")]
    FatalEngine { iteration: u32, logs: String },

    #[error("No passing candidate after {iterations} iterations")]
    ConvergenceExhausted { iterations: u32, logs: String },
}

impl OrchestratorError {
    /// Human-readable cause reported with a FAILED run.
    ///
    /// Iteration failures report the last captured logs verbatim.
    pub fn cause(&self) -> String {
        match self {
            Self::FatalEngine { logs, .. } | Self::ConvergenceExhausted { logs, .. } => {
                logs.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<sandbox::ExecutionError> for OrchestratorError {
    fn from(err: sandbox::ExecutionError) -> Self {
        match err {
            sandbox::ExecutionError::Busy => Self::ExecutionBusy,
            sandbox::ExecutionError::Bootstrap(e) => Self::Bootstrap(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_eligibility() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_fallback_eligible());
        assert!(ProviderError::PermissionDenied("403".into()).is_fallback_eligible());
        assert!(ProviderError::QuotaExceeded("402".into()).is_fallback_eligible());
        assert!(ProviderError::NotFound("model".into()).is_fallback_eligible());
        assert!(!ProviderError::MalformedResponse("no json".into()).is_fallback_eligible());
        assert!(!ProviderError::Api {
            message: "boom".into(),
            status_code: Some(500)
        }
        .is_fallback_eligible());
    }

    #[test]
    fn test_cause_carries_logs_verbatim() {
        let err = OrchestratorError::ConvergenceExhausted {
            iterations: 3,
            logs: "AssertionError".into(),
        };
        assert_eq!(err.cause(), "AssertionError");
        assert_eq!(
            OrchestratorError::EmptySpecification.cause(),
            "Specification is empty"
        );
    }

    #[test]
    fn test_execution_error_mapping() {
        let err: OrchestratorError = sandbox::ExecutionError::Busy.into();
        assert!(matches!(err, OrchestratorError::ExecutionBusy));
    }
}
