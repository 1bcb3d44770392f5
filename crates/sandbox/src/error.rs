use thiserror::Error;

/// The guest runtime could not be brought up.
///
/// Cloneable because every caller waiting on a shared bootstrap receives the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("Failed to spawn guest runtime: {0}")]
    Spawn(String),

    #[error("Guest runtime could not load module '{module}': {reason}")]
    Preload { module: String, reason: String },

    #[error("Guest runtime handshake failed: {0}")]
    Handshake(String),

    #[error("Guest runtime did not become ready within {0}ms")]
    StartupTimeout(u64),

    #[error("Runtime was invalidated while it was bootstrapping")]
    Superseded,
}

/// A failure surfaced by the guest at host level, outside the driver's guarded blocks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostFault {
    #[error("Guest raised at host level: {message}")]
    Raised {
        message: String,
        /// Whatever the guest had written before raising
        output: String,
    },

    #[error("Guest runtime terminated: {0}")]
    Terminated(String),

    #[error("Execution exceeded the {0}ms wall-clock limit")]
    Timeout(u64),

    #[error("Malformed guest reply: {0}")]
    Protocol(String),
}

impl HostFault {
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised {
            message: message.into(),
            output: String::new(),
        }
    }

    /// Text the fault classifier inspects.
    pub fn detail(&self) -> &str {
        match self {
            Self::Raised { message, .. } => message,
            Self::Terminated(detail) | Self::Protocol(detail) => detail,
            Self::Timeout(_) => "",
        }
    }
}

/// Reasons [`crate::ExecutionSession::run`] refuses to produce a verdict.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("An execution is already in flight on this session")]
    Busy,

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_error_display() {
        let err = BootstrapError::Preload {
            module: "numpy".to_string(),
            reason: "ModuleNotFoundError".to_string(),
        };
        assert!(err.to_string().contains("numpy"));
    }

    #[test]
    fn test_execution_error_from_bootstrap() {
        let err: ExecutionError = BootstrapError::StartupTimeout(500).into();
        assert!(matches!(err, ExecutionError::Bootstrap(_)));
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn test_host_fault_detail() {
        assert_eq!(HostFault::raised("boom").detail(), "boom");
        assert_eq!(HostFault::Timeout(10).detail(), "");
    }
}
