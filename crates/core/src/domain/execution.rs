use serde::{Deserialize, Serialize};

/// Upper bound on a variable preview, enforced host-side whatever the guest sends.
pub const MAX_PREVIEW_CHARS: usize = 200;

/// Prefix placed in front of the logs of a run that corrupted the runtime.
pub const FATAL_ENGINE_PREFIX: &str = "FATAL_ENGINE_ERROR";

/// One candidate-and-tests pair handed to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub candidate_source: String,
    pub test_source: String,
}

impl ExecutionRequest {
    pub fn new(candidate_source: impl Into<String>, test_source: impl Into<String>) -> Self {
        Self {
            candidate_source: candidate_source.into(),
            test_source: test_source.into(),
        }
    }
}

/// Why a run did not pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The candidate itself raised.
    ImplementationError,
    /// The candidate ran but its tests raised or never reported success.
    VerificationFailure,
    /// The driver raised at host level without damaging the runtime.
    HostFault,
    /// The runtime is corrupted or gone; it has been invalidated.
    FatalEngineError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImplementationError => "implementation_error",
            Self::VerificationFailure => "verification_failure",
            Self::HostFault => "host_fault",
            Self::FatalEngineError => "fatal_engine_error",
        }
    }

    /// Whether the repair loop may feed this failure back to synthesis.
    pub fn is_repairable(&self) -> bool {
        !matches!(self, Self::FatalEngineError)
    }
}

/// Display-safe summary of one value left in scope after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablePreview {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub preview: String,
}

impl VariablePreview {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        preview: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            preview: truncate_preview(preview.into(), MAX_PREVIEW_CHARS),
        }
    }

    /// Re-apply a (possibly tighter) preview bound.
    pub fn bounded(mut self, max_chars: usize) -> Self {
        self.preview = truncate_preview(self.preview, max_chars.min(MAX_PREVIEW_CHARS));
        self
    }
}

fn truncate_preview(preview: String, max_chars: usize) -> String {
    if preview.chars().count() <= max_chars {
        return preview;
    }
    let mut truncated: String = preview.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

/// Verdict of a single sandboxed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub passed: bool,
    pub logs: String,
    #[serde(default)]
    pub variables: Vec<VariablePreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn passed(logs: impl Into<String>, variables: Vec<VariablePreview>) -> Self {
        Self {
            passed: true,
            logs: logs.into(),
            variables,
            failure: None,
            duration_ms: 0,
        }
    }

    pub fn failed(
        kind: FailureKind,
        logs: impl Into<String>,
        variables: Vec<VariablePreview>,
    ) -> Self {
        Self {
            passed: false,
            logs: logs.into(),
            variables,
            failure: Some(kind),
            duration_ms: 0,
        }
    }

    /// A failed result for a runtime-fatal fault. Logs carry [`FATAL_ENGINE_PREFIX`].
    pub fn fatal(detail: impl AsRef<str>) -> Self {
        let detail = detail.as_ref().trim();
        let logs = if detail.is_empty() {
            FATAL_ENGINE_PREFIX.to_string()
        } else {
            format!("{}: {}", FATAL_ENGINE_PREFIX, detail)
        };
        Self::failed(FailureKind::FatalEngineError, logs, Vec::new())
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.failure == Some(FailureKind::FatalEngineError)
    }
}
