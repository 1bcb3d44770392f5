//! Line-tag protocol between the driver script and the host.
//!
//! The guest only speaks through its output stream, so structured signals travel
//! as tagged lines: `@@codeloop/<version>/<nonce>/<KIND>[ <payload>]`. The nonce
//! is fresh per run, so candidate output cannot forge or collide with a tag.
//! Parsing never fails: missing tags fall back to safe defaults.

use codeloop_core::{ExecutionResult, FailureKind, VariablePreview, MAX_PREVIEW_CHARS};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

pub const TAG_ROOT: &str = "@@codeloop";
pub const PROTOCOL_VERSION: u32 = 1;

const NO_MARKER_NOTE: &str = "[codeloop] run ended without a verification marker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Passed,
    ImplementationError,
    TestFailure,
    Variables,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::ImplementationError => "IMPLEMENTATION_ERROR",
            Self::TestFailure => "TEST_FAILURE",
            Self::Variables => "VARIABLES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASSED" => Some(Self::Passed),
            "IMPLEMENTATION_ERROR" => Some(Self::ImplementationError),
            "TEST_FAILURE" => Some(Self::TestFailure),
            "VARIABLES" => Some(Self::Variables),
            _ => None,
        }
    }
}

/// Tag vocabulary for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagProtocol {
    prefix: String,
}

impl TagProtocol {
    /// A protocol instance with a fresh random nonce.
    pub fn new() -> Self {
        Self::with_nonce(Uuid::new_v4().simple().to_string())
    }

    pub fn with_nonce(nonce: impl AsRef<str>) -> Self {
        Self {
            prefix: format!("{}/{}/{}/", TAG_ROOT, PROTOCOL_VERSION, nonce.as_ref()),
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn from_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn marker(&self, tag: Tag) -> String {
        format!("{}{}", self.prefix, tag.as_str())
    }

    /// Split captured output into structured signals and clean logs.
    pub fn parse(&self, captured: &str) -> CapturedOutput {
        let mut parsed = CapturedOutput::default();
        let mut kept: Vec<&str> = Vec::new();

        for raw in captured.lines() {
            let line = raw.trim_end_matches('\r');
            let Some(position) = line.find(&self.prefix) else {
                kept.push(line);
                continue;
            };

            // Output written without a trailing newline ends up in front of the tag.
            let before = &line[..position];
            if !before.is_empty() {
                kept.push(before);
            }

            let rest = &line[position + self.prefix.len()..];
            let (name, payload) = match rest.split_once(' ') {
                Some((name, payload)) => (name, Some(payload)),
                None => (rest.trim_end(), None),
            };

            match Tag::parse(name) {
                Some(Tag::Passed) => parsed.tests_passed = true,
                Some(Tag::ImplementationError) => parsed.implementation_error = true,
                Some(Tag::TestFailure) => parsed.test_failure = true,
                Some(Tag::Variables) => {
                    parsed.variables = decode_variables(payload.unwrap_or_default());
                    parsed.snapshot_seen = true;
                }
                None => debug!(tag = %name, "Dropping unknown protocol tag"),
            }
        }

        while kept.last().is_some_and(|line| line.trim().is_empty()) {
            kept.pop();
        }
        parsed.logs = kept.join("\n");
        parsed
    }
}

impl Default for TagProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    name: String,
    #[serde(rename = "type", default)]
    type_name: String,
    #[serde(default)]
    preview: String,
}

fn decode_variables(payload: &str) -> Vec<VariablePreview> {
    match serde_json::from_str::<Vec<RawVariable>>(payload.trim()) {
        Ok(raw) => raw
            .into_iter()
            .map(|v| VariablePreview::new(v.name, v.type_name, v.preview))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Variable snapshot was not valid JSON, ignoring it");
            Vec::new()
        }
    }
}

/// Signals recovered from one run's captured output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub tests_passed: bool,
    pub implementation_error: bool,
    pub test_failure: bool,
    pub snapshot_seen: bool,
    pub variables: Vec<VariablePreview>,
    /// Captured text with every protocol line removed.
    pub logs: String,
}

impl CapturedOutput {
    pub fn passed(&self) -> bool {
        self.tests_passed && !self.implementation_error
    }

    pub fn into_result(self, max_preview_chars: usize) -> ExecutionResult {
        let max_preview_chars = max_preview_chars.min(MAX_PREVIEW_CHARS);
        let passed = self.passed();
        let variables = self
            .variables
            .into_iter()
            .map(|v| v.bounded(max_preview_chars))
            .collect();

        if passed {
            return ExecutionResult::passed(self.logs, variables);
        }

        if self.implementation_error {
            return ExecutionResult::failed(FailureKind::ImplementationError, self.logs, variables);
        }

        let logs = if self.test_failure {
            self.logs
        } else if self.logs.is_empty() {
            NO_MARKER_NOTE.to_string()
        } else {
            format!("{}\n{}", self.logs, NO_MARKER_NOTE)
        };
        ExecutionResult::failed(FailureKind::VerificationFailure, logs, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> TagProtocol {
        TagProtocol::with_nonce("abc123")
    }

    #[test]
    fn test_marker_format() {
        assert_eq!(
            protocol().marker(Tag::Passed),
            "@@codeloop/1/abc123/PASSED"
        );
    }

    #[test]
    fn test_fresh_nonce_per_protocol() {
        assert_ne!(TagProtocol::new().prefix(), TagProtocol::new().prefix());
    }

    #[test]
    fn test_parse_success_strips_tags() {
        let p = protocol();
        let captured = format!(
            "hello\n{}\n{} [{{\"name\":\"add\",\"type\":\"function\",\"preview\":\"<function add>\"}}]\n",
            p.marker(Tag::Passed),
            p.marker(Tag::Variables)
        );

        let parsed = p.parse(&captured);
        assert!(parsed.passed());
        assert_eq!(parsed.logs, "hello");
        assert_eq!(parsed.variables.len(), 1);
        assert_eq!(parsed.variables[0].type_name, "function");
        assert!(!parsed.logs.contains(TAG_ROOT));
    }

    #[test]
    fn test_implementation_error_wins_over_passed() {
        let p = protocol();
        let captured = format!(
            "{}\nTraceback...\n{}\n",
            p.marker(Tag::ImplementationError),
            p.marker(Tag::Passed)
        );
        let result = p.parse(&captured).into_result(MAX_PREVIEW_CHARS);
        assert!(!result.passed);
        assert_eq!(result.failure, Some(FailureKind::ImplementationError));
        assert_eq!(result.logs, "Traceback...");
    }

    #[test]
    fn test_missing_markers_default_to_failure() {
        let result = protocol().parse("just output").into_result(MAX_PREVIEW_CHARS);
        assert!(!result.passed);
        assert_eq!(result.failure, Some(FailureKind::VerificationFailure));
        assert!(result.logs.starts_with("just output"));
        assert!(result.logs.contains(NO_MARKER_NOTE));
    }

    #[test]
    fn test_malformed_snapshot_is_tolerated() {
        let p = protocol();
        let captured = format!("{}\n{} {{not json", p.marker(Tag::Passed), p.marker(Tag::Variables));
        let parsed = p.parse(&captured);
        assert!(parsed.passed());
        assert!(parsed.snapshot_seen);
        assert!(parsed.variables.is_empty());
    }

    #[test]
    fn test_tag_after_unterminated_output() {
        let p = protocol();
        let captured = format!("partial{}\n", p.marker(Tag::Passed));
        let parsed = p.parse(&captured);
        assert!(parsed.passed());
        assert_eq!(parsed.logs, "partial");
    }

    #[test]
    fn test_foreign_nonce_is_plain_output() {
        let forged = TagProtocol::with_nonce("forged").marker(Tag::Passed);
        let parsed = protocol().parse(&forged);
        assert!(!parsed.passed());
        assert_eq!(parsed.logs, forged);
    }

    #[test]
    fn test_previews_rebounded_on_result() {
        let p = protocol();
        let captured = format!(
            "{}\n{} [{{\"name\":\"s\",\"type\":\"str\",\"preview\":\"abcdefgh\"}}]",
            p.marker(Tag::Passed),
            p.marker(Tag::Variables)
        );
        let result = p.parse(&captured).into_result(3);
        assert_eq!(result.variables[0].preview, "abc...");
    }
}
