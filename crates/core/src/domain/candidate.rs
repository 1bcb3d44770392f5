use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::execution::ExecutionResult;
use crate::error::CoreError;

/// Generated source under verification, together with its tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub tests: String,
    #[serde(default)]
    pub explanation: String,
    /// Optional concept-to-code mapping some providers return alongside the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_mappings: Option<BTreeMap<String, String>>,
}

impl Candidate {
    pub fn new(
        code: impl Into<String>,
        tests: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            tests: tests.into(),
            explanation: explanation.into(),
            auxiliary_mappings: None,
        }
    }

    pub fn with_auxiliary_mappings(mut self, mappings: BTreeMap<String, String>) -> Self {
        self.auxiliary_mappings = Some(mappings);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.code.trim().is_empty() {
            return Err(CoreError::Validation("candidate code is empty".to_string()));
        }
        Ok(())
    }
}

/// The deliverable of an orchestration run: the last candidate and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub candidate: Candidate,
    pub result: ExecutionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<String>,
}

impl Artifact {
    pub fn new(candidate: Candidate, result: ExecutionResult) -> Self {
        Self {
            candidate,
            result,
            enrichment: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.result.passed
    }
}
