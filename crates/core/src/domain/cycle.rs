use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Candidate;
use super::execution::{ExecutionResult, FailureKind};

pub const MAX_SCORE: u8 = 100;

const FAILED_BASE_SCORE: u32 = 10;
const FAILED_STEP_SCORE: u32 = 15;
const FAILED_SCORE_CAP: u32 = 85;

/// Stability/parity percentage shown next to an iteration.
///
/// Purely a progress indicator: a failed iteration scores low and creeps up with the
/// iteration count, a passing one scores [`MAX_SCORE`].
pub fn parity_score(iteration: u32, passed: bool) -> u8 {
    if passed {
        return MAX_SCORE;
    }
    let steps = iteration.saturating_sub(1);
    let score = FAILED_BASE_SCORE
        .saturating_add(FAILED_STEP_SCORE.saturating_mul(steps))
        .min(FAILED_SCORE_CAP);
    score as u8
}

/// History entry for one synthesize/execute cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// 1-based iteration index.
    pub iteration: u32,
    pub candidate: String,
    pub tests: String,
    pub explanation: String,
    /// Sanitized logs of the run; present iff the iteration failed.
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub score: u8,
    pub recorded_at: DateTime<Utc>,
}

impl CycleRecord {
    pub fn new(iteration: u32, candidate: &Candidate, result: &ExecutionResult) -> Self {
        let error = if result.passed {
            None
        } else {
            Some(result.logs.clone())
        };
        Self {
            iteration,
            candidate: candidate.code.clone(),
            tests: candidate.tests.clone(),
            explanation: candidate.explanation.clone(),
            error,
            failure: result.failure,
            score: parity_score(iteration, result.passed),
            recorded_at: Utc::now(),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}
