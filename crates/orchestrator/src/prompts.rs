use codeloop_core::Artifact;

use crate::synthesis::RepairRequest;

/// Largest slice of failure logs sent back to the model.
const MAX_LOG_CHARS: usize = 6_000;

pub struct SynthesisPrompts;

impl SynthesisPrompts {
    pub fn system() -> &'static str {
        r#"You are an expert Python engineer. You turn algorithm descriptions into small, self-contained, verified Python modules.

Rules:
- Use only the Python standard library and numpy.
- Do not read files, open sockets, spawn processes or read from stdin.
- Tests are plain top-level `assert` statements that run after the code, in the same namespace.
- Reply with a single JSON object and nothing else."#
    }

    pub fn synthesize(specification: &str) -> String {
        format!(
            r#"Implement the following specification.

## Specification
{specification}

## Required Output
A JSON object with these keys:
- "code": the complete implementation
- "tests": assert-based tests that exercise the implementation, including edge cases
- "explanation": two or three sentences on the approach
- "mappings": optional object mapping concepts of the specification to the names in the code"#,
            specification = specification.trim()
        )
    }

    pub fn repair(request: &RepairRequest) -> String {
        format!(
            r#"Your previous implementation failed verification (attempt {iteration}). Fix it.

## Specification
{specification}

## Previous Code
```python
{code}
```

## Previous Tests
```python
{tests}
```

## Failure Logs
```
{logs}
```

## Instructions
1. Find the root cause in the logs
2. Fix the implementation; fix the tests only if they contradict the specification
3. Reply with the same JSON object shape: "code", "tests", "explanation""#,
            iteration = request.iteration,
            specification = request.specification.trim(),
            code = request.prior_code.trim_end(),
            tests = request.prior_tests.trim_end(),
            logs = tail(&request.failure_logs, MAX_LOG_CHARS)
        )
    }

    pub fn enrich(specification: &str, artifact: &Artifact) -> String {
        format!(
            r#"The following implementation passed its tests.

## Specification
{specification}

## Code
```python
{code}
```

Write a short walkthrough for a reader: how the algorithm works step by step, its time and space complexity, and one example input traced through the code. Plain markdown, no JSON."#,
            specification = specification.trim(),
            code = artifact.candidate.code.trim_end()
        )
    }
}

/// Keep the end of long logs; tracebacks put the cause last.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().skip(count - max_chars).collect();
    format!("[... {} earlier characters omitted]\n{}", count - max_chars, kept)
}
