//! Driver script wrapped around every candidate-and-tests pair.
//!
//! The driver runs the candidate in a guarded block, runs the tests in a second
//! guarded block only if the candidate ran cleanly, and finishes with a bounded
//! scan of the values the run left in scope. All results travel as tagged lines
//! (see [`crate::protocol`]).

use codeloop_core::{ExecutionRequest, MAX_PREVIEW_CHARS};
use serde_json::Value;

use crate::protocol::TagProtocol;

const TAG_VAR: &str = "_cl_tag = ";
const CANDIDATE_VAR: &str = "_cl_candidate = ";
const TESTS_VAR: &str = "_cl_tests = ";

const DRIVER_BODY: &str = r#"
_cl_scope = {"__name__": "__main__", "__builtins__": __builtins__}
_cl_out = _cl_sys.stdout
_cl_write = _cl_out.write


def _cl_emit(kind, payload=None):
    line = _cl_tag + kind if payload is None else _cl_tag + kind + " " + payload
    _cl_write(line + "\n")


_cl_implementation_ok = True
try:
    exec(compile(_cl_candidate, "<candidate>", "exec"), _cl_scope)
except BaseException:
    _cl_implementation_ok = False
    _cl_emit("IMPLEMENTATION_ERROR")
    _cl_traceback.print_exc(file=_cl_out)

if _cl_implementation_ok:
    try:
        exec(compile(_cl_tests, "<tests>", "exec"), _cl_scope)
    except BaseException:
        _cl_emit("TEST_FAILURE")
        _cl_traceback.print_exc(file=_cl_out)
    else:
        _cl_emit("PASSED")


def _cl_snapshot(scope, limit, max_chars, max_depth, excluded):
    shaper = _cl_reprlib.Repr()
    shaper.maxlevel = max_depth
    shaper.maxstring = max_chars
    shaper.maxother = max_chars
    entries = []
    for name, value in list(scope.items()):
        if len(entries) >= limit:
            break
        if name.startswith("__") and name.endswith("__"):
            continue
        if name.startswith(excluded) or isinstance(value, _cl_types.ModuleType):
            continue
        try:
            preview = shaper.repr(value)[:max_chars]
            entries.append({"name": name, "type": type(value).__name__, "preview": preview})
        except BaseException:
            continue
    return entries


try:
    _cl_emit(
        "VARIABLES",
        _cl_json.dumps(
            _cl_snapshot(_cl_scope, %MAX_VARIABLES%, %MAX_PREVIEW%, %MAX_DEPTH%, tuple(%EXCLUDED%))
        ),
    )
except BaseException:
    pass
finally:
    _cl_scope.clear()
"#;

/// Bounds on the post-run variable scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLimits {
    pub max_variables: usize,
    pub max_preview_chars: usize,
    pub max_depth: usize,
    /// Names starting with any of these are never reported.
    pub excluded_prefixes: Vec<String>,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_variables: 64,
            max_preview_chars: MAX_PREVIEW_CHARS,
            max_depth: 3,
            excluded_prefixes: vec!["_".to_string()],
        }
    }
}

impl SnapshotLimits {
    pub fn with_max_variables(mut self, max: usize) -> Self {
        self.max_variables = max;
        self
    }

    pub fn with_max_preview_chars(mut self, max: usize) -> Self {
        self.max_preview_chars = max.min(MAX_PREVIEW_CHARS);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_excluded_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.excluded_prefixes = prefixes;
        self
    }
}

/// Renders the driver for one run.
pub struct DriverScript<'a> {
    protocol: &'a TagProtocol,
    limits: &'a SnapshotLimits,
}

impl<'a> DriverScript<'a> {
    pub fn new(protocol: &'a TagProtocol, limits: &'a SnapshotLimits) -> Self {
        Self { protocol, limits }
    }

    pub fn render(&self, request: &ExecutionRequest) -> String {
        let excluded = Value::Array(
            self.limits
                .excluded_prefixes
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        );

        let body = DRIVER_BODY
            .replace("%MAX_VARIABLES%", &self.limits.max_variables.to_string())
            .replace(
                "%MAX_PREVIEW%",
                &self.limits.max_preview_chars.min(MAX_PREVIEW_CHARS).to_string(),
            )
            .replace("%MAX_DEPTH%", &self.limits.max_depth.max(1).to_string())
            .replace("%EXCLUDED%", &excluded.to_string());

        let mut script = String::with_capacity(
            body.len() + request.candidate_source.len() + request.test_source.len() + 256,
        );
        script.push_str("import json as _cl_json\n");
        script.push_str("import reprlib as _cl_reprlib\n");
        script.push_str("import sys as _cl_sys\n");
        script.push_str("import traceback as _cl_traceback\n");
        script.push_str("import types as _cl_types\n\n");
        push_assignment(&mut script, TAG_VAR, self.protocol.prefix());
        push_assignment(&mut script, CANDIDATE_VAR, &request.candidate_source);
        push_assignment(&mut script, TESTS_VAR, &request.test_source);
        script.push_str(&body);
        script
    }
}

/// A JSON string literal is also a valid Python string literal.
fn push_assignment(script: &mut String, var: &str, value: &str) {
    script.push_str(var);
    script.push_str(&Value::String(value.to_string()).to_string());
    script.push('\n');
}

/// What a rendered driver carries, recovered from its text.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedRun {
    pub protocol: TagProtocol,
    pub request: ExecutionRequest,
}

#[cfg(any(test, feature = "test-util"))]
impl EmbeddedRun {
    pub fn parse(script: &str) -> Option<Self> {
        let mut prefix = None;
        let mut candidate = None;
        let mut tests = None;

        for line in script.lines() {
            if let Some(rest) = line.strip_prefix(TAG_VAR) {
                prefix = serde_json::from_str::<String>(rest).ok();
            } else if let Some(rest) = line.strip_prefix(CANDIDATE_VAR) {
                candidate = serde_json::from_str::<String>(rest).ok();
            } else if let Some(rest) = line.strip_prefix(TESTS_VAR) {
                tests = serde_json::from_str::<String>(rest).ok();
            }
        }

        Some(Self {
            protocol: TagProtocol::from_prefix(prefix?),
            request: ExecutionRequest::new(candidate?, tests?),
        })
    }
}
