//! Classification of host-level guest faults.
//!
//! The guest runtime reports trouble in three shapes: a script error caught
//! inside the driver (never seen here), a host-level fault that leaves the
//! runtime usable, and a fault that means the runtime can no longer be trusted.
//! This module decides between the last two.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{BootstrapError, HostFault};

/// Closed set of failure classes a run can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Script-level trouble; the runtime stays up and the repair loop handles it.
    Transient,
    /// The runtime is corrupted or gone and must be rebuilt from zero.
    Fatal,
    /// The runtime never came up.
    Bootstrap,
}

/// Named markers whose presence in a host-level fault means the runtime is unusable.
const FATAL_PATTERNS: &[(&str, &str)] = &[
    ("table_out_of_bounds", r"(?i)\b(table )?index out of bounds"),
    ("memory_out_of_bounds", r"(?i)memory access out of bounds"),
    ("fatal_interpreter_error", r"(?i)\bfatal (python )?error\b"),
    (
        "recursion_exhausted",
        r"(?i)maximum recursion depth exceeded|too much recursion|stack overflow",
    ),
    ("segmentation_fault", r"(?i)segmentation fault|\bsigsegv\b"),
    ("unreachable_executed", r"(?i)\bunreachable (code )?(executed|reached)\b"),
    ("out_of_memory", r"\bMemoryError\b|(?i)out of memory"),
];

static COMPILED: OnceLock<Vec<(&'static str, Option<Regex>)>> = OnceLock::new();

fn compiled() -> &'static [(&'static str, Option<Regex>)] {
    COMPILED.get_or_init(|| {
        FATAL_PATTERNS
            .iter()
            .map(|(name, pattern)| (*name, Regex::new(pattern).ok()))
            .collect()
    })
}

/// Name of the first fatal marker found in `text`, if any.
pub fn fatal_marker(text: &str) -> Option<&'static str> {
    compiled().iter().find_map(|(name, regex)| {
        regex
            .as_ref()
            .filter(|re| re.is_match(text))
            .map(|_| *name)
    })
}

/// Outcome of classifying one host-level fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: FaultClass,
    /// Why the fault was judged fatal, for logs.
    pub reason: Option<&'static str>,
}

impl Classification {
    pub fn is_fatal(&self) -> bool {
        self.class == FaultClass::Fatal
    }
}

/// Classify a host-level fault.
///
/// A lost, hung, or incoherent runtime is always fatal. A raised error is fatal
/// only when it carries one of the [`FATAL_PATTERNS`] markers.
pub fn classify(fault: &HostFault) -> Classification {
    let (class, reason) = match fault {
        HostFault::Terminated(_) => (FaultClass::Fatal, Some("runtime_terminated")),
        HostFault::Timeout(_) => (FaultClass::Fatal, Some("wall_clock_exceeded")),
        HostFault::Protocol(_) => (FaultClass::Fatal, Some("protocol_desync")),
        HostFault::Raised { message, .. } => match fatal_marker(message) {
            Some(marker) => (FaultClass::Fatal, Some(marker)),
            None => (FaultClass::Transient, None),
        },
    };
    Classification { class, reason }
}

/// Bootstrap failures are their own class: nothing ran, nothing to invalidate.
pub fn classify_bootstrap(error: &BootstrapError) -> Classification {
    let reason = match error {
        BootstrapError::InterpreterNotFound(_) => "interpreter_not_found",
        BootstrapError::Spawn(_) => "spawn_failed",
        BootstrapError::Preload { .. } => "preload_failed",
        BootstrapError::Handshake(_) => "handshake_failed",
        BootstrapError::StartupTimeout(_) => "startup_timeout",
        BootstrapError::Superseded => "superseded",
    };
    Classification {
        class: FaultClass::Bootstrap,
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_runtime_is_fatal() {
        assert!(classify(&HostFault::Terminated("exit status: 1".into())).is_fatal());
        assert!(classify(&HostFault::Timeout(1000)).is_fatal());
        assert!(classify(&HostFault::Protocol("not json".into())).is_fatal());
    }

    #[test]
    fn test_raised_with_marker_is_fatal() {
        let cases = [
            ("RuntimeError: index out of bounds", "table_out_of_bounds"),
            ("RuntimeError: memory access out of bounds", "memory_out_of_bounds"),
            ("Fatal Python error: Cannot recover from stack overflow.", "fatal_interpreter_error"),
            ("RecursionError: maximum recursion depth exceeded", "recursion_exhausted"),
            ("Segmentation fault (core dumped)", "segmentation_fault"),
            ("RuntimeError: unreachable executed", "unreachable_executed"),
            ("MemoryError", "out_of_memory"),
        ];
        for (message, marker) in cases {
            let classification = classify(&HostFault::raised(message));
            assert!(classification.is_fatal(), "{message}");
            assert_eq!(classification.reason, Some(marker), "{message}");
        }
    }

    #[test]
    fn test_ordinary_raise_is_transient() {
        let classification = classify(&HostFault::raised(
            "Traceback (most recent call last):\nKeyboardInterrupt",
        ));
        assert_eq!(classification.class, FaultClass::Transient);
        assert_eq!(classification.reason, None);
    }

    #[test]
    fn test_marker_match_is_case_insensitive() {
        assert_eq!(fatal_marker("SEGMENTATION FAULT"), Some("segmentation_fault"));
        assert_eq!(fatal_marker("all good"), None);
    }

    #[test]
    fn test_bootstrap_class() {
        let classification = classify_bootstrap(&BootstrapError::StartupTimeout(10));
        assert_eq!(classification.class, FaultClass::Bootstrap);
        assert!(!classification.is_fatal());
    }

    #[test]
    fn test_all_patterns_compile() {
        assert!(compiled().iter().all(|(_, regex)| regex.is_some()));
    }
}
