//! Single-flight execution of one candidate-and-tests pair.

use codeloop_core::{ExecutionRequest, ExecutionResult, FailureKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::driver::{DriverScript, SnapshotLimits};
use crate::error::{ExecutionError, HostFault, Result};
use crate::fault::{classify, classify_bootstrap};
use crate::manager::RuntimeManager;
use crate::protocol::TagProtocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wall-clock ceiling for one run. Exceeding it is treated as a fatal fault.
    pub run_timeout: Duration,
    pub snapshot: SnapshotLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_millis(30_000),
            snapshot: SnapshotLimits::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotLimits) -> Self {
        self.snapshot = snapshot;
        self
    }
}

/// Runs candidates against their tests on the managed runtime, one at a time.
///
/// A second run submitted while one is in flight is rejected with
/// [`ExecutionError::Busy`] instead of being queued.
pub struct ExecutionSession {
    manager: Arc<RuntimeManager>,
    gate: Mutex<()>,
    config: SessionConfig,
}

impl ExecutionSession {
    pub fn new(manager: Arc<RuntimeManager>, config: SessionConfig) -> Self {
        Self {
            manager,
            gate: Mutex::new(()),
            config,
        }
    }

    pub fn manager(&self) -> &Arc<RuntimeManager> {
        &self.manager
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Execute one request and produce its verdict.
    ///
    /// Every run that reaches the runtime yields exactly one [`ExecutionResult`].
    /// Only a rejected submission or a failed bootstrap is an `Err`.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let _in_flight = self.gate.try_lock().map_err(|_| {
            warn!("Rejecting execution: another run is in flight");
            ExecutionError::Busy
        })?;

        let started = Instant::now();
        let runtime = self.manager.ensure_ready().await.map_err(|e| {
            let classification = classify_bootstrap(&e);
            error!(
                reason = classification.reason.unwrap_or("bootstrap"),
                error = %e,
                "Guest runtime unavailable"
            );
            ExecutionError::from(e)
        })?;

        let protocol = TagProtocol::new();
        let script = DriverScript::new(&protocol, &self.config.snapshot).render(request);
        debug!(
            candidate_bytes = request.candidate_source.len(),
            test_bytes = request.test_source.len(),
            "Dispatching run to guest runtime"
        );

        let outcome = match tokio::time::timeout(self.config.run_timeout, runtime.execute(&script))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(HostFault::Timeout(self.config.run_timeout.as_millis() as u64)),
        };

        let result = match outcome {
            Ok(captured) => protocol
                .parse(&captured)
                .into_result(self.config.snapshot.max_preview_chars),
            Err(fault) => self.on_fault(&protocol, fault).await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            passed = result.passed,
            failure = result.failure.map(|kind| kind.as_str()).unwrap_or("none"),
            duration_ms,
            "Run finished"
        );
        Ok(result.with_duration_ms(duration_ms))
    }

    async fn on_fault(&self, protocol: &TagProtocol, fault: HostFault) -> ExecutionResult {
        let classification = classify(&fault);

        if classification.is_fatal() {
            let reason = classification.reason.unwrap_or("fatal_fault");
            error!(reason, fault = %fault, "Guest runtime corrupted, invalidating");
            self.manager.invalidate(reason).await;
            return ExecutionResult::fatal(protocol.parse(&fault.to_string()).logs);
        }

        warn!(fault = %fault, "Host-level fault, runtime kept");
        let (message, output) = match fault {
            HostFault::Raised { message, output } => (message, output),
            other => (other.to_string(), String::new()),
        };
        let captured = protocol.parse(&output);
        let logs = if captured.logs.is_empty() {
            message
        } else {
            format!("{}\n{}", captured.logs, message)
        };
        ExecutionResult::failed(FailureKind::HostFault, logs, Vec::new())
    }
}

impl std::fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("manager", &self.manager)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::RuntimeState;
    use crate::testing::{ScriptedLauncher, ScriptedReply};
    use codeloop_core::{VariablePreview, FATAL_ENGINE_PREFIX};

    fn session(launcher: Arc<ScriptedLauncher>) -> ExecutionSession {
        let manager = Arc::new(RuntimeManager::new(launcher));
        ExecutionSession::new(manager, SessionConfig::default())
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new("def add(a, b):\n    return a + b\n", "assert add(2, 3) == 5\n")
    }

    #[tokio::test]
    async fn test_passing_run() {
        let launcher = Arc::new(ScriptedLauncher::new(|view| {
            assert!(view.candidate.contains("def add"));
            view.passed_with("ok", vec![VariablePreview::new("add", "function", "<function add>")])
        }));
        let session = session(launcher.clone());

        let result = session.run(&request()).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.logs, "ok");
        assert_eq!(result.variables[0].name, "add");
        assert_eq!(launcher.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_test_failure_is_reported() {
        let launcher = Arc::new(ScriptedLauncher::new(|view| {
            view.test_failure("AssertionError")
        }));
        let result = session(launcher).run(&request()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.failure, Some(FailureKind::VerificationFailure));
        assert_eq!(result.logs, "AssertionError");
    }

    #[tokio::test]
    async fn test_busy_rejection_does_not_block() {
        let launcher = Arc::new(ScriptedLauncher::new(|view| {
            view.passed("").with_delay(Duration::from_millis(200))
        }));
        let session = Arc::new(session(launcher.clone()));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(&request()).await })
        };
        while !session.is_busy() {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        let second = session.run(&request()).await;
        assert!(matches!(second, Err(ExecutionError::Busy)));
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(first.await.unwrap().unwrap().passed);
        assert_eq!(launcher.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_fault_invalidates_runtime() {
        let launcher = Arc::new(ScriptedLauncher::new(|_| {
            ScriptedReply::fault(HostFault::raised("RuntimeError: memory access out of bounds"))
        }));
        let session = session(launcher.clone());

        let result = session.run(&request()).await.unwrap();
        assert!(!result.passed);
        assert!(result.is_fatal());
        assert!(result.logs.starts_with(FATAL_ENGINE_PREFIX));
        assert_eq!(session.manager().state().await, RuntimeState::Uninitialized);
        assert_eq!(launcher.shutdown_count(), 1);

        // The next run rebuilds the runtime from zero.
        session.run(&request()).await.unwrap();
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_logs_carry_no_protocol_lines() {
        let launcher = Arc::new(ScriptedLauncher::new(|view| {
            ScriptedReply::fault(HostFault::Terminated(format!(
                "worker exited mid-run\nstray\n{}\n{} []",
                view.marker(crate::protocol::Tag::Passed),
                view.marker(crate::protocol::Tag::Variables)
            )))
        }));
        let session = session(launcher);

        let result = session.run(&request()).await.unwrap();
        assert!(result.is_fatal());
        assert!(result.logs.contains("stray"));
        assert!(!result.logs.contains(crate::protocol::TAG_ROOT));
    }

    #[tokio::test]
    async fn test_transient_fault_keeps_runtime() {
        let launcher = Arc::new(ScriptedLauncher::new(|view| {
            ScriptedReply::fault(HostFault::Raised {
                message: "KeyboardInterrupt".into(),
                output: format!("partial\n{}", view.marker(crate::protocol::Tag::Passed)),
            })
        }));
        let session = session(launcher.clone());

        let result = session.run(&request()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.failure, Some(FailureKind::HostFault));
        assert_eq!(result.logs, "partial\nKeyboardInterrupt");
        assert_eq!(session.manager().state().await, RuntimeState::Ready);
        assert_eq!(launcher.shutdown_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_fatal() {
        let launcher = Arc::new(ScriptedLauncher::new(|_| ScriptedReply::hang()));
        let manager = Arc::new(RuntimeManager::new(launcher.clone()));
        let session = ExecutionSession::new(
            manager,
            SessionConfig::default().with_run_timeout(Duration::from_millis(50)),
        );

        let result = session.run(&request()).await.unwrap();
        assert!(result.is_fatal());
        assert!(result.logs.contains("50ms"));
        assert_eq!(session.manager().state().await, RuntimeState::Uninitialized);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_an_error() {
        let launcher = Arc::new(ScriptedLauncher::passing().failing_bootstraps(1));
        let session = session(launcher);

        let err = session.run(&request()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Bootstrap(_)));
        assert!(!session.is_busy());

        assert!(session.run(&request()).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_fresh_nonce_per_run() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let launcher = {
            let seen = Arc::clone(&seen);
            Arc::new(ScriptedLauncher::new(move |view| {
                seen.lock().unwrap().push(view.protocol.prefix().to_string());
                view.passed("")
            }))
        };
        let session = session(launcher);

        session.run(&request()).await.unwrap();
        session.run(&request()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }
}
