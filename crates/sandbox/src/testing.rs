//! Scripted guest runtime for tests of code built on the sandbox.
//!
//! The scripted runtime understands the rendered driver well enough to hand the
//! candidate, the tests and the run's tag protocol to a closure, which decides
//! what the "guest" printed.

use async_trait::async_trait;
use codeloop_core::VariablePreview;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::EmbeddedRun;
use crate::error::{BootstrapError, HostFault};
use crate::guest::{GuestRuntime, RuntimeLauncher};
use crate::protocol::{Tag, TagProtocol};

type Handler = Arc<dyn Fn(&ScriptView) -> ScriptedReply + Send + Sync>;

/// What the scripted runtime saw for one run.
#[derive(Debug, Clone)]
pub struct ScriptView {
    pub candidate: String,
    pub tests: String,
    pub protocol: TagProtocol,
    /// 1-based count of runs on this runtime instance.
    pub run: u64,
}

impl ScriptView {
    pub fn marker(&self, tag: Tag) -> String {
        self.protocol.marker(tag)
    }

    pub fn passed(&self, logs: &str) -> ScriptedReply {
        self.passed_with(logs, Vec::new())
    }

    pub fn passed_with(&self, logs: &str, variables: Vec<VariablePreview>) -> ScriptedReply {
        let mut output = with_line(logs, &self.marker(Tag::Passed));
        let snapshot = serde_json::to_string(&variables).unwrap_or_else(|_| "[]".to_string());
        output.push_str(&format!("{} {}\n", self.marker(Tag::Variables), snapshot));
        ScriptedReply::output(output)
    }

    pub fn implementation_error(&self, traceback: &str) -> ScriptedReply {
        ScriptedReply::output(format!(
            "{}\n{}",
            self.marker(Tag::ImplementationError),
            traceback
        ))
    }

    pub fn test_failure(&self, traceback: &str) -> ScriptedReply {
        ScriptedReply::output(format!("{}\n{}", self.marker(Tag::TestFailure), traceback))
    }
}

fn with_line(logs: &str, line: &str) -> String {
    if logs.is_empty() {
        format!("{}\n", line)
    } else {
        format!("{}\n{}\n", logs, line)
    }
}

/// How the scripted runtime answers one run.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: Option<Result<String, HostFault>>,
    delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            outcome: Some(Ok(text.into())),
            delay: None,
        }
    }

    pub fn fault(fault: HostFault) -> Self {
        Self {
            outcome: Some(Err(fault)),
            delay: None,
        }
    }

    /// Never answer.
    pub fn hang() -> Self {
        Self {
            outcome: None,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct Counters {
    launches: AtomicU64,
    shutdowns: AtomicU64,
    executions: AtomicU64,
}

/// Launcher for [`ScriptedRuntime`]s sharing one handler.
pub struct ScriptedLauncher {
    handler: Handler,
    launch_delay: Option<Duration>,
    failing_bootstraps: AtomicU64,
    counters: Arc<Counters>,
}

impl ScriptedLauncher {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ScriptView) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            launch_delay: None,
            failing_bootstraps: AtomicU64::new(0),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Every run passes with empty logs.
    pub fn passing() -> Self {
        Self::new(|view| view.passed(""))
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// The next `count` bootstraps fail as if a preloaded module were missing.
    pub fn failing_bootstraps(self, count: u64) -> Self {
        self.failing_bootstraps.store(count, Ordering::SeqCst);
        self
    }

    pub fn launch_count(&self) -> u64 {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> u64 {
        self.counters.shutdowns.load(Ordering::SeqCst)
    }

    pub fn execution_count(&self) -> u64 {
        self.counters.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn GuestRuntime>, BootstrapError> {
        let generation = self.counters.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.failing_bootstraps.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_bootstraps.store(remaining - 1, Ordering::SeqCst);
            return Err(BootstrapError::Preload {
                module: "numpy".to_string(),
                reason: "ModuleNotFoundError: No module named 'numpy'".to_string(),
            });
        }

        Ok(Arc::new(ScriptedRuntime {
            generation,
            handler: Arc::clone(&self.handler),
            counters: Arc::clone(&self.counters),
            runs: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        }))
    }
}

/// In-process stand-in for a guest runtime.
pub struct ScriptedRuntime {
    generation: u64,
    handler: Handler,
    counters: Arc<Counters>,
    runs: AtomicU64,
    alive: AtomicBool,
}

#[async_trait]
impl GuestRuntime for ScriptedRuntime {
    async fn execute(&self, script: &str) -> Result<String, HostFault> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(HostFault::Terminated("scripted runtime was shut down".into()));
        }
        let embedded = EmbeddedRun::parse(script)
            .ok_or_else(|| HostFault::Protocol("script is not a rendered driver".into()))?;

        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        let view = ScriptView {
            candidate: embedded.request.candidate_source,
            tests: embedded.request.test_source,
            protocol: embedded.protocol,
            run: self.runs.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let reply = (self.handler)(&view);

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        match reply.outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }

    fn describe(&self) -> String {
        format!("scripted #{}", self.generation)
    }

    async fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}
