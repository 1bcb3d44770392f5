use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::worker::{PythonWorker, WorkerMessage};
use super::WORKER_SOURCE;
use crate::error::BootstrapError;
use crate::guest::{GuestRuntime, RuntimeLauncher};

const DEFAULT_INTERPRETER: &str = "python3";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PythonRuntimeConfig {
    /// Interpreter name or path. Bare names are resolved on `PATH`.
    pub interpreter: String,
    /// Modules imported once at startup; a failure here fails the bootstrap.
    pub preload_modules: Vec<String>,
    pub startup_timeout_ms: u64,
    /// Environment variables with any of these as a `_`-separated word of their
    /// upper-cased name (`GITHUB_TOKEN`, `OPENROUTER_API_KEY`) are not passed to
    /// the guest. `KEYBOARD_LAYOUT` is kept.
    pub denied_env_patterns: Vec<String>,
}

impl Default for PythonRuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            preload_modules: vec!["numpy".to_string()],
            startup_timeout_ms: 15_000,
            denied_env_patterns: vec!["TOKEN".into(), "KEY".into(), "SECRET".into()],
        }
    }
}

impl PythonRuntimeConfig {
    pub fn without_preload(mut self) -> Self {
        self.preload_modules.clear();
        self
    }

    pub fn is_denied_env(&self, key: &str) -> bool {
        let key = key.to_ascii_uppercase();
        key.split('_').any(|word| {
            self.denied_env_patterns
                .iter()
                .any(|pattern| pattern.eq_ignore_ascii_case(word))
        })
    }

    /// Locate the interpreter binary.
    pub fn resolve_interpreter(&self) -> Result<PathBuf, BootstrapError> {
        let candidate = PathBuf::from(&self.interpreter);
        if candidate.components().count() > 1 {
            return if candidate.exists() {
                Ok(candidate)
            } else {
                Err(BootstrapError::InterpreterNotFound(self.interpreter.clone()))
            };
        }
        which::which(&self.interpreter)
            .map_err(|_| BootstrapError::InterpreterNotFound(self.interpreter.clone()))
    }
}

/// Starts resident Python workers.
#[derive(Debug, Clone, Default)]
pub struct PythonLauncher {
    config: PythonRuntimeConfig,
}

impl PythonLauncher {
    pub fn new(config: PythonRuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PythonRuntimeConfig {
        &self.config
    }

    async fn spawn(&self) -> Result<PythonWorker, BootstrapError> {
        let binary = self.config.resolve_interpreter()?;
        debug!(interpreter = ?binary, preload = ?self.config.preload_modules, "Starting guest worker");

        let mut command = Command::new(&binary);
        command
            .arg("-u")
            .arg("-B")
            .arg("-c")
            .arg(WORKER_SOURCE)
            .args(&self.config.preload_modules)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, _) in std::env::vars() {
            if self.config.is_denied_env(&key) {
                command.env_remove(&key);
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| BootstrapError::Spawn(format!("{}: {}", binary.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BootstrapError::Spawn("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BootstrapError::Spawn("worker stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        let mut lines = BufReader::new(stdout).lines();
        let handshake = lines
            .next_line()
            .await
            .map_err(|e| BootstrapError::Handshake(e.to_string()))?;

        let version = match handshake
            .as_deref()
            .map(|line| serde_json::from_str::<WorkerMessage>(line)) {
            Some(Ok(WorkerMessage::Ready { version })) => version,
            Some(Ok(WorkerMessage::BootstrapError { module, error })) => {
                return Err(BootstrapError::Preload {
                    module,
                    reason: error,
                });
            }
            Some(Ok(other)) => {
                return Err(BootstrapError::Handshake(format!(
                    "unexpected message before ready: {:?}",
                    other
                )));
            }
            Some(Err(e)) => return Err(BootstrapError::Handshake(e.to_string())),
            None => {
                let status = child.wait().await.ok();
                return Err(BootstrapError::Handshake(format!(
                    "worker exited before ready (status: {:?})",
                    status
                )));
            }
        };

        Ok(PythonWorker::new(child, stdin, lines, stderr, version))
    }
}

#[async_trait]
impl RuntimeLauncher for PythonLauncher {
    async fn launch(&self) -> Result<Arc<dyn GuestRuntime>, BootstrapError> {
        let timeout_ms = self.config.startup_timeout_ms;
        let worker = tokio::time::timeout(Duration::from_millis(timeout_ms), self.spawn())
            .await
            .map_err(|_| BootstrapError::StartupTimeout(timeout_ms))??;

        info!(runtime = %worker.describe(), "Guest worker ready");
        Ok(Arc::new(worker))
    }
}
