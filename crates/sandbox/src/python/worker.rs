use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::HostFault;
use crate::guest::GuestRuntime;

const STDERR_TAIL_LINES: usize = 40;

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: u64,
    script: &'a str,
}

/// Messages the resident worker writes on its reply channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum WorkerMessage {
    Ready {
        version: String,
    },
    BootstrapError {
        module: String,
        error: String,
    },
    Result {
        id: u64,
        output: String,
        #[serde(default)]
        fault: Option<String>,
    },
}

struct Channel {
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
}

/// Handle on one resident Python process.
pub struct PythonWorker {
    channel: Mutex<Channel>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    version: String,
    stderr_tail: Arc<std::sync::Mutex<VecDeque<String>>>,
}

impl PythonWorker {
    pub(crate) fn new(
        child: Child,
        stdin: ChildStdin,
        replies: Lines<BufReader<ChildStdout>>,
        stderr: Option<ChildStderr>,
        version: String,
    ) -> Self {
        let stderr_tail = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        if let Some(stderr) = stderr {
            tokio::spawn(drain_stderr(stderr, Arc::clone(&stderr_tail)));
        }

        Self {
            channel: Mutex::new(Channel { stdin, replies }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(0),
            version,
            stderr_tail,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    async fn terminated(&self, context: &str) -> HostFault {
        let status = {
            let mut child = self.child.lock().await;
            child.try_wait().ok().flatten()
        };
        let tail = self
            .stderr_tail
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();

        let mut detail = match status {
            Some(status) => format!("{} ({})", context, status),
            None => context.to_string(),
        };
        if !tail.is_empty() {
            detail.push('\n');
            detail.push_str(&tail);
        }
        HostFault::Terminated(detail)
    }
}

async fn drain_stderr(stderr: ChildStderr, tail: Arc<std::sync::Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(line = %line, "guest stderr");
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

#[async_trait]
impl GuestRuntime for PythonWorker {
    async fn execute(&self, script: &str) -> Result<String, HostFault> {
        let mut channel = self.channel.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let mut frame = serde_json::to_string(&WorkerRequest { id, script })
            .map_err(|e| HostFault::Protocol(e.to_string()))?;
        frame.push('\n');

        if let Err(e) = channel.stdin.write_all(frame.as_bytes()).await {
            return Err(self.terminated(&format!("write failed: {}", e)).await);
        }
        if let Err(e) = channel.stdin.flush().await {
            return Err(self.terminated(&format!("flush failed: {}", e)).await);
        }

        loop {
            let line = match channel.replies.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(self.terminated("worker exited mid-run").await),
                Err(e) => return Err(self.terminated(&format!("read failed: {}", e)).await),
            };

            match serde_json::from_str::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Result {
                    id: reply_id,
                    output,
                    fault,
                }) if reply_id == id => {
                    return match fault {
                        Some(message) => Err(HostFault::Raised { message, output }),
                        None => Ok(output),
                    };
                }
                Ok(WorkerMessage::Result { id: reply_id, .. }) => {
                    debug!(expected = id, got = reply_id, "Skipping stale worker reply");
                }
                Ok(other) => {
                    return Err(HostFault::Protocol(format!(
                        "unexpected worker message: {:?}",
                        other
                    )));
                }
                Err(e) => {
                    warn!(error = %e, bytes = line.len(), "Unparseable worker reply");
                    return Err(HostFault::Protocol(format!(
                        "{} (reply of {} bytes)",
                        e,
                        line.len()
                    )));
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("python {}", self.version)
    }

    async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Guest worker already gone");
        }
        if let Err(e) = child.wait().await {
            debug!(error = %e, "Failed to reap guest worker");
        }
    }
}
