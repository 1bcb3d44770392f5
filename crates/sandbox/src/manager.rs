//! Lifecycle owner of the single guest runtime.
//!
//! At most one runtime is alive at a time. Bootstrap is lazy and idempotent:
//! concurrent callers share one in-flight initialization future instead of
//! starting a second one. A fatal fault discards the runtime through
//! [`RuntimeManager::invalidate`] and the next caller rebuilds from zero.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::BootstrapError;
use crate::guest::{GuestRuntime, RuntimeLauncher};

type LaunchOutcome = std::result::Result<Arc<dyn GuestRuntime>, BootstrapError>;
type LaunchFuture = Shared<BoxFuture<'static, LaunchOutcome>>;

/// Observable lifecycle of the runtime handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

enum Slot {
    Uninitialized,
    Initializing {
        generation: u64,
        future: LaunchFuture,
    },
    Ready {
        generation: u64,
        runtime: Arc<dyn GuestRuntime>,
    },
    Failed {
        reason: String,
    },
}

impl Slot {
    fn state(&self) -> RuntimeState {
        match self {
            Slot::Uninitialized => RuntimeState::Uninitialized,
            Slot::Initializing { .. } => RuntimeState::Initializing,
            Slot::Ready { .. } => RuntimeState::Ready,
            Slot::Failed { .. } => RuntimeState::Failed,
        }
    }
}

pub struct RuntimeManager {
    launcher: Arc<dyn RuntimeLauncher>,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    launches: AtomicU64,
}

impl RuntimeManager {
    pub fn new(launcher: Arc<dyn RuntimeLauncher>) -> Self {
        Self {
            launcher,
            slot: Mutex::new(Slot::Uninitialized),
            generation: AtomicU64::new(0),
            launches: AtomicU64::new(0),
        }
    }

    /// Return a ready runtime, bootstrapping it if needed.
    ///
    /// A caller arriving while a bootstrap is in flight awaits that bootstrap.
    /// A failed bootstrap is surfaced, not retried; the next call starts over.
    pub async fn ensure_ready(&self) -> std::result::Result<Arc<dyn GuestRuntime>, BootstrapError> {
        let (generation, future) = {
            let mut slot = self.slot.lock().await;
            let joined = match &*slot {
                Slot::Ready { runtime, .. } => return Ok(Arc::clone(runtime)),
                Slot::Initializing { generation, future } => Some((*generation, future.clone())),
                Slot::Uninitialized | Slot::Failed { .. } => None,
            };

            match joined {
                Some((generation, future)) => {
                    debug!(generation, "Joining in-flight runtime bootstrap");
                    (generation, future)
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    self.launches.fetch_add(1, Ordering::SeqCst);
                    info!(generation, "Bootstrapping guest runtime");

                    let launcher = Arc::clone(&self.launcher);
                    let future = async move { launcher.launch().await }.boxed().shared();
                    *slot = Slot::Initializing {
                        generation,
                        future: future.clone(),
                    };
                    (generation, future)
                }
            }
        };

        let outcome = future.await;

        let mut slot = self.slot.lock().await;
        let current = matches!(
            &*slot,
            Slot::Initializing { generation: g, .. } if *g == generation
        );

        match outcome {
            Ok(runtime) => {
                if current {
                    info!(
                        generation,
                        runtime = %runtime.describe(),
                        "Guest runtime ready"
                    );
                    *slot = Slot::Ready {
                        generation,
                        runtime: Arc::clone(&runtime),
                    };
                    return Ok(runtime);
                }
                if matches!(&*slot, Slot::Ready { generation: g, .. } if *g == generation) {
                    return Ok(runtime);
                }
                drop(slot);
                warn!(generation, "Discarding runtime invalidated during bootstrap");
                runtime.shutdown().await;
                Err(BootstrapError::Superseded)
            }
            Err(e) => {
                if current {
                    error!(generation, error = %e, "Guest runtime bootstrap failed");
                    *slot = Slot::Failed {
                        reason: e.to_string(),
                    };
                }
                Err(e)
            }
        }
    }

    /// Discard the runtime so the next [`ensure_ready`](Self::ensure_ready) rebuilds it.
    ///
    /// This is the only recovery path from a corrupted runtime; nothing is repaired in place.
    pub async fn invalidate(&self, reason: &str) {
        let previous = {
            let mut slot = self.slot.lock().await;
            std::mem::replace(&mut *slot, Slot::Uninitialized)
        };

        match previous {
            Slot::Ready {
                generation,
                runtime,
            } => {
                warn!(generation, reason = %reason, "Invalidating guest runtime");
                runtime.shutdown().await;
            }
            Slot::Initializing { generation, .. } => {
                warn!(generation, reason = %reason, "Invalidating runtime mid-bootstrap");
            }
            Slot::Failed { .. } | Slot::Uninitialized => {
                debug!(reason = %reason, "Invalidate requested with no live runtime");
            }
        }
    }

    pub async fn state(&self) -> RuntimeState {
        self.slot.lock().await.state()
    }

    /// Reason of the last failed bootstrap, while the handle is in the failed state.
    pub async fn failure_reason(&self) -> Option<String> {
        match &*self.slot.lock().await {
            Slot::Failed { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    /// Number of bootstraps started over the manager's lifetime.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("launch_count", &self.launch_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLauncher;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lazy_initialization() {
        let launcher = Arc::new(ScriptedLauncher::passing());
        let manager = RuntimeManager::new(launcher.clone());

        assert_eq!(manager.state().await, RuntimeState::Uninitialized);
        assert_eq!(manager.launch_count(), 0);

        manager.ensure_ready().await.unwrap();
        assert_eq!(manager.state().await, RuntimeState::Ready);
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_ready_handle_is_reused() {
        let launcher = Arc::new(ScriptedLauncher::passing());
        let manager = RuntimeManager::new(launcher.clone());

        let first = manager.ensure_ready().await.unwrap();
        let second = manager.ensure_ready().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_bootstrap() {
        let launcher =
            Arc::new(ScriptedLauncher::passing().with_launch_delay(Duration::from_millis(50)));
        let manager = Arc::new(RuntimeManager::new(launcher.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.ensure_ready().await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(manager.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_bootstrap_is_surfaced_then_retryable() {
        let launcher = Arc::new(ScriptedLauncher::passing().failing_bootstraps(1));
        let manager = RuntimeManager::new(launcher.clone());

        let err = manager.ensure_ready().await.err().unwrap();
        assert!(matches!(err, BootstrapError::Preload { .. }));
        assert_eq!(manager.state().await, RuntimeState::Failed);
        assert!(manager.failure_reason().await.is_some());

        manager.ensure_ready().await.unwrap();
        assert_eq!(manager.state().await, RuntimeState::Ready);
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_bootstrap() {
        let launcher = Arc::new(ScriptedLauncher::passing());
        let manager = RuntimeManager::new(launcher.clone());

        let first = manager.ensure_ready().await.unwrap();
        manager.invalidate("test").await;
        assert_eq!(manager.state().await, RuntimeState::Uninitialized);
        assert_eq!(launcher.shutdown_count(), 1);

        let second = manager.ensure_ready().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_bootstrap_supersedes_it() {
        let launcher =
            Arc::new(ScriptedLauncher::passing().with_launch_delay(Duration::from_millis(100)));
        let manager = Arc::new(RuntimeManager::new(launcher.clone()));

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_ready().await })
        };

        while manager.state().await != RuntimeState::Initializing {
            tokio::task::yield_now().await;
        }
        manager.invalidate("test").await;

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(BootstrapError::Superseded)));
        assert_eq!(manager.state().await, RuntimeState::Uninitialized);
        assert_eq!(launcher.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_without_runtime_is_noop() {
        let manager = RuntimeManager::new(Arc::new(ScriptedLauncher::passing()));
        manager.invalidate("nothing to do").await;
        assert_eq!(manager.state().await, RuntimeState::Uninitialized);
    }
}
