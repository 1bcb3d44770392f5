//! Crash-recoverable script sandbox.
//!
//! A [`RuntimeManager`] owns at most one guest runtime and bootstraps it lazily.
//! An [`ExecutionSession`] runs one candidate against its tests at a time, wraps
//! both in a driver script, and turns whatever the guest printed into an
//! [`ExecutionResult`](codeloop_core::ExecutionResult). Faults that corrupt the
//! runtime invalidate it; the next run starts from a fresh one.

pub mod driver;
pub mod error;
pub mod fault;
pub mod guest;
pub mod manager;
pub mod protocol;
pub mod python;
pub mod session;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(any(test, feature = "test-util"))]
pub use driver::EmbeddedRun;

pub use driver::{DriverScript, SnapshotLimits};
pub use error::{BootstrapError, ExecutionError, HostFault, Result};
pub use fault::{classify, classify_bootstrap, fatal_marker, Classification, FaultClass};
pub use guest::{GuestRuntime, RuntimeLauncher};
pub use manager::{RuntimeManager, RuntimeState};
pub use protocol::{CapturedOutput, Tag, TagProtocol};
pub use python::{PythonLauncher, PythonRuntimeConfig, PythonWorker};
pub use session::{ExecutionSession, SessionConfig};

use std::sync::Arc;

/// Session backed by a resident Python worker.
pub fn python_session(runtime: PythonRuntimeConfig, session: SessionConfig) -> ExecutionSession {
    let launcher = Arc::new(PythonLauncher::new(runtime));
    ExecutionSession::new(Arc::new(RuntimeManager::new(launcher)), session)
}
