//! Seams between the sandbox and the concrete scripting engine.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{BootstrapError, HostFault};

/// A live, ready-to-use guest virtual machine.
///
/// Implementations are not required to be reentrant; the execution session
/// guarantees a single in-flight `execute` call.
#[async_trait]
pub trait GuestRuntime: Send + Sync {
    /// Run one driver script in a fresh global scope and return everything it wrote
    /// to standard output and standard error.
    async fn execute(&self, script: &str) -> std::result::Result<String, HostFault>;

    /// Short human-readable identification, e.g. the interpreter version.
    fn describe(&self) -> String;

    /// Tear the runtime down. Called once the manager discards the handle.
    async fn shutdown(&self);
}

/// Builds guest runtimes from zero. Cold start is expected to be expensive.
#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    async fn launch(&self) -> std::result::Result<Arc<dyn GuestRuntime>, BootstrapError>;
}
