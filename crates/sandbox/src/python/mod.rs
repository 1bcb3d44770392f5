//! CPython-backed guest runtime.
//!
//! One resident `python3` process per runtime generation. Preloaded modules
//! stay imported across runs; every run still gets a fresh global scope.

mod launcher;
mod worker;

pub use launcher::{PythonLauncher, PythonRuntimeConfig};
pub use worker::PythonWorker;

/// Source of the resident worker loop, passed to the interpreter with `-c`.
pub(crate) const WORKER_SOURCE: &str = include_str!("worker.py");
