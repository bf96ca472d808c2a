//! Apps and the actions they run.
//!
//! This module handles:
//! - The registry of app classes
//! - The execution backend that runs code blocks
//! - Jobs and long-running processes
//! - The `watchdog` app and its per-rule invoker

pub mod backend;
pub mod jobs;
pub mod once;
pub mod registry;
pub mod watchdog;

pub use backend::{ExecutionBackend, ShellBackend, build_event_env};
pub use jobs::{CommandSpec, JobRunner, ProcessHandle, run_command};
pub use once::FireOnce;
pub use registry::{ActionRegistry, App, AppContext, AppFactory};
pub use watchdog::{ActionInvoker, WatchdogApp};
