//! Filesystem watching for jaffle.
//!
//! This module handles:
//! - Glob patterns compiled to anchored regexes
//! - Watch rules parsed from `watchdog` app options
//! - Per-rule debounce and throttle dispatching
//! - Bridging `notify` events into tokio

pub mod dispatcher;
pub mod event;
pub mod glob;
pub mod handler;
pub mod observer;

pub use dispatcher::{DispatchPolicy, DispatchState, Invoke, RuleDispatcher};
pub use event::{EventType, FsEvent};
pub use glob::{CompiledGlob, glob_to_regex};
pub use handler::{ActionRef, HandlerSpec, TargetRule, resolve_targets};
pub use observer::Observer;
