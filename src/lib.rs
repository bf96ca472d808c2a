//! Jaffle - development-environment orchestrator.
//!
//! This library provides the core functionality for jaffle, including:
//! - Configuration loading with deep merge and deferred template rendering
//! - Typed variables resolved in two phases
//! - Log filtering with suppress and replace rules
//! - Filesystem watching with glob rules, debounce and throttle
//! - Apps, jobs and processes started from the configuration
//! - A status file through which `status` and `stop` find the running instance
//!
//! # Example
//!
//! ```no_run
//! use jaffle_cli::config::load_config;
//! use jaffle_cli::template::FunctionRegistry;
//! use std::collections::BTreeMap;
//! use std::path::PathBuf;
//!
//! let config = load_config(
//!     &[PathBuf::from("jaffle.toml")],
//!     &BTreeMap::new(),
//!     FunctionRegistry::builtin(),
//! )
//! .unwrap();
//!
//! for (name, app) in config.app().unwrap().entries() {
//!     println!("{name}: {}", app.string_at("class", "?").unwrap());
//! }
//! ```

pub mod actions;
pub mod channel;
pub mod config;
pub mod error;
pub mod logfilter;
pub mod logging;
pub mod orchestrator;
#[cfg(unix)]
pub mod signal;
pub mod state;
pub mod template;
pub mod variables;
pub mod watch;

pub use error::{JaffleError, Result};
