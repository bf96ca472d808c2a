//! App classes, looked up by the `class` of an `[app.<name>]` entry.

use super::backend::ExecutionBackend;
use super::jobs::JobRunner;
use super::watchdog::WatchdogApp;
use crate::config::ConfigValue;
use crate::error::{JaffleError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything an app gets from the orchestrator.
#[derive(Clone)]
pub struct AppContext {
	pub name: String,
	/// Kernel session the app's code runs in.
	pub session_name: Option<String>,
	pub options: ConfigValue,
	/// Directory watch paths and commands are relative to.
	pub base_dir: PathBuf,
	pub backend: Arc<dyn ExecutionBackend>,
	pub jobs: Arc<JobRunner>,
}

impl fmt::Debug for AppContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AppContext")
			.field("name", &self.name)
			.field("session_name", &self.session_name)
			.field("base_dir", &self.base_dir)
			.finish_non_exhaustive()
	}
}

/// A configured app with a start/stop lifecycle.
#[async_trait]
pub trait App: Send + Sync {
	fn name(&self) -> &str;

	async fn start(&mut self) -> Result<()>;

	async fn stop(&mut self) -> Result<()>;
}

pub type AppFactory = fn(AppContext) -> Result<Box<dyn App>>;

/// Maps class names to app factories.
#[derive(Clone, Default)]
pub struct ActionRegistry {
	factories: BTreeMap<String, AppFactory>,
}

impl ActionRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// The bundled app classes.
	pub fn builtin() -> Self {
		let mut registry = Self::new();
		registry.register(WatchdogApp::CLASS, |ctx| Ok(Box::new(WatchdogApp::new(ctx)?)));
		registry
	}

	/// Add or replace a class.
	pub fn register(&mut self, class: impl Into<String>, factory: AppFactory) {
		self.factories.insert(class.into(), factory);
	}

	pub fn contains(&self, class: &str) -> bool {
		self.factories.contains_key(class)
	}

	pub fn classes(&self) -> impl Iterator<Item = &str> {
		self.factories.keys().map(String::as_str)
	}

	/// Build an app of `class`.
	pub fn create(&self, class: &str, ctx: AppContext) -> Result<Box<dyn App>> {
		let factory = self.factories.get(class).ok_or_else(|| JaffleError::UnknownActionType {
			class: class.to_string(),
		})?;
		factory(ctx)
	}
}

impl fmt::Debug for ActionRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.factories.keys()).finish()
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::channel::LogRouter;
	use crate::logfilter::LogFilters;
	use crate::logging::LoggerTree;
	use crate::watch::FsEvent;
	use std::sync::Mutex;
	use tracing::Level;

	/// Backend that records what it was asked to do.
	#[derive(Default)]
	pub(crate) struct RecordingBackend {
		pub calls: Mutex<Vec<String>>,
		pub fail_on: Option<String>,
	}

	impl RecordingBackend {
		pub fn calls(&self) -> Vec<String> {
			self.calls.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl ExecutionBackend for RecordingBackend {
		async fn execute_code(&self, session: Option<&str>, code: &str, event: Option<&FsEvent>) -> Result<()> {
			let path = event.map(|e| e.src_path.as_str()).unwrap_or("-");
			self.calls
				.lock()
				.unwrap()
				.push(format!("exec {} {code} {path}", session.unwrap_or("-")));
			if self.fail_on.as_deref() == Some(code) {
				return Err(JaffleError::ActionFailed {
					action: code.to_string(),
					message: "boom".to_string(),
				});
			}
			Ok(())
		}

		async fn clear_cache(&self, modules: &[String]) -> Result<()> {
			self.calls.lock().unwrap().push(format!("clear {}", modules.join(",")));
			Ok(())
		}
	}

	pub(crate) fn router() -> Arc<LogRouter> {
		Arc::new(LogRouter::new(LogFilters::default(), LoggerTree::builder(Level::INFO).build()))
	}

	pub(crate) fn context(options: ConfigValue, backend: Arc<dyn ExecutionBackend>, jobs: JobRunner) -> AppContext {
		AppContext {
			name: "watcher".to_string(),
			session_name: Some("py_kernel".to_string()),
			options,
			base_dir: PathBuf::from("."),
			backend,
			jobs: Arc::new(jobs),
		}
	}

	struct Noop(String);

	#[async_trait]
	impl App for Noop {
		fn name(&self) -> &str {
			&self.0
		}

		async fn start(&mut self) -> Result<()> {
			Ok(())
		}

		async fn stop(&mut self) -> Result<()> {
			Ok(())
		}
	}

	fn empty_context() -> AppContext {
		context(
			ConfigValue::empty_map(),
			Arc::new(RecordingBackend::default()),
			JobRunner::new(Vec::new(), ".", router()),
		)
	}

	#[test]
	fn test_builtin_has_watchdog() {
		let registry = ActionRegistry::builtin();
		assert!(registry.contains("watchdog"));
		assert_eq!(registry.classes().collect::<Vec<_>>(), vec!["watchdog"]);
		assert_eq!(registry.create("watchdog", empty_context()).unwrap().name(), "watcher");
	}

	#[test]
	fn test_unknown_class() {
		let registry = ActionRegistry::builtin();
		match registry.create("tornado", empty_context()) {
			Err(JaffleError::UnknownActionType { class }) => assert_eq!(class, "tornado"),
			Err(other) => panic!("Expected UnknownActionType error, got {other:?}"),
			Ok(_) => panic!("Expected UnknownActionType error, got an app"),
		}
	}

	#[test]
	fn test_register_custom_class() {
		let mut registry = ActionRegistry::new();
		registry.register("noop", |ctx| Ok(Box::new(Noop(ctx.name))));
		assert_eq!(registry.create("noop", empty_context()).unwrap().name(), "watcher");
	}
}
