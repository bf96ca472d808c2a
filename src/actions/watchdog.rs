//! The `watchdog` app: watch rules that run code blocks and jobs on change.

use super::backend::ExecutionBackend;
use super::jobs::JobRunner;
use super::once::FireOnce;
use super::registry::{App, AppContext};
use crate::error::{JaffleError, Result};
use crate::watch::{ActionRef, FsEvent, HandlerSpec, Invoke, Observer, RuleDispatcher, TargetRule, resolve_targets};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs one rule's actions for an event, in a task of its own.
#[derive(Clone)]
pub struct ActionInvoker {
	rule: String,
	session: Option<String>,
	actions: Vec<ActionRef>,
	clear_cache: Vec<String>,
	targets: Vec<TargetRule>,
	base_dir: PathBuf,
	backend: Arc<dyn ExecutionBackend>,
	jobs: Arc<JobRunner>,
}

impl ActionInvoker {
	pub fn new(spec: &HandlerSpec, ctx: &AppContext) -> Self {
		ActionInvoker {
			rule: spec.name.clone(),
			session: ctx.session_name.clone(),
			actions: spec.actions(),
			clear_cache: spec.clear_cache.clone(),
			targets: spec.targets.clone(),
			base_dir: ctx.base_dir.clone(),
			backend: ctx.backend.clone(),
			jobs: ctx.jobs.clone(),
		}
	}

	/// Run every action in order; returns how many failed.
	///
	/// A failure is logged and the next action still runs. The cache is
	/// cleared at most once, before the first code block. A rule with
	/// target mapping runs its actions once per existing target, and not at
	/// all when no target exists.
	pub async fn run(&self, event: FsEvent) -> usize {
		debug!(rule = %self.rule, path = %event.src_path, kind = %event.event_type, "running actions");
		let cache_cleared = FireOnce::new();

		if self.targets.is_empty() {
			return self.run_actions(&event, None, &cache_cleared).await;
		}

		let targets = resolve_targets(&self.targets, &event.src_path, &self.base_dir);
		if targets.is_empty() {
			debug!(rule = %self.rule, path = %event.src_path, "no target");
		}
		let mut failures = 0;
		for target in &targets {
			debug!(rule = %self.rule, path = %event.src_path, target = %target, "running actions for target");
			failures += self.run_actions(&event, Some(target), &cache_cleared).await;
		}
		failures
	}

	async fn run_actions(&self, event: &FsEvent, target: Option<&str>, cache_cleared: &FireOnce) -> usize {
		let mut failures = 0;
		for action in &self.actions {
			let result = match action {
				ActionRef::Code(_, code) => {
					if !self.clear_cache.is_empty()
						&& cache_cleared.fire()
						&& let Err(e) = self.backend.clear_cache(&self.clear_cache).await
					{
						warn!(rule = %self.rule, "Failed to clear cache: {}", e);
					}
					self.backend.execute_code(self.session.as_deref(), code, Some(event)).await
				}
				ActionRef::Job(name) => self.jobs.run_with_target(name, target).await.map(|_| ()),
			};

			if let Err(e) = result {
				failures += 1;
				error!(rule = %self.rule, action = %action, "Action failed: {}", e);
			}
		}
		failures
	}
}

impl Invoke for ActionInvoker {
	fn invoke(&self, event: FsEvent) {
		let invoker = self.clone();
		tokio::spawn(async move {
			invoker.run(event).await;
		});
	}
}

struct Watch {
	_observer: Observer,
	forward: JoinHandle<()>,
}

/// Watches `options.handlers` and dispatches matching events per rule.
pub struct WatchdogApp {
	ctx: AppContext,
	handlers: Vec<HandlerSpec>,
	watches: Vec<Watch>,
}

impl WatchdogApp {
	pub const CLASS: &'static str = "watchdog";

	/// Parse the rules; every referenced job must exist.
	pub fn new(ctx: AppContext) -> Result<Self> {
		let mut handlers = Vec::new();
		if let Some(items) = ctx.options.lookup("handlers") {
			let Some(items) = items.as_list() else {
				return Err(JaffleError::TypeMismatch {
					key: format!("app.{}.options.handlers", ctx.name),
					expected: "a list",
				});
			};
			for (index, item) in items.iter().enumerate() {
				let spec = HandlerSpec::from_config(format!("{}.handlers[{index}]", ctx.name), item)?;
				if let Some(missing) = spec.jobs.iter().find(|job| !ctx.jobs.contains(job)) {
					return Err(JaffleError::NotFound {
						key: format!("job.{missing}"),
					});
				}
				handlers.push(spec);
			}
		}

		Ok(WatchdogApp {
			ctx,
			handlers,
			watches: Vec::new(),
		})
	}

	pub fn handlers(&self) -> &[HandlerSpec] {
		&self.handlers
	}

	pub fn is_watching(&self) -> bool {
		!self.watches.is_empty()
	}
}

#[async_trait]
impl App for WatchdogApp {
	fn name(&self) -> &str {
		&self.ctx.name
	}

	async fn start(&mut self) -> Result<()> {
		let base = self.ctx.base_dir.canonicalize()?;

		for handler in &self.handlers {
			let invoker = Arc::new(ActionInvoker::new(handler, &self.ctx));
			let dispatcher = RuleDispatcher::spawn(handler.name.clone(), handler.policy, invoker);
			let (observer, mut events) = Observer::start(&base.join(&handler.watch_path), &base)?;

			let spec = handler.clone();
			let forward = tokio::spawn(async move {
				while let Some(event) = events.recv().await {
					if !spec.matches(&event) {
						continue;
					}
					debug!(rule = %spec.name, path = %event.src_path, "matched");
					if !dispatcher.dispatch(event) {
						break;
					}
				}
			});

			self.watches.push(Watch {
				_observer: observer,
				forward,
			});
		}

		info!(app = %self.ctx.name, rules = self.handlers.len(), "watchdog started");
		Ok(())
	}

	async fn stop(&mut self) -> Result<()> {
		for watch in self.watches.drain(..) {
			watch.forward.abort();
		}
		info!(app = %self.ctx.name, "watchdog stopped");
		Ok(())
	}
}
