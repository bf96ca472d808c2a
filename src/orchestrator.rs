//! `jaffle start`: bring up sessions, apps and processes, then tear them down.

use crate::actions::{
	ActionRegistry, App, AppContext, CommandSpec, ExecutionBackend, JobRunner, ProcessHandle, ShellBackend,
};
use crate::channel::{LogRouter, MessageChannel};
use crate::config::{ConfigValue, JaffleConfig};
use crate::error::{JaffleError, Result};
use crate::logging::LoggerTree;
use crate::state::{AppData, KernelData, SessionData, Status, status_path};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Kernel used when a `[kernel.<name>]` entry names none.
pub const DEFAULT_KERNEL_NAME: &str = "python3";

/// How long `jaffle stop` waits after each signal.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// An enabled `[app.<name>]` entry.
#[derive(Debug, Clone)]
pub struct AppEntry {
	pub name: String,
	pub class: String,
	pub kernel: Option<String>,
	pub start: Option<String>,
	pub options: ConfigValue,
}

impl AppEntry {
	/// `None` when the entry is disabled.
	pub fn from_config(name: &str, value: &ConfigValue) -> Result<Option<Self>> {
		if value.bool_at("disabled", false)? {
			return Ok(None);
		}
		let class = value.opt_string_at("class")?.ok_or_else(|| JaffleError::NotFound {
			key: format!("app.{name}.class"),
		})?;
		Ok(Some(AppEntry {
			name: name.to_string(),
			class,
			kernel: value.opt_string_at("kernel")?,
			start: value.opt_string_at("start")?,
			options: value.lookup("options").cloned().unwrap_or_else(ConfigValue::empty_map),
		}))
	}
}

/// A started app and the code to run once it is up.
struct RunningApp {
	app: Box<dyn App>,
	session: Option<String>,
	start: Option<String>,
}

struct Prepared {
	router: Arc<LogRouter>,
	entries: Vec<AppEntry>,
	apps: Vec<Box<dyn App>>,
	processes: Vec<CommandSpec>,
}

pub struct Orchestrator {
	config: JaffleConfig,
	base_dir: PathBuf,
	status_path: PathBuf,
	registry: ActionRegistry,
	backend: Arc<dyn ExecutionBackend>,
}

impl Orchestrator {
	pub fn new(config: JaffleConfig, base_dir: impl Into<PathBuf>) -> Self {
		let base_dir = base_dir.into();
		Orchestrator {
			config,
			status_path: status_path(&base_dir),
			backend: Arc::new(ShellBackend::new(base_dir.clone())),
			registry: ActionRegistry::builtin(),
			base_dir,
		}
	}

	pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
		self.backend = backend;
		self
	}

	pub fn status_path(&self) -> &Path {
		&self.status_path
	}

	/// One session per `[kernel.<name>]` entry, with fresh ids.
	pub fn sessions(&self) -> Result<BTreeMap<String, SessionData>> {
		let mut sessions = BTreeMap::new();
		for (name, kernel) in self.config.kernel()?.entries() {
			let kernel_name = kernel.string_at("kernel_name", DEFAULT_KERNEL_NAME)?;
			sessions.insert(
				name.clone(),
				SessionData {
					id: Uuid::new_v4().to_string(),
					name: name.clone(),
					kernel: Some(KernelData {
						id: Uuid::new_v4().to_string(),
						name: kernel_name,
					}),
				},
			);
		}
		Ok(sessions)
	}

	/// The enabled apps; each must name a known kernel, if any.
	pub fn app_entries(&self) -> Result<Vec<AppEntry>> {
		let kernels = self.config.kernel()?;
		let mut entries = Vec::new();
		for (name, value) in self.config.app()?.entries() {
			let Some(entry) = AppEntry::from_config(name, value)? else {
				info!(app = %name, "app disabled");
				continue;
			};
			if let Some(kernel) = &entry.kernel
				&& kernels.lookup(kernel.as_str()).is_none()
			{
				return Err(JaffleError::NotFound {
					key: format!("kernel.{kernel}"),
				});
			}
			entries.push(entry);
		}
		Ok(entries)
	}

	/// The enabled `[process.<name>]` entries.
	pub fn process_specs(&self) -> Result<Vec<CommandSpec>> {
		let mut specs = Vec::new();
		for (name, value) in self.config.process()?.entries() {
			if value.bool_at("disabled", false)? {
				info!(process = %name, "process disabled");
				continue;
			}
			specs.push(CommandSpec::from_config(name, value)?);
		}
		Ok(specs)
	}

	/// Build every enabled app through the registry.
	pub fn build_apps(&self, entries: &[AppEntry], jobs: Arc<JobRunner>) -> Result<Vec<Box<dyn App>>> {
		entries
			.iter()
			.map(|entry| {
				let ctx = AppContext {
					name: entry.name.clone(),
					session_name: entry.kernel.clone(),
					options: entry.options.clone(),
					base_dir: self.base_dir.clone(),
					backend: self.backend.clone(),
					jobs: jobs.clone(),
				};
				self.registry.create(&entry.class, ctx)
			})
			.collect()
	}

	pub fn build_status(
		&self,
		port: Option<u16>,
		sessions: BTreeMap<String, SessionData>,
		entries: &[AppEntry],
	) -> Result<Status> {
		let mut status = Status::new(std::process::id());
		status.port = port;
		status.namespace = self.config.namespace().raw_values().clone();
		status.variables = self.config.variables().values().clone();
		status.sessions = sessions;
		for entry in entries {
			status.add_app(AppData {
				name: entry.name.clone(),
				session_name: entry.kernel.clone(),
				class: entry.class.clone(),
				start: entry.start.clone(),
				options: entry.options.raw(true)?,
			});
		}
		Ok(status)
	}

	fn prepare(&self) -> Result<Prepared> {
		let loggers = LoggerTree::from_config(&self.config)?;
		let router = Arc::new(LogRouter::new(self.config.filters().clone(), loggers));
		let jobs = Arc::new(JobRunner::from_config(&self.config, &self.base_dir, router.clone())?);
		let entries = self.app_entries()?;
		let apps = self.build_apps(&entries, jobs)?;
		let processes = self.process_specs()?;
		Ok(Prepared {
			router,
			entries,
			apps,
			processes,
		})
	}

	/// Check everything `run` would check, without starting anything.
	///
	/// Returns the number of enabled apps.
	pub fn validate(&self) -> Result<usize> {
		Ok(self.prepare()?.apps.len())
	}

	/// Run until `shutdown` completes.
	///
	/// Refuses to start when a status file already exists. Everything is
	/// validated before the status file is written.
	pub async fn run<F>(self, shutdown: F) -> Result<()>
	where
		F: Future<Output = ()>,
	{
		if self.status_path.exists() {
			return Err(JaffleError::AlreadyRunning {
				path: self.status_path.clone(),
			});
		}

		let Prepared {
			router,
			entries,
			apps,
			processes,
		} = self.prepare()?;

		let channel = MessageChannel::bind().await?;
		let status = self.build_status(Some(channel.port()), self.sessions()?, &entries)?;
		status.save_async(&self.status_path).await?;
		info!(port = channel.port(), status = %self.status_path.display(), "jaffle started");

		let server = tokio::spawn(channel.serve(router.clone()));

		let running = apps
			.into_iter()
			.zip(&entries)
			.map(|(app, entry)| RunningApp {
				app,
				session: entry.kernel.clone(),
				start: entry.start.clone(),
			})
			.collect();
		let result = self.supervise(running, processes, router, shutdown).await;

		server.abort();
		if let Err(e) = status.destroy_async(&self.status_path).await {
			warn!("Failed to remove status file: {}", e);
		}
		info!("jaffle stopped");
		result
	}

	async fn supervise<F>(
		&self,
		mut apps: Vec<RunningApp>,
		specs: Vec<CommandSpec>,
		router: Arc<LogRouter>,
		shutdown: F,
	) -> Result<()>
	where
		F: Future<Output = ()>,
	{
		self.backend.on_start().await?;

		let mut processes = Vec::new();
		let mut started = 0;
		let mut result = Ok(());

		for running in &mut apps {
			if let Err(e) = self.start_app(running).await {
				result = Err(e);
				break;
			}
			started += 1;
		}

		if result.is_ok() {
			for spec in &specs {
				match ProcessHandle::spawn(spec, &self.base_dir, router.clone()) {
					Ok(process) => processes.push(process),
					Err(e) => {
						result = Err(e);
						break;
					}
				}
			}
		}

		if result.is_ok() {
			shutdown.await;
			info!("shutting down");
		}

		for process in processes.into_iter().rev() {
			let name = process.name().to_string();
			if let Err(e) = process.stop().await {
				error!(process = %name, "Failed to stop process: {}", e);
			}
		}
		for running in apps[..started].iter_mut().rev() {
			if let Err(e) = running.app.stop().await {
				error!(app = %running.app.name(), "Failed to stop app: {}", e);
			}
		}
		if let Err(e) = self.backend.on_stop().await {
			error!("Execution backend failed to stop: {}", e);
		}

		result
	}

	async fn start_app(&self, running: &mut RunningApp) -> Result<()> {
		running.app.start().await?;
		if let Some(code) = &running.start {
			self.backend
				.execute_code(running.session.as_deref(), code, None)
				.await
				.map_err(|e| JaffleError::ActionFailed {
					action: format!("app.{}.start", running.app.name()),
					message: e.to_string(),
				})?;
		}
		info!(app = %running.app.name(), "app started");
		Ok(())
	}
}

/// How [`stop_running`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
	/// There was no status file.
	NotRunning,
	/// The status file named no live process; it was removed.
	Stale,
	/// The instance exited after SIGTERM.
	Stopped { pid: u32 },
	/// The instance ignored SIGTERM and was killed.
	Killed { pid: u32 },
}

/// Stop the instance recorded in the status file at `path`.
///
/// Sends SIGTERM and waits up to `timeout` for the process to exit or to
/// remove its own status file, then sends SIGKILL and waits again. Once the
/// process is gone the status file is removed if it is still there.
#[cfg(unix)]
pub fn stop_running(path: &Path, timeout: Duration) -> Result<StopOutcome> {
	use crate::signal::{Signal, is_alive, signal_process, wait_until};

	if !path.exists() {
		return Ok(StopOutcome::NotRunning);
	}
	let status = Status::load(path)?;
	let Some(pid) = status.pid else {
		status.destroy(path)?;
		return Ok(StopOutcome::Stale);
	};

	info!(pid, "stopping jaffle");
	if !signal_process(pid, Signal::SIGTERM)? {
		status.destroy(path)?;
		return Ok(StopOutcome::Stale);
	}

	let outcome = if wait_until(timeout, || !is_alive(pid) || !path.exists()) {
		StopOutcome::Stopped { pid }
	} else {
		warn!(pid, "jaffle did not stop within {:?}, sending SIGKILL", timeout);
		signal_process(pid, Signal::SIGKILL)?;
		if !wait_until(timeout, || !is_alive(pid)) {
			return Err(JaffleError::StopFailed { pid });
		}
		StopOutcome::Killed { pid }
	};

	status.destroy(path)?;
	Ok(outcome)
}
