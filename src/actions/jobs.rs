//! Shell commands from `[job.<name>]` and `[process.<name>]` entries.
//!
//! Output lines are logged under the entry's name after passing through the
//! log filters, the same way messages from apps are.

use crate::channel::{Envelope, LogPayload, LogRouter};
use crate::config::{ConfigValue, JaffleConfig};
use crate::error::{JaffleError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use crate::signal::{Signal, signal_group};

/// Environment variable holding the path a job was run against.
pub const TARGET_ENV: &str = "JAFFLE_TARGET";

/// Time a process group gets between SIGTERM and SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// How long output may stay open after the process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A named shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	pub name: String,
	pub command: String,
	pub env: BTreeMap<String, String>,
}

impl CommandSpec {
	pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
		CommandSpec {
			name: name.into(),
			command: command.into(),
			env: BTreeMap::new(),
		}
	}

	/// Read `command` and the optional `env` table of an entry.
	pub fn from_config(name: &str, value: &ConfigValue) -> Result<Self> {
		let command = value.get("command").and_then(ConfigValue::render_string)?;
		let mut env = BTreeMap::new();
		if let Some(table) = value.lookup("env") {
			for (key, entry) in table.entries() {
				env.insert(key.clone(), entry.render_string()?);
			}
		}
		Ok(CommandSpec {
			name: name.to_string(),
			command,
			env,
		})
	}

	/// The same command with `target` appended as its last argument.
	///
	/// The target travels through [`TARGET_ENV`] so it needs no quoting.
	pub fn with_target(&self, target: &str) -> Self {
		let mut spec = self.clone();
		spec.command = format!("{} \"${TARGET_ENV}\"", self.command);
		spec.env.insert(TARGET_ENV.to_string(), target.to_string());
		spec
	}

	/// Start under `sh -c`; with `own_group` the shell leads a new process group.
	fn spawn(&self, cwd: &Path, own_group: bool) -> Result<Child> {
		let mut command = Command::new("sh");
		command
			.arg("-c")
			.arg(&self.command)
			.current_dir(cwd)
			.envs(&self.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		#[cfg(unix)]
		if own_group {
			command.process_group(0);
		}
		#[cfg(not(unix))]
		let _ = own_group;

		command.spawn().map_err(|source| JaffleError::CommandFailed {
			command: self.command.clone(),
			source,
		})
	}
}

/// Log every line of `reader` under `scope`; returns the lines that survived the filters.
async fn pump<R>(reader: Option<R>, scope: &str, levelname: &str, router: &LogRouter) -> Vec<String>
where
	R: AsyncRead + Unpin,
{
	let mut emitted = Vec::new();
	let Some(reader) = reader else {
		return emitted;
	};

	let mut lines = BufReader::new(reader).lines();
	loop {
		let line = match lines.next_line().await {
			Ok(Some(line)) => line,
			Ok(None) => break,
			Err(e) => {
				warn!(scope, "Failed to read command output: {}", e);
				break;
			}
		};
		let envelope = Envelope::log(
			scope,
			LogPayload {
				logger: scope.to_string(),
				levelname: levelname.to_string(),
				message: line,
			},
		);
		match router.route(&envelope) {
			Ok(Some(log)) => {
				router.emit(&log);
				emitted.push(log.message);
			}
			Ok(None) => {}
			Err(e) => warn!(scope, "Failed to filter output: {}", e),
		}
	}
	emitted
}

/// Run `spec` to completion; stdout logs at info and stderr at error.
pub async fn run_command(spec: &CommandSpec, cwd: &Path, router: &LogRouter) -> Result<Vec<String>> {
	debug!(job = %spec.name, command = %spec.command, "running");
	let mut child = spec.spawn(cwd, false)?;
	let stdout = child.stdout.take();
	let stderr = child.stderr.take();

	let (mut out, err) = tokio::join!(
		pump(stdout, &spec.name, "info", router),
		pump(stderr, &spec.name, "error", router)
	);
	let status = child.wait().await?;

	if !status.success() {
		return Err(JaffleError::JobFailed {
			name: spec.name.clone(),
			exit_code: status.code().unwrap_or(-1),
		});
	}
	out.extend(err);
	Ok(out)
}

/// The `[job.<name>]` entries, runnable by name.
#[derive(Debug, Clone)]
pub struct JobRunner {
	jobs: BTreeMap<String, CommandSpec>,
	cwd: PathBuf,
	router: Arc<LogRouter>,
}

impl JobRunner {
	pub fn new(jobs: impl IntoIterator<Item = CommandSpec>, cwd: impl Into<PathBuf>, router: Arc<LogRouter>) -> Self {
		JobRunner {
			jobs: jobs.into_iter().map(|job| (job.name.clone(), job)).collect(),
			cwd: cwd.into(),
			router,
		}
	}

	pub fn from_config(config: &JaffleConfig, cwd: impl Into<PathBuf>, router: Arc<LogRouter>) -> Result<Self> {
		let jobs = config
			.job()?
			.entries()
			.map(|(name, value)| CommandSpec::from_config(name, value))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self::new(jobs, cwd, router))
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.jobs.keys().map(String::as_str)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.jobs.contains_key(name)
	}

	/// Run job `name` and wait for it.
	pub async fn run(&self, name: &str) -> Result<Vec<String>> {
		self.run_with_target(name, None).await
	}

	/// Run job `name`, passing `target` as its last argument when given.
	pub async fn run_with_target(&self, name: &str, target: Option<&str>) -> Result<Vec<String>> {
		let spec = self.jobs.get(name).ok_or_else(|| JaffleError::NotFound {
			key: format!("job.{name}"),
		})?;
		match target {
			Some(target) => run_command(&spec.with_target(target), &self.cwd, &self.router).await,
			None => run_command(spec, &self.cwd, &self.router).await,
		}
	}
}

/// A long-running `[process.<name>]` command.
///
/// The shell leads its own process group so that stopping it reaches every
/// process it started.
#[derive(Debug)]
pub struct ProcessHandle {
	name: String,
	child: Child,
	pgid: Option<u32>,
	output: JoinHandle<()>,
}

impl ProcessHandle {
	/// Start `spec` and log its output until it exits.
	pub fn spawn(spec: &CommandSpec, cwd: &Path, router: Arc<LogRouter>) -> Result<Self> {
		let mut child = spec.spawn(cwd, true)?;
		let stdout = child.stdout.take();
		let stderr = child.stderr.take();
		let name = spec.name.clone();
		let pgid = child.id();

		let scope = name.clone();
		let output = tokio::spawn(async move {
			tokio::join!(
				pump(stdout, &scope, "info", &router),
				pump(stderr, &scope, "error", &router)
			);
		});
		info!(process = %name, pid = ?pgid, "process started");

		Ok(ProcessHandle {
			name,
			child,
			pgid,
			output,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn id(&self) -> Option<u32> {
		self.child.id()
	}

	/// Stop the process and everything it started, waiting [`STOP_GRACE`]
	/// before escalating to SIGKILL.
	pub async fn stop(self) -> Result<()> {
		self.stop_within(STOP_GRACE).await
	}

	/// Like [`ProcessHandle::stop`] with a custom grace period.
	pub async fn stop_within(mut self, grace: Duration) -> Result<()> {
		self.terminate(grace).await?;

		match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut self.output).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => warn!(process = %self.name, "Output task failed: {}", e),
			Err(_) => {
				warn!(process = %self.name, "Output still open after {:?}, killing the process group", OUTPUT_DRAIN_TIMEOUT);
				self.kill_group();
				self.output.abort();
			}
		}
		info!(process = %self.name, "process stopped");
		Ok(())
	}

	#[cfg(unix)]
	async fn terminate(&mut self, grace: Duration) -> Result<()> {
		let Some(pgid) = self.pgid else {
			return Ok(());
		};
		if !signal_group(pgid, Signal::SIGTERM)? {
			return Ok(());
		}
		if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
			warn!(process = %self.name, "Failed to terminate within {:?}, sending SIGKILL", grace);
			signal_group(pgid, Signal::SIGKILL)?;
			self.child.wait().await?;
		}
		Ok(())
	}

	#[cfg(not(unix))]
	async fn terminate(&mut self, _grace: Duration) -> Result<()> {
		if self.child.try_wait()?.is_none() {
			self.child.kill().await?;
		}
		Ok(())
	}

	#[cfg(unix)]
	fn kill_group(&mut self) {
		if let Some(pgid) = self.pgid
			&& let Err(e) = signal_group(pgid, Signal::SIGKILL)
		{
			warn!(process = %self.name, "Failed to kill process group: {}", e);
		}
	}

	#[cfg(not(unix))]
	fn kill_group(&mut self) {
		if let Err(e) = self.child.start_kill() {
			warn!(process = %self.name, "Failed to kill process: {}", e);
		}
	}
}
