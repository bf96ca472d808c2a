//! The seam between watch rules and whatever runs their code.

use crate::error::{JaffleError, Result};
use crate::watch::FsEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs code blocks on behalf of apps.
///
/// `on_start` runs before any app starts and `on_stop` after every app has
/// stopped.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
	async fn on_start(&self) -> Result<()> {
		Ok(())
	}

	async fn on_stop(&self) -> Result<()> {
		Ok(())
	}

	/// Run `code` in `session`. `event` is the change that triggered it, if any.
	async fn execute_code(&self, session: Option<&str>, code: &str, event: Option<&FsEvent>) -> Result<()>;

	/// Forget cached state for `modules` before code runs again.
	async fn clear_cache(&self, modules: &[String]) -> Result<()>;
}

/// Environment describing the triggering event.
pub fn build_event_env(session: Option<&str>, event: Option<&FsEvent>) -> HashMap<String, String> {
	let mut env = HashMap::new();

	if let Some(session) = session {
		env.insert("JAFFLE_SESSION".to_string(), session.to_string());
	}

	if let Some(event) = event {
		env.insert("JAFFLE_EVENT_TYPE".to_string(), event.event_type.as_str().to_string());
		env.insert("JAFFLE_SRC_PATH".to_string(), event.src_path.clone());
		env.insert("JAFFLE_IS_DIRECTORY".to_string(), event.is_directory.to_string());
	}

	env
}

/// Runs code blocks with `sh -c` in a fixed working directory.
#[derive(Debug, Clone)]
pub struct ShellBackend {
	cwd: PathBuf,
}

impl ShellBackend {
	pub fn new(cwd: impl Into<PathBuf>) -> Self {
		ShellBackend { cwd: cwd.into() }
	}

	pub fn cwd(&self) -> &Path {
		&self.cwd
	}
}

#[async_trait]
impl ExecutionBackend for ShellBackend {
	async fn execute_code(&self, session: Option<&str>, code: &str, event: Option<&FsEvent>) -> Result<()> {
		let status = Command::new("sh")
			.arg("-c")
			.arg(code)
			.current_dir(&self.cwd)
			.envs(build_event_env(session, event))
			.stdin(Stdio::null())
			.stdout(Stdio::inherit())
			.stderr(Stdio::inherit())
			.status()
			.await
			.map_err(|source| JaffleError::CommandFailed {
				command: code.to_string(),
				source,
			})?;

		if !status.success() {
			return Err(JaffleError::ActionFailed {
				action: code.to_string(),
				message: format!("exit code {}", status.code().unwrap_or(-1)),
			});
		}
		Ok(())
	}

	async fn clear_cache(&self, modules: &[String]) -> Result<()> {
		// Every shell block starts fresh.
		debug!(?modules, "nothing cached for shell code");
		Ok(())
	}
}
