//! The status file of a running `jaffle start`.
//!
//! Every read and write holds an advisory lock on `<path>.lock`. Acquisition
//! polls until a timeout and is never retried after it expires.

use crate::config::RawValue;
use crate::error::{JaffleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Directory holding runtime files, relative to the working directory.
pub const STATE_DIR: &str = ".jaffle";

/// File name of the status file inside [`STATE_DIR`].
pub const STATUS_FILE_NAME: &str = "status.json";

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Path of the status file for a working directory.
pub fn status_path(dir: &Path) -> PathBuf {
	dir.join(STATE_DIR).join(STATUS_FILE_NAME)
}

fn lock_path(path: &Path) -> PathBuf {
	let mut name = path.as_os_str().to_owned();
	name.push(".lock");
	PathBuf::from(name)
}

/// An exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
	path: PathBuf,
	_file: File,
}

impl FileLock {
	/// Lock `<path>.lock`, creating it if needed.
	pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
		let path = lock_path(path);
		let file = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&path)
			.map_err(|source| JaffleError::StateWrite {
				path: path.clone(),
				source,
			})?;

		let started = Instant::now();
		loop {
			match file.try_lock() {
				Ok(()) => return Ok(FileLock { path, _file: file }),
				Err(TryLockError::WouldBlock) => {
					if started.elapsed() >= timeout {
						return Err(JaffleError::LockTimeout { path, timeout });
					}
					std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout));
				}
				Err(TryLockError::Error(source)) => {
					return Err(JaffleError::StateWrite { path, source });
				}
			}
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelData {
	pub id: String,
	pub name: String,
}

/// A kernel instance and the session attached to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
	pub id: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub kernel: Option<KernelData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppData {
	pub name: String,
	#[serde(default)]
	pub session_name: Option<String>,
	#[serde(default)]
	pub class: String,
	#[serde(default)]
	pub start: Option<String>,
	#[serde(default)]
	pub options: RawValue,
}

/// Everything other commands need to know about a running instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
	#[serde(default)]
	pub pid: Option<u32>,
	#[serde(default)]
	pub port: Option<u16>,
	/// Raw template names the instance was started with.
	#[serde(default)]
	pub namespace: BTreeMap<String, String>,
	/// Resolved variable literals.
	#[serde(default)]
	pub variables: BTreeMap<String, String>,
	#[serde(default)]
	pub sessions: BTreeMap<String, SessionData>,
	#[serde(default)]
	pub apps: BTreeMap<String, AppData>,
	#[serde(skip)]
	lock_timeout: Option<Duration>,
}

impl Status {
	pub fn new(pid: u32) -> Self {
		Status {
			pid: Some(pid),
			..Default::default()
		}
	}

	pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
		self.lock_timeout = Some(timeout);
		self
	}

	pub fn lock_timeout(&self) -> Duration {
		self.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT)
	}

	pub fn add_session(&mut self, id: impl Into<String>, name: impl Into<String>, kernel: Option<KernelData>) {
		let name = name.into();
		self.sessions.insert(
			name.clone(),
			SessionData {
				id: id.into(),
				name,
				kernel,
			},
		);
	}

	pub fn add_app(&mut self, app: AppData) {
		self.apps.insert(app.name.clone(), app);
	}

	/// Read the status file at `path`.
	pub fn load(path: &Path) -> Result<Self> {
		Self::load_with_timeout(path, DEFAULT_LOCK_TIMEOUT)
	}

	/// A missing status file fails with `StateRead` before any lock file is created.
	pub fn load_with_timeout(path: &Path, timeout: Duration) -> Result<Self> {
		if let Err(source) = std::fs::metadata(path) {
			return Err(JaffleError::StateRead {
				path: path.to_path_buf(),
				source,
			});
		}
		let _lock = FileLock::acquire(path, timeout)?;
		let content = std::fs::read_to_string(path).map_err(|source| JaffleError::StateRead {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&content).map_err(|source| JaffleError::StateFormat {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Write the status file, creating its directory if needed.
	pub fn save(&self, path: &Path) -> Result<()> {
		let write_error = |source| JaffleError::StateWrite {
			path: path.to_path_buf(),
			source,
		};
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(write_error)?;
		}

		let _lock = FileLock::acquire(path, self.lock_timeout())?;
		let content = serde_json::to_string_pretty(self).map_err(|source| JaffleError::StateFormat {
			path: path.to_path_buf(),
			source,
		})?;
		std::fs::write(path, content).map_err(write_error)?;
		tracing::debug!(path = %path.display(), "status saved");
		Ok(())
	}

	/// [`Status::save`] on the blocking thread pool, for async callers.
	pub async fn save_async(&self, path: &Path) -> Result<()> {
		let status = self.clone();
		let path = path.to_path_buf();
		tokio::task::spawn_blocking(move || status.save(&path))
			.await
			.map_err(std::io::Error::other)?
	}

	/// [`Status::destroy`] on the blocking thread pool, for async callers.
	pub async fn destroy_async(&self, path: &Path) -> Result<()> {
		let status = self.clone();
		let path = path.to_path_buf();
		tokio::task::spawn_blocking(move || status.destroy(&path))
			.await
			.map_err(std::io::Error::other)?
	}

	/// Delete the status file and its lock file.
	pub fn destroy(&self, path: &Path) -> Result<()> {
		let write_error = |source| JaffleError::StateWrite {
			path: path.to_path_buf(),
			source,
		};
		let remove = |path: &Path| match std::fs::remove_file(path) {
			Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(write_error(e)),
			_ => Ok(()),
		};
		// The running instance may remove the file itself at any moment.
		if path.exists() {
			let _lock = FileLock::acquire(path, self.lock_timeout())?;
			remove(path)?;
		}
		remove(&lock_path(path))
	}
}
