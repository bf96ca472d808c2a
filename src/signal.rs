//! Signals to processes and process groups.
//!
//! Delivery to a process that no longer exists is not an error; the
//! functions report it as `false` instead.

use crate::error::{JaffleError, Result};
use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use std::time::{Duration, Instant};

pub use nix::sys::signal::Signal;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// Ids 0 and negative values address groups or every process; never allow them.
fn to_pid(id: u32) -> Result<Pid> {
	match i32::try_from(id) {
		Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
		_ => Err(JaffleError::InvalidPid { pid: id }),
	}
}

fn delivered(result: nix::Result<()>) -> Result<bool> {
	match result {
		Ok(()) => Ok(true),
		Err(Errno::ESRCH) => Ok(false),
		Err(errno) => Err(std::io::Error::from(errno).into()),
	}
}

/// Send `signal` to process `pid`; `false` when there is no such process.
pub fn signal_process(pid: u32, signal: Signal) -> Result<bool> {
	delivered(signal::kill(to_pid(pid)?, signal))
}

/// Send `signal` to every process in group `pgid`; `false` when the group is empty.
pub fn signal_group(pgid: u32, signal: Signal) -> Result<bool> {
	delivered(signal::killpg(to_pid(pgid)?, signal))
}

/// Whether a process with `pid` exists, including ones owned by other users.
pub fn is_alive(pid: u32) -> bool {
	match to_pid(pid) {
		Ok(pid) => matches!(signal::kill(pid, None), Ok(()) | Err(Errno::EPERM)),
		Err(_) => false,
	}
}

/// Poll `done` until it holds or `timeout` passes; returns its last answer.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
	let started = Instant::now();
	loop {
		if done() {
			return true;
		}
		if started.elapsed() >= timeout {
			return false;
		}
		std::thread::sleep(POLL_INTERVAL.min(timeout));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::process::Command;

	#[test]
	fn test_rejects_group_addressing_ids() {
		for pid in [0, u32::MAX] {
			match signal_process(pid, Signal::SIGTERM).unwrap_err() {
				JaffleError::InvalidPid { pid: reported } => assert_eq!(reported, pid),
				other => panic!("Expected InvalidPid error, got {other:?}"),
			}
		}
		assert!(!is_alive(0));
	}

	#[test]
	fn test_signal_terminates_process() {
		let mut child = Command::new("sleep").arg("30").spawn().unwrap();
		let pid = child.id();
		assert!(is_alive(pid));

		assert!(signal_process(pid, Signal::SIGTERM).unwrap());
		child.wait().unwrap();
		assert!(!is_alive(pid));
		assert!(!signal_process(pid, Signal::SIGTERM).unwrap());
	}

	#[test]
	fn test_wait_until() {
		assert!(wait_until(Duration::from_millis(10), || true));

		let started = Instant::now();
		assert!(!wait_until(Duration::from_millis(100), || false));
		assert!(started.elapsed() >= Duration::from_millis(100));
	}
}
