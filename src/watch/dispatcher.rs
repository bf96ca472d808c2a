//! Per-rule coalescing of filesystem events.
//!
//! Each watch rule gets one task that owns its [`DispatchState`]. Events
//! arrive over an unbounded channel in order; the only timer is the state's
//! deadline, so at most one is pending per rule.

use super::event::FsEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

/// Debounce and throttle windows of a rule. A zero window is disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchPolicy {
	pub debounce: Duration,
	pub throttle: Duration,
}

impl DispatchPolicy {
	/// Build from seconds; negative or non-finite values disable the window.
	pub fn from_secs(debounce: f64, throttle: f64) -> Self {
		DispatchPolicy {
			debounce: secs(debounce),
			throttle: secs(throttle),
		}
	}
}

fn secs(value: f64) -> Duration {
	if value.is_finite() && value > 0.0 {
		Duration::from_secs_f64(value)
	} else {
		Duration::ZERO
	}
}

/// Something that runs a rule's actions for an event.
///
/// Implementations must return quickly; long work belongs in a spawned task.
pub trait Invoke: Send + Sync {
	fn invoke(&self, event: FsEvent);
}

/// Where a rule stands between events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DispatchState {
	#[default]
	Idle,
	/// Waiting for the burst to settle; `event` is the most recent one.
	Debouncing { deadline: Instant, event: FsEvent },
	/// An invocation happened; events are dropped until `until`.
	Throttled { until: Instant },
}

impl DispatchState {
	/// Feed an event; returns the event to invoke right away, if any.
	pub fn on_event(&mut self, policy: &DispatchPolicy, now: Instant, event: FsEvent) -> Option<FsEvent> {
		if !policy.debounce.is_zero() {
			*self = DispatchState::Debouncing {
				deadline: now + policy.debounce,
				event,
			};
			return None;
		}

		if !policy.throttle.is_zero() {
			if let DispatchState::Throttled { until } = self
				&& now < *until
			{
				return None;
			}
			*self = DispatchState::Throttled {
				until: now + policy.throttle,
			};
		}

		Some(event)
	}

	/// The deadline has been reached; returns the event to invoke, if any.
	pub fn on_timer(&mut self, now: Instant) -> Option<FsEvent> {
		match std::mem::take(self) {
			DispatchState::Debouncing { deadline, event } if now >= deadline => Some(event),
			DispatchState::Throttled { until } if now >= until => None,
			other => {
				*self = other;
				None
			}
		}
	}

	/// When the state next needs attention.
	pub fn deadline(&self) -> Option<Instant> {
		match self {
			DispatchState::Idle => None,
			DispatchState::Debouncing { deadline, .. } => Some(*deadline),
			DispatchState::Throttled { until } => Some(*until),
		}
	}
}

async fn wait_for(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

/// Handle to a running rule task. Dropping it cancels any pending timer.
#[derive(Debug)]
pub struct RuleDispatcher {
	name: String,
	tx: mpsc::UnboundedSender<FsEvent>,
	task: JoinHandle<()>,
}

impl RuleDispatcher {
	/// Start the task for rule `name`. Must be called within a tokio runtime.
	pub fn spawn(name: impl Into<String>, policy: DispatchPolicy, invoker: Arc<dyn Invoke>) -> Self {
		let name = name.into();
		let (tx, mut rx) = mpsc::unbounded_channel::<FsEvent>();
		let rule = name.clone();

		let task = tokio::spawn(async move {
			let mut state = DispatchState::Idle;
			loop {
				let deadline = state.deadline();
				tokio::select! {
					received = rx.recv() => {
						let Some(event) = received else {
							break;
						};
						trace!(rule = %rule, path = %event.src_path, "event received");
						if let Some(event) = state.on_event(&policy, Instant::now(), event) {
							invoker.invoke(event);
						}
					}
					_ = wait_for(deadline) => {
						if let Some(event) = state.on_timer(Instant::now()) {
							debug!(rule = %rule, path = %event.src_path, "debounce elapsed");
							invoker.invoke(event);
						}
					}
				}
			}
			debug!(rule = %rule, "dispatcher stopped");
		});

		RuleDispatcher { name, tx, task }
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Queue an event; returns `false` once the rule has been torn down.
	pub fn dispatch(&self, event: FsEvent) -> bool {
		self.tx.send(event).is_ok()
	}
}

impl Drop for RuleDispatcher {
	fn drop(&mut self) {
		self.task.abort();
	}
}
