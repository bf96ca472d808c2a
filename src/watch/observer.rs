//! Filesystem observation through `notify`, bridged into tokio.

use super::event::{EventType, FsEvent};
use crate::error::{JaffleError, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Map a `notify` event kind to the change kinds actions see.
///
/// Access and unclassified events are dropped.
pub fn classify(kind: &EventKind) -> Option<EventType> {
	match kind {
		EventKind::Create(_) => Some(EventType::Created),
		EventKind::Modify(ModifyKind::Name(_)) => Some(EventType::Moved),
		EventKind::Modify(_) => Some(EventType::Modified),
		EventKind::Remove(_) => Some(EventType::Deleted),
		EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
	}
}

fn is_directory(kind: &EventKind, path: &Path) -> bool {
	matches!(
		kind,
		EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder)
	) || path.is_dir()
}

/// Convert one `notify` event into zero or more events relative to `base`.
pub fn convert(event: &Event, base: &Path) -> Vec<FsEvent> {
	let Some(event_type) = classify(&event.kind) else {
		return Vec::new();
	};
	event
		.paths
		.iter()
		.map(|path| FsEvent::relative_to(event_type, path, base, is_directory(&event.kind, path)))
		.collect()
}

/// A recursive watch on one directory.
///
/// Events stop when this value is dropped.
pub struct Observer {
	path: PathBuf,
	_watcher: RecommendedWatcher,
}

impl Observer {
	/// Watch `path` recursively, reporting paths relative to `base`.
	pub fn start(path: &Path, base: &Path) -> Result<(Self, mpsc::UnboundedReceiver<FsEvent>)> {
		let (tx, rx) = mpsc::unbounded_channel();
		let base = base.to_path_buf();
		let watch_error = |source| JaffleError::Watch {
			path: path.to_path_buf(),
			source,
		};

		let mut watcher = RecommendedWatcher::new(
			move |res: notify::Result<Event>| match res {
				Ok(event) => {
					for fs_event in convert(&event, &base) {
						let _ = tx.send(fs_event);
					}
				}
				Err(e) => tracing::error!("Watch error: {:?}", e),
			},
			notify::Config::default(),
		)
		.map_err(watch_error)?;

		watcher.watch(path, RecursiveMode::Recursive).map_err(watch_error)?;
		tracing::info!(path = %path.display(), "watching");

		Ok((
			Observer {
				path: path.to_path_buf(),
				_watcher: watcher,
			},
			rx,
		))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}
