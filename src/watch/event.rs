use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
	Created,
	Modified,
	Deleted,
	Moved,
}

impl EventType {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventType::Created => "created",
			EventType::Modified => "modified",
			EventType::Deleted => "deleted",
			EventType::Moved => "moved",
		}
	}
}

impl fmt::Display for EventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A filesystem change as handed to actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEvent {
	pub event_type: EventType,
	/// Path relative to the working directory, `/`-separated.
	pub src_path: String,
	pub is_directory: bool,
}

impl FsEvent {
	pub fn new(event_type: EventType, src_path: impl Into<String>, is_directory: bool) -> Self {
		FsEvent {
			event_type,
			src_path: src_path.into(),
			is_directory,
		}
	}

	/// Build an event for `path`, made relative to `base` when it lies below it.
	pub fn relative_to(event_type: EventType, path: &Path, base: &Path, is_directory: bool) -> Self {
		let relative = path.strip_prefix(base).unwrap_or(path);
		FsEvent::new(event_type, relative.to_string_lossy(), is_directory)
	}
}
