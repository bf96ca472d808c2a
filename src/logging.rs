//! Logging setup and the tree of named loggers.

use crate::config::{ConfigValue, JaffleConfig};
use crate::error::{JaffleError, Result};
use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Name of the root logger.
pub const ROOT_LOGGER: &str = "jaffle";

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Output goes to stderr so that
/// command output on stdout stays machine-readable.
pub fn init_tracing() {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| DEFAULT_DIRECTIVE.into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();
}

/// Parse a level name. `warning` and `critical` are accepted as aliases.
pub fn parse_level(name: &str) -> Option<Level> {
	match name.trim().to_ascii_lowercase().as_str() {
		"trace" => Some(Level::TRACE),
		"debug" => Some(Level::DEBUG),
		"info" => Some(Level::INFO),
		"warn" | "warning" => Some(Level::WARN),
		"error" | "critical" => Some(Level::ERROR),
		_ => None,
	}
}

#[derive(Debug, Clone)]
struct LoggerNode {
	name: String,
	parent: Option<usize>,
	level: Option<Level>,
}

/// Named loggers with fixed parent links.
///
/// A logger without its own level uses its parent's; the root always has one.
/// Unknown names fall back to the root.
#[derive(Debug, Clone)]
pub struct LoggerTree {
	nodes: Vec<LoggerNode>,
	index: HashMap<String, usize>,
}

/// Builder for [`LoggerTree`].
#[derive(Debug, Clone)]
pub struct LoggerTreeBuilder {
	tree: LoggerTree,
}

impl LoggerTreeBuilder {
	/// Add `name` under the root.
	pub fn child(self, name: &str, level: Option<Level>) -> Self {
		self.child_of(ROOT_LOGGER, name, level)
	}

	/// Add `name` under `parent`, or under the root if `parent` is unknown.
	pub fn child_of(mut self, parent: &str, name: &str, level: Option<Level>) -> Self {
		let parent = self.tree.index.get(parent).copied().unwrap_or(0);
		match self.tree.index.get(name) {
			Some(&existing) => {
				let node = &mut self.tree.nodes[existing];
				if level.is_some() {
					node.level = level;
				}
			}
			None => {
				self.tree.index.insert(name.to_string(), self.tree.nodes.len());
				self.tree.nodes.push(LoggerNode {
					name: name.to_string(),
					parent: Some(parent),
					level,
				});
			}
		}
		self
	}

	pub fn build(self) -> LoggerTree {
		self.tree
	}
}

impl LoggerTree {
	pub fn builder(root_level: Level) -> LoggerTreeBuilder {
		let mut index = HashMap::new();
		index.insert(ROOT_LOGGER.to_string(), 0);
		LoggerTreeBuilder {
			tree: LoggerTree {
				nodes: vec![LoggerNode {
					name: ROOT_LOGGER.to_string(),
					parent: None,
					level: Some(root_level),
				}],
				index,
			},
		}
	}

	/// Build from `[logger] level` and the `logger.level` of every app,
	/// process and job.
	pub fn from_config(config: &JaffleConfig) -> Result<Self> {
		let root_level = level_at(config.logger()?, "logger")?.unwrap_or(Level::INFO);
		let mut builder = Self::builder(root_level);

		for section in ["app", "process", "job"] {
			for (name, entry) in config.section(section)?.entries() {
				let level = match entry.lookup("logger") {
					Some(logger) => level_at(logger, &format!("{section}.{name}.logger"))?,
					None => None,
				};
				builder = builder.child(name, level);
			}
		}

		Ok(builder.build())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.index.contains_key(name)
	}

	pub fn parent(&self, name: &str) -> Option<&str> {
		let node = &self.nodes[*self.index.get(name)?];
		node.parent.map(|parent| self.nodes[parent].name.as_str())
	}

	/// The level a logger actually filters at.
	pub fn effective_level(&self, name: &str) -> Level {
		let mut current = self.index.get(name).copied().unwrap_or(0);
		loop {
			let node = &self.nodes[current];
			match (node.level, node.parent) {
				(Some(level), _) => return level,
				(None, Some(parent)) => current = parent,
				(None, None) => return Level::INFO,
			}
		}
	}

	pub fn enabled(&self, name: &str, level: Level) -> bool {
		level <= self.effective_level(name)
	}

	/// Emit `message` through tracing when `name` is enabled at `level`.
	///
	/// Returns whether the message was emitted.
	pub fn emit(&self, name: &str, level: Level, message: &str) -> bool {
		if !self.enabled(name, level) {
			return false;
		}
		match level {
			Level::ERROR => tracing::error!(logger = %name, "{message}"),
			Level::WARN => tracing::warn!(logger = %name, "{message}"),
			Level::INFO => tracing::info!(logger = %name, "{message}"),
			Level::DEBUG => tracing::debug!(logger = %name, "{message}"),
			_ => tracing::trace!(logger = %name, "{message}"),
		}
		true
	}
}

fn level_at(logger: &ConfigValue, key: &str) -> Result<Option<Level>> {
	match logger.opt_string_at("level")? {
		None => Ok(None),
		Some(name) => parse_level(&name)
			.map(Some)
			.ok_or_else(|| JaffleError::TypeMismatch {
				key: format!("{key}.level"),
				expected: "a log level",
			}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::parse_config_str;
	use crate::template::FunctionRegistry;
	use std::collections::BTreeMap;
	use std::path::Path;

	fn config(content: &str) -> JaffleConfig {
		let raw = parse_config_str(content, Path::new("jaffle.toml")).unwrap();
		JaffleConfig::create(raw, BTreeMap::new(), &BTreeMap::new(), FunctionRegistry::builtin()).unwrap()
	}

	#[test]
	fn test_parse_level() {
		assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
		assert_eq!(parse_level("warning"), Some(Level::WARN));
		assert_eq!(parse_level("critical"), Some(Level::ERROR));
		assert_eq!(parse_level("loud"), None);
	}

	#[test]
	fn test_effective_level_inherits() {
		let tree = LoggerTree::builder(Level::WARN)
			.child("web", Some(Level::DEBUG))
			.child("worker", None)
			.child_of("web", "web.access", None)
			.build();

		assert_eq!(tree.effective_level("jaffle"), Level::WARN);
		assert_eq!(tree.effective_level("web"), Level::DEBUG);
		assert_eq!(tree.effective_level("web.access"), Level::DEBUG);
		assert_eq!(tree.effective_level("worker"), Level::WARN);
		assert_eq!(tree.effective_level("unknown"), Level::WARN);
		assert_eq!(tree.parent("web.access"), Some("web"));
		assert_eq!(tree.parent("jaffle"), None);
	}

	#[test]
	fn test_enabled_and_emit() {
		let tree = LoggerTree::builder(Level::INFO).child("quiet", Some(Level::ERROR)).build();

		assert!(tree.enabled("jaffle", Level::WARN));
		assert!(!tree.enabled("jaffle", Level::DEBUG));
		assert!(!tree.emit("quiet", Level::INFO, "dropped"));
		assert!(tree.emit("quiet", Level::ERROR, "kept"));
	}

	#[test]
	fn test_from_config() {
		let tree = LoggerTree::from_config(&config(
			r#"
[logger]
level = "debug"

[app.web]
class = "watchdog"
logger = { level = "error" }

[job.test]
command = "pytest"
"#,
		))
		.unwrap();

		assert_eq!(tree.effective_level("jaffle"), Level::DEBUG);
		assert_eq!(tree.effective_level("web"), Level::ERROR);
		assert_eq!(tree.effective_level("test"), Level::DEBUG);
		assert!(tree.contains("test"));
	}

	#[test]
	fn test_from_config_rejects_unknown_level() {
		let err = LoggerTree::from_config(&config("[logger]\nlevel = \"loud\"")).unwrap_err();
		match err {
			JaffleError::TypeMismatch { key, .. } => assert_eq!(key, "logger.level"),
			other => panic!("Expected TypeMismatch error, got {other:?}"),
		}
	}
}
