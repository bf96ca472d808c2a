use std::path::PathBuf;
use std::time::Duration;

/// Library-level structured errors for jaffle.
///
/// Use `thiserror` for structured errors that library consumers can match on.
/// The CLI binary wraps these with `anyhow` for rich context chains.
#[derive(Debug, thiserror::Error)]
pub enum JaffleError {
	#[error("Not found: {key}")]
	NotFound { key: String },

	#[error("Cannot convert {value:?} to {target} for variable {name:?} ({reason})")]
	Conversion {
		name: String,
		value: String,
		target: String,
		reason: String,
	},

	#[error("Invalid type for {name:?}: {type_name:?}")]
	InvalidVariableType { name: String, type_name: String },

	#[error("Invalid default value for {name:?}: {value}")]
	InvalidDefault { name: String, value: String },

	#[error("Invalid value for {key}: expected {expected}")]
	TypeMismatch { key: String, expected: &'static str },

	#[error("Template error in {template:?}: {message}")]
	Template { template: String, message: String },

	#[error("Undefined name in template: {name}")]
	UndefinedName { name: String },

	#[error("{function}() failed in template {template:?}")]
	TemplateFunction {
		template: String,
		function: String,
		#[source]
		source: Box<JaffleError>,
	},

	#[error("{function}() is missing argument {position}")]
	MissingArgument { function: String, position: usize },

	#[error("Invalid color: {color:?}")]
	InvalidColor { color: String },

	#[error("Invalid backreference: {reference}")]
	InvalidBackreference { reference: String },

	#[error("Invalid target {target:?} for {pattern:?}: {message}")]
	InvalidTarget {
		pattern: String,
		target: String,
		message: String,
	},

	#[error("Invalid query {query:?}: {message}")]
	InvalidQuery { query: String, message: String },

	#[error("Config file not found: {path}")]
	ConfigNotFound { path: PathBuf },

	#[error("Failed to read config file: {path}")]
	ConfigReadError {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse config file: {path}")]
	ConfigParseError {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Invalid regex pattern: {pattern}")]
	InvalidRegex {
		pattern: String,
		#[source]
		source: regex::Error,
	},

	#[error("Invalid variable assignment: {assignment:?} (expected name=value)")]
	InvalidAssignment { assignment: String },

	#[error("Unknown action type: {class}")]
	UnknownActionType { class: String },

	#[error("Action {action} failed: {message}")]
	ActionFailed { action: String, message: String },

	#[error("Job {name} returned non-zero exit code: {exit_code}")]
	JobFailed { name: String, exit_code: i32 },

	#[error("Failed to spawn command: {command}")]
	CommandFailed {
		command: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Command {command:?} returned non-zero exit code: {exit_code}")]
	CommandExit { command: String, exit_code: i32 },

	#[error("Timed out after {timeout:?} waiting for lock: {path}")]
	LockTimeout { path: PathBuf, timeout: Duration },

	#[error("jaffle is already running in this directory (status file: {path}); use `jaffle stop` to stop it")]
	AlreadyRunning { path: PathBuf },

	#[error("Invalid process id: {pid}")]
	InvalidPid { pid: u32 },

	#[error("Process {pid} did not exit after SIGKILL")]
	StopFailed { pid: u32 },

	#[error("Failed to read status file: {path}")]
	StateRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to write status file: {path}")]
	StateWrite {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Malformed status file: {path}")]
	StateFormat {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("Failed to watch path: {path}")]
	Watch {
		path: PathBuf,
		#[source]
		source: notify::Error,
	},

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl JaffleError {
	pub(crate) fn template(template: &str, message: impl Into<String>) -> Self {
		JaffleError::Template {
			template: template.to_string(),
			message: message.into(),
		}
	}

	/// Name of the variable this error is about, when it is an undefined `var.<name>` access.
	pub fn missing_variable(&self) -> Option<&str> {
		match self {
			JaffleError::NotFound { key } => key.strip_prefix("var."),
			_ => None,
		}
	}
}

/// Result type alias using JaffleError.
pub type Result<T> = std::result::Result<T, JaffleError>;
