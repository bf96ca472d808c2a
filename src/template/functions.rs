use super::query;
use crate::error::{JaffleError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// A value flowing through template expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
}

impl Value {
	/// Text inserted into the rendered template. `null` renders as nothing.
	pub fn render(&self) -> String {
		match self {
			Value::Null => String::new(),
			Value::Bool(b) => b.to_string(),
			Value::Int(i) => i.to_string(),
			Value::Float(f) => format!("{f:?}"),
			Value::Str(s) => s.clone(),
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(s) => Some(s),
			_ => None,
		}
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::Str(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::Str(s)
	}
}

/// A callable usable inside `${...}` expressions.
pub type TemplateFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Named callables available to templates.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
	functions: BTreeMap<String, TemplateFn>,
}

impl FunctionRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry holding the built-in functions.
	pub fn builtin() -> Self {
		let mut registry = Self::new();
		registry.register("env", env);
		registry.register("exec", exec);
		registry.register("fg", fg);
		registry.register("bg", bg);
		registry.register("reset", reset);
		registry.register("jq_all", jq_all);
		registry.register("jq_first", jq_first);
		registry.register("jq", jq_all);
		registry.register("jqf", jq_first);
		registry
	}

	/// Add or replace a function.
	pub fn register<F>(&mut self, name: &str, function: F)
	where
		F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
	{
		self.functions.insert(name.to_string(), Arc::new(function));
	}

	pub fn get(&self, name: &str) -> Option<&TemplateFn> {
		self.functions.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.functions.contains_key(name)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.functions.keys().map(String::as_str)
	}
}

impl fmt::Debug for FunctionRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.functions.keys()).finish()
	}
}

fn string_arg(name: &str, args: &[Value], index: usize) -> Result<String> {
	match args.get(index) {
		Some(Value::Null) | None => Err(JaffleError::MissingArgument {
			function: name.to_string(),
			position: index + 1,
		}),
		Some(value) => Ok(value.render()),
	}
}

fn env(args: &[Value]) -> Result<Value> {
	let name = string_arg("env", args, 0)?;
	let default = args.get(1).map(Value::render).unwrap_or_default();
	Ok(Value::Str(std::env::var(&name).unwrap_or(default)))
}

fn exec(args: &[Value]) -> Result<Value> {
	let command = string_arg("exec", args, 0)?;
	let output = Command::new("sh")
		.arg("-c")
		.arg(&command)
		.stdin(Stdio::null())
		.stderr(Stdio::inherit())
		.output()
		.map_err(|source| JaffleError::CommandFailed {
			command: command.clone(),
			source,
		})?;

	if !output.status.success() {
		return Err(JaffleError::CommandExit {
			command,
			exit_code: output.status.code().unwrap_or(-1),
		});
	}

	let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
	if stdout.ends_with('\n') {
		stdout.pop();
	}
	Ok(Value::Str(stdout))
}

/// ANSI code of a named foreground color.
pub fn color_code(color: &str) -> Option<u8> {
	let (base, bright) = match color.strip_prefix("bright_") {
		Some(rest) => (rest, true),
		None => (color, false),
	};
	let offset = match base {
		"black" => 0,
		"red" => 1,
		"green" => 2,
		"yellow" => 3,
		"blue" => 4,
		"magenta" => 5,
		"cyan" => 6,
		"white" => 7,
		_ => return None,
	};
	Some(if bright { 90 + offset } else { 30 + offset })
}

fn fg(args: &[Value]) -> Result<Value> {
	let color = string_arg("fg", args, 0)?;
	let code = color_code(&color).ok_or(JaffleError::InvalidColor { color })?;
	Ok(Value::Str(format!("\x1b[{code}m")))
}

fn bg(args: &[Value]) -> Result<Value> {
	let color = string_arg("bg", args, 0)?;
	let code = color_code(&color).ok_or(JaffleError::InvalidColor { color })?;
	Ok(Value::Str(format!("\x1b[{}m", code + 10)))
}

fn reset(_args: &[Value]) -> Result<Value> {
	Ok(Value::Str("\x1b[0m".to_string()))
}

fn jq_all(args: &[Value]) -> Result<Value> {
	let query_text = string_arg("jq_all", args, 0)?;
	let data = string_arg("jq_all", args, 1)?;
	let result = parse_data(&query_text, &data)
		.and_then(|data| query::query_all(&query_text, &data))
		.and_then(|results| encode(&query_text, &results));
	Ok(Value::Str(result.unwrap_or_else(|e| jq_error(&e, &query_text, &data))))
}

fn jq_first(args: &[Value]) -> Result<Value> {
	let query_text = string_arg("jq_first", args, 0)?;
	let data = string_arg("jq_first", args, 1)?;
	let result = parse_data(&query_text, &data)
		.and_then(|data| query::query_first(&query_text, &data))
		.and_then(|result| encode(&query_text, &result));
	Ok(Value::Str(result.unwrap_or_else(|e| jq_error(&e, &query_text, &data))))
}

fn parse_data(query_text: &str, data: &str) -> Result<serde_json::Value> {
	serde_json::from_str(data).map_err(|e| JaffleError::InvalidQuery {
		query: query_text.to_string(),
		message: e.to_string(),
	})
}

fn encode<T: serde::Serialize>(query_text: &str, value: &T) -> Result<String> {
	serde_json::to_string(value).map_err(|e| JaffleError::InvalidQuery {
		query: query_text.to_string(),
		message: e.to_string(),
	})
}

// Query failures become visible text rather than aborting the render.
fn jq_error(error: &JaffleError, query_text: &str, data: &str) -> String {
	let message = match error {
		JaffleError::InvalidQuery { message, .. } => message.clone(),
		other => other.to_string(),
	};
	format!("jq error: {message} query: {query_text:?} str: {data:?}")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn call(name: &str, args: &[Value]) -> Result<Value> {
		let registry = FunctionRegistry::builtin();
		let function = registry.get(name).unwrap();
		function(args)
	}

	fn text(name: &str, args: &[Value]) -> String {
		call(name, args).unwrap().render()
	}

	#[test]
	fn test_builtin_names() {
		let registry = FunctionRegistry::builtin();
		let names: Vec<_> = registry.names().collect();
		assert_eq!(
			names,
			vec!["bg", "env", "exec", "fg", "jq", "jq_all", "jq_first", "jqf", "reset"]
		);
	}

	#[test]
	fn test_value_render() {
		assert_eq!(Value::Null.render(), "");
		assert_eq!(Value::Bool(true).render(), "true");
		assert_eq!(Value::Int(-3).render(), "-3");
		assert_eq!(Value::Float(1.0).render(), "1.0");
		assert_eq!(Value::from("x").render(), "x");
	}

	#[test]
	fn test_env() {
		assert_eq!(text("env", &["PATH".into()]), std::env::var("PATH").unwrap());
		assert_eq!(
			text("env", &["JAFFLE_SURELY_UNSET_VAR".into(), "fallback".into()]),
			"fallback"
		);
		assert_eq!(text("env", &["JAFFLE_SURELY_UNSET_VAR".into()]), "");
		assert!(call("env", &[]).is_err());
	}

	#[test]
	fn test_exec() {
		assert_eq!(text("exec", &["echo hello".into()]), "hello");
		assert_eq!(text("exec", &["printf 'a\\n\\n'".into()]), "a\n");
		match call("exec", &["exit 3".into()]).unwrap_err() {
			JaffleError::CommandExit { command, exit_code } => {
				assert_eq!(command, "exit 3");
				assert_eq!(exit_code, 3);
			}
			other => panic!("Expected CommandExit error, got {other:?}"),
		}
	}

	#[test]
	fn test_missing_argument() {
		match call("fg", &[]).unwrap_err() {
			JaffleError::MissingArgument { function, position } => {
				assert_eq!(function, "fg");
				assert_eq!(position, 1);
			}
			other => panic!("Expected MissingArgument error, got {other:?}"),
		}
		assert!(matches!(
			call("jq_all", &[".a".into(), Value::Null]).unwrap_err(),
			JaffleError::MissingArgument { position: 2, .. }
		));
	}

	#[test]
	fn test_fg() {
		assert_eq!(text("fg", &["black".into()]), "\x1b[30m");
		assert_eq!(text("fg", &["red".into()]), "\x1b[31m");
		assert_eq!(text("fg", &["white".into()]), "\x1b[37m");
		assert_eq!(text("fg", &["bright_black".into()]), "\x1b[90m");
		assert_eq!(text("fg", &["bright_white".into()]), "\x1b[97m");
		match call("fg", &["purple".into()]).unwrap_err() {
			JaffleError::InvalidColor { color } => assert_eq!(color, "purple"),
			other => panic!("Expected InvalidColor error, got {other:?}"),
		}
	}

	#[test]
	fn test_bg() {
		assert_eq!(text("bg", &["black".into()]), "\x1b[40m");
		assert_eq!(text("bg", &["cyan".into()]), "\x1b[46m");
		assert_eq!(text("bg", &["bright_red".into()]), "\x1b[101m");
		assert_eq!(text("bg", &["bright_white".into()]), "\x1b[107m");
		assert!(matches!(call("bg", &["bright_".into()]).unwrap_err(), JaffleError::InvalidColor { .. }));
	}

	#[test]
	fn test_reset() {
		assert_eq!(text("reset", &[]), "\x1b[0m");
	}

	#[test]
	fn test_jq() {
		let data = r#"{"a": [1, 2, 3]}"#;
		assert_eq!(text("jq_all", &[".a[]".into(), data.into()]), "[1,2,3]");
		assert_eq!(text("jq", &[".a[]".into(), data.into()]), "[1,2,3]");
		assert_eq!(text("jq_first", &[".a[]".into(), data.into()]), "1");
		assert_eq!(text("jqf", &[".a".into(), data.into()]), "[1,2,3]");
	}

	#[test]
	fn test_jq_error_is_rendered() {
		let result = text("jq_all", &[".a".into(), "not json".into()]);
		assert!(result.starts_with("jq error: "));
		assert!(result.contains("query: \".a\""));
	}

	#[test]
	fn test_register_custom_function() {
		let mut registry = FunctionRegistry::new();
		registry.register("twice", |args| Ok(Value::Str(args[0].render().repeat(2))));

		assert!(registry.contains("twice"));
		assert!(!registry.contains("env"));
		let twice = registry.get("twice").unwrap();
		assert_eq!(twice(&["ab".into()]).unwrap(), Value::from("abab"));
	}
}
