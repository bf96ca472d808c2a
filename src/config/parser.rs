use crate::config::value::RawValue;
use crate::error::{JaffleError, Result};
use std::path::Path;

/// Top-level sections of a config file. Each must be a table when present.
pub const SECTIONS: [&str; 6] = ["variable", "kernel", "app", "process", "job", "logger"];

/// Parse a config file from the given path.
pub fn parse_config_file(path: &Path) -> Result<RawValue> {
	let content = std::fs::read_to_string(path).map_err(|source| JaffleError::ConfigReadError {
		path: path.to_path_buf(),
		source,
	})?;

	parse_config_str(&content, path)
}

/// Parse a config from a string (useful for testing).
pub fn parse_config_str(content: &str, path: &Path) -> Result<RawValue> {
	let table: toml::Table = toml::from_str(content).map_err(|source| JaffleError::ConfigParseError {
		path: path.to_path_buf(),
		source,
	})?;

	let raw = RawValue::from(toml::Value::Table(table));
	validate(&raw)?;

	Ok(raw)
}

fn validate(raw: &RawValue) -> Result<()> {
	for section in SECTIONS {
		if let Some(value) = raw.get(section)
			&& value.as_map().is_none()
		{
			return Err(JaffleError::TypeMismatch {
				key: section.to_string(),
				expected: "a table",
			});
		}
	}
	Ok(())
}
