//! A small path query language over JSON data, modelled on `jq` paths.
//!
//! Supported: `.`, `.key`, `."quoted key"`, `.[N]` (negative indices count
//! from the end), `.[]` and any chain of those such as `.items[].name`.

use crate::error::{JaffleError, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Step {
	Field(String),
	Index(i64),
	Iterate,
}

fn parse_query(query: &str) -> std::result::Result<Vec<Step>, String> {
	let query = query.trim();
	if !query.starts_with('.') {
		return Err(format!("query must start with '.': {query:?}"));
	}

	let chars: Vec<char> = query.chars().collect();
	let mut steps = Vec::new();
	let mut i = 0;

	while i < chars.len() {
		match chars[i] {
			'.' => {
				i += 1;
				match chars.get(i) {
					None => {}
					Some('[') => {}
					Some('"') => {
						let start = i + 1;
						let end = chars[start..]
							.iter()
							.position(|&c| c == '"')
							.map(|p| start + p)
							.ok_or_else(|| "unterminated quoted key".to_string())?;
						steps.push(Step::Field(chars[start..end].iter().collect()));
						i = end + 1;
					}
					Some(c) if c.is_alphanumeric() || *c == '_' => {
						let start = i;
						while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
							i += 1;
						}
						steps.push(Step::Field(chars[start..i].iter().collect()));
					}
					Some(c) => return Err(format!("unexpected character {c:?} after '.'")),
				}
			}
			'[' => {
				let start = i + 1;
				let end = chars[start..]
					.iter()
					.position(|&c| c == ']')
					.map(|p| start + p)
					.ok_or_else(|| "unterminated '['".to_string())?;
				let inner: String = chars[start..end].iter().collect();
				let inner = inner.trim();
				if inner.is_empty() {
					steps.push(Step::Iterate);
				} else if let Some(key) = inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
					steps.push(Step::Field(key.to_string()));
				} else {
					let index = inner.parse().map_err(|_| format!("invalid index {inner:?}"))?;
					steps.push(Step::Index(index));
				}
				i = end + 1;
			}
			c => return Err(format!("unexpected character {c:?}")),
		}
	}

	Ok(steps)
}

fn apply_step(step: &Step, value: &Value, out: &mut Vec<Value>) -> std::result::Result<(), String> {
	match (step, value) {
		(Step::Field(_), Value::Null) | (Step::Index(_), Value::Null) => out.push(Value::Null),
		(Step::Field(name), Value::Object(map)) => out.push(map.get(name).cloned().unwrap_or(Value::Null)),
		(Step::Index(index), Value::Array(items)) => {
			let len = items.len() as i64;
			let actual = if *index < 0 { len + index } else { *index };
			let item = if (0..len).contains(&actual) {
				items[actual as usize].clone()
			} else {
				Value::Null
			};
			out.push(item);
		}
		(Step::Iterate, Value::Array(items)) => out.extend(items.iter().cloned()),
		(Step::Iterate, Value::Object(map)) => out.extend(map.values().cloned()),
		(Step::Field(name), other) => return Err(format!("cannot index {} with {name:?}", kind(other))),
		(Step::Index(_), other) => return Err(format!("cannot index {} with number", kind(other))),
		(Step::Iterate, other) => return Err(format!("cannot iterate over {}", kind(other))),
	}
	Ok(())
}

fn kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

/// Run `query` against `data`, returning every result.
pub fn query_all(query: &str, data: &Value) -> Result<Vec<Value>> {
	let invalid = |message: String| JaffleError::InvalidQuery {
		query: query.to_string(),
		message,
	};
	let steps = parse_query(query).map_err(invalid)?;
	let mut current = vec![data.clone()];

	for step in &steps {
		let mut next = Vec::new();
		for value in &current {
			apply_step(step, value, &mut next).map_err(invalid)?;
		}
		current = next;
	}

	Ok(current)
}

/// Run `query` against `data`, returning the first result or `null`.
pub fn query_first(query: &str, data: &Value) -> Result<Value> {
	Ok(query_all(query, data)?.into_iter().next().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn data() -> Value {
		json!({
			"name": "jaffle",
			"items": [{"id": 1, "tags": ["a"]}, {"id": 2, "tags": []}],
			"odd key": true
		})
	}

	#[test]
	fn test_identity() {
		assert_eq!(query_all(".", &data()).unwrap(), vec![data()]);
	}

	#[test]
	fn test_field_and_index() {
		assert_eq!(query_first(".name", &data()).unwrap(), json!("jaffle"));
		assert_eq!(query_first(".items[1].id", &data()).unwrap(), json!(2));
		assert_eq!(query_first(".items[-1].id", &data()).unwrap(), json!(2));
		assert_eq!(query_first(".items[9]", &data()).unwrap(), Value::Null);
		assert_eq!(query_first(".\"odd key\"", &data()).unwrap(), json!(true));
		assert_eq!(query_first(".missing.deeper", &data()).unwrap(), Value::Null);
	}

	#[test]
	fn test_iterate() {
		assert_eq!(query_all(".items[].id", &data()).unwrap(), vec![json!(1), json!(2)]);
		assert_eq!(query_all(".items[].tags[]", &data()).unwrap(), vec![json!("a")]);
		assert_eq!(query_first(".items[].tags[]", &json!({"items": []})).unwrap(), Value::Null);
	}

	#[test]
	fn test_errors() {
		match query_all("name", &data()).unwrap_err() {
			JaffleError::InvalidQuery { query, message } => {
				assert_eq!(query, "name");
				assert!(message.contains("must start with '.'"));
			}
			other => panic!("Expected InvalidQuery error, got {other:?}"),
		}
		assert!(query_all(".name.first", &data()).is_err());
		assert!(query_all(".name[]", &data()).is_err());
		assert!(query_all(".items[x]", &data()).is_err());
	}
}
