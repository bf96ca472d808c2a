use crate::error::{JaffleError, Result};
use crate::template::{Namespace, TemplateString};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Un-interpolated configuration data as parsed from a source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	List(Vec<RawValue>),
	Map(IndexMap<String, RawValue>),
}

impl RawValue {
	/// An empty map, the shape of every top-level config section.
	pub fn empty_map() -> Self {
		RawValue::Map(IndexMap::new())
	}

	pub fn as_map(&self) -> Option<&IndexMap<String, RawValue>> {
		match self {
			RawValue::Map(map) => Some(map),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			RawValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Look up a key when this value is a map.
	pub fn get(&self, key: &str) -> Option<&RawValue> {
		self.as_map().and_then(|map| map.get(key))
	}

	/// Name of the dynamic type, used in error messages.
	pub fn type_name(&self) -> &'static str {
		match self {
			RawValue::Null => "null",
			RawValue::Bool(_) => "bool",
			RawValue::Int(_) => "int",
			RawValue::Float(_) => "float",
			RawValue::String(_) => "string",
			RawValue::List(_) => "list",
			RawValue::Map(_) => "map",
		}
	}
}

impl From<toml::Value> for RawValue {
	fn from(value: toml::Value) -> Self {
		match value {
			toml::Value::String(s) => RawValue::String(s),
			toml::Value::Integer(i) => RawValue::Int(i),
			toml::Value::Float(f) => RawValue::Float(f),
			toml::Value::Boolean(b) => RawValue::Bool(b),
			toml::Value::Datetime(dt) => RawValue::String(dt.to_string()),
			toml::Value::Array(items) => RawValue::List(items.into_iter().map(Into::into).collect()),
			toml::Value::Table(table) => RawValue::Map(
				table
					.into_iter()
					.map(|(key, value)| (key, value.into()))
					.collect(),
			),
		}
	}
}

/// Key into a config collection: a map key or a list index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
	Name(&'a str),
	Index(usize),
}

impl<'a> From<&'a str> for Key<'a> {
	fn from(name: &'a str) -> Self {
		Key::Name(name)
	}
}

impl<'a> From<&'a String> for Key<'a> {
	fn from(name: &'a String) -> Self {
		Key::Name(name)
	}
}

impl From<usize> for Key<'_> {
	fn from(index: usize) -> Self {
		Key::Index(index)
	}
}

impl fmt::Display for Key<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Key::Name(name) => f.write_str(name),
			Key::Index(index) => write!(f, "[{index}]"),
		}
	}
}

/// A configuration value whose strings are templates rendered on demand.
///
/// The shape of the tree is fixed when it is created; only the rendering of
/// string scalars is deferred until a caller asks for it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(TemplateString),
	List(Vec<ConfigValue>),
	Map(IndexMap<String, ConfigValue>),
}

impl ConfigValue {
	/// Wrap raw data, binding every string to `namespace`.
	pub fn create(raw: &RawValue, namespace: &Namespace) -> Self {
		match raw {
			RawValue::Null => ConfigValue::Null,
			RawValue::Bool(b) => ConfigValue::Bool(*b),
			RawValue::Int(i) => ConfigValue::Int(*i),
			RawValue::Float(f) => ConfigValue::Float(*f),
			RawValue::String(s) => ConfigValue::String(TemplateString::new(s.clone(), namespace.clone())),
			RawValue::List(items) => ConfigValue::List(
				items
					.iter()
					.map(|item| ConfigValue::create(item, namespace))
					.collect(),
			),
			RawValue::Map(map) => ConfigValue::Map(
				map.iter()
					.map(|(key, value)| (key.clone(), ConfigValue::create(value, namespace)))
					.collect(),
			),
		}
	}

	pub fn empty_map() -> Self {
		ConfigValue::Map(IndexMap::new())
	}

	/// Child at `key`, or `None` when absent or when this value is not a collection.
	pub fn lookup<'k>(&self, key: impl Into<Key<'k>>) -> Option<&ConfigValue> {
		match (self, key.into()) {
			(ConfigValue::Map(map), Key::Name(name)) => map.get(name),
			(ConfigValue::List(items), Key::Index(index)) => items.get(index),
			_ => None,
		}
	}

	/// Unrendered child at `key`.
	pub fn get<'k>(&self, key: impl Into<Key<'k>>) -> Result<&ConfigValue> {
		let key = key.into();
		self.lookup(key).ok_or_else(|| JaffleError::NotFound {
			key: key.to_string(),
		})
	}

	/// Unrendered child at `key`, falling back to `default`.
	pub fn get_or<'a, 'k>(&'a self, key: impl Into<Key<'k>>, default: &'a ConfigValue) -> &'a ConfigValue {
		self.lookup(key).unwrap_or(default)
	}

	/// Materialized child at `key`.
	pub fn get_raw<'k>(&self, key: impl Into<Key<'k>>, render: bool) -> Result<RawValue> {
		self.get(key)?.raw(render)
	}

	/// Materialize the tree, rendering every template string when `render` is set.
	pub fn raw(&self, render: bool) -> Result<RawValue> {
		Ok(match self {
			ConfigValue::Null => RawValue::Null,
			ConfigValue::Bool(b) => RawValue::Bool(*b),
			ConfigValue::Int(i) => RawValue::Int(*i),
			ConfigValue::Float(f) => RawValue::Float(*f),
			ConfigValue::String(template) => {
				if render {
					RawValue::String(template.render()?)
				} else {
					RawValue::String(template.as_str().to_string())
				}
			}
			ConfigValue::List(items) => RawValue::List(
				items
					.iter()
					.map(|item| item.raw(render))
					.collect::<Result<_>>()?,
			),
			ConfigValue::Map(map) => {
				let mut out = IndexMap::with_capacity(map.len());
				for (key, value) in map {
					out.insert(key.clone(), value.raw(render)?);
				}
				RawValue::Map(out)
			}
		})
	}

	pub fn as_template(&self) -> Option<&TemplateString> {
		match self {
			ConfigValue::String(template) => Some(template),
			_ => None,
		}
	}

	pub fn as_map(&self) -> Option<&IndexMap<String, ConfigValue>> {
		match self {
			ConfigValue::Map(map) => Some(map),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[ConfigValue]> {
		match self {
			ConfigValue::List(items) => Some(items),
			_ => None,
		}
	}

	/// Map entries in insertion order; empty for anything but a map.
	pub fn entries(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
		self.as_map().into_iter().flat_map(|map| map.iter())
	}

	pub fn len(&self) -> usize {
		match self {
			ConfigValue::List(items) => items.len(),
			ConfigValue::Map(map) => map.len(),
			_ => 0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Render a scalar to text. Collections are rejected.
	pub fn render_string(&self) -> Result<String> {
		match self {
			ConfigValue::Null => Ok(String::new()),
			ConfigValue::Bool(b) => Ok(b.to_string()),
			ConfigValue::Int(i) => Ok(i.to_string()),
			ConfigValue::Float(f) => Ok(f.to_string()),
			ConfigValue::String(template) => template.render(),
			ConfigValue::List(_) | ConfigValue::Map(_) => Err(JaffleError::TypeMismatch {
				key: "<collection>".to_string(),
				expected: "a scalar",
			}),
		}
	}

	/// Rendered string at `key`, or `default` when the key is absent.
	pub fn string_at(&self, key: &str, default: &str) -> Result<String> {
		match self.lookup(key) {
			Some(value) => value.render_string().map_err(|e| retag(e, key)),
			None => Ok(default.to_string()),
		}
	}

	/// Rendered string at `key`, or `None` when the key is absent.
	pub fn opt_string_at(&self, key: &str) -> Result<Option<String>> {
		self.lookup(key)
			.map(|value| value.render_string().map_err(|e| retag(e, key)))
			.transpose()
	}

	/// Boolean at `key`. Strings accept `true`/`1` and `false`/`0`.
	pub fn bool_at(&self, key: &str, default: bool) -> Result<bool> {
		let mismatch = || JaffleError::TypeMismatch {
			key: key.to_string(),
			expected: "a boolean",
		};
		match self.lookup(key) {
			None | Some(ConfigValue::Null) => Ok(default),
			Some(ConfigValue::Bool(b)) => Ok(*b),
			Some(ConfigValue::Int(i)) => Ok(*i != 0),
			Some(ConfigValue::String(template)) => match template.render()?.trim() {
				"true" | "1" => Ok(true),
				"false" | "0" => Ok(false),
				_ => Err(mismatch()),
			},
			Some(_) => Err(mismatch()),
		}
	}

	/// Number at `key`, accepting integers, floats and numeric strings.
	pub fn f64_at(&self, key: &str, default: f64) -> Result<f64> {
		let mismatch = || JaffleError::TypeMismatch {
			key: key.to_string(),
			expected: "a number",
		};
		match self.lookup(key) {
			None | Some(ConfigValue::Null) => Ok(default),
			Some(ConfigValue::Int(i)) => Ok(*i as f64),
			Some(ConfigValue::Float(f)) => Ok(*f),
			Some(ConfigValue::String(template)) => template.render()?.trim().parse().map_err(|_| mismatch()),
			Some(_) => Err(mismatch()),
		}
	}

	/// Rendered list of strings at `key`; an absent key is an empty list.
	pub fn strings_at(&self, key: &str) -> Result<Vec<String>> {
		match self.lookup(key) {
			None | Some(ConfigValue::Null) => Ok(Vec::new()),
			Some(ConfigValue::List(items)) => items
				.iter()
				.map(|item| item.render_string().map_err(|e| retag(e, key)))
				.collect(),
			Some(_) => Err(JaffleError::TypeMismatch {
				key: key.to_string(),
				expected: "a list",
			}),
		}
	}
}

fn retag(err: JaffleError, key: &str) -> JaffleError {
	match err {
		JaffleError::TypeMismatch { expected, .. } => JaffleError::TypeMismatch {
			key: key.to_string(),
			expected,
		},
		other => other,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::template::FunctionRegistry;
	use crate::variables::VariablesNamespace;
	use std::collections::BTreeMap;

	fn namespace(name: &str) -> Namespace {
		let mut raw = BTreeMap::new();
		raw.insert("name".to_string(), name.to_string());
		Namespace::new(raw, VariablesNamespace::default(), FunctionRegistry::builtin())
	}

	fn sample() -> RawValue {
		let content = r#"
hello = "${name}!"
count = 3
ratio = 1.5
enabled = true
no = ["worries", "problem"]

[nested]
inner = "x-${name}"
"#;
		RawValue::from(toml::Value::Table(toml::from_str(content).unwrap()))
	}

	#[test]
	fn test_create_keeps_shape() {
		let value = ConfigValue::create(&sample(), &namespace("bar"));

		assert!(value.as_map().is_some());
		assert_eq!(value.len(), 6);
		assert!(matches!(value.get("count").unwrap(), ConfigValue::Int(3)));
		assert!(matches!(value.get("enabled").unwrap(), ConfigValue::Bool(true)));
		assert_eq!(value.get("no").unwrap().len(), 2);
		assert!(value.get("hello").unwrap().as_template().is_some());
	}

	#[test]
	fn test_get_returns_unrendered_template() {
		let value = ConfigValue::create(&sample(), &namespace("bar"));
		let hello = value.get("hello").unwrap().as_template().unwrap();

		assert_eq!(hello.as_str(), "${name}!");
		assert_eq!(hello.render().unwrap(), "bar!");
	}

	#[test]
	fn test_get_missing_key_is_not_found() {
		let value = ConfigValue::create(&sample(), &namespace("bar"));

		match value.get("missing").unwrap_err() {
			JaffleError::NotFound { key } => assert_eq!(key, "missing"),
			other => panic!("Expected NotFound error, got {other:?}"),
		}

		let list = value.get("no").unwrap();
		assert!(list.get(1usize).is_ok());
		match list.get(5usize).unwrap_err() {
			JaffleError::NotFound { key } => assert_eq!(key, "[5]"),
			other => panic!("Expected NotFound error, got {other:?}"),
		}
	}

	#[test]
	fn test_get_or_default() {
		let value = ConfigValue::create(&sample(), &namespace("bar"));
		let fallback = ConfigValue::Int(42);

		assert_eq!(value.get_or("missing", &fallback), &fallback);
		assert!(matches!(value.get_or("count", &fallback), ConfigValue::Int(3)));
	}

	#[test]
	fn test_raw_with_and_without_render() {
		let raw = sample();
		let value = ConfigValue::create(&raw, &namespace("bar"));

		assert_eq!(value.raw(false).unwrap(), raw);

		let rendered = value.raw(true).unwrap();
		assert_eq!(rendered.get("hello"), Some(&RawValue::String("bar!".to_string())));
		assert_eq!(
			rendered.get("nested").and_then(|n| n.get("inner")),
			Some(&RawValue::String("x-bar".to_string()))
		);
		assert_eq!(value.get_raw("count", true).unwrap(), RawValue::Int(3));
	}

	#[test]
	fn test_map_preserves_insertion_order() {
		let value = ConfigValue::create(&sample(), &namespace("bar"));
		let keys: Vec<_> = value.entries().map(|(k, _)| k.as_str()).collect();
		assert_eq!(keys, vec!["hello", "count", "ratio", "enabled", "no", "nested"]);
	}

	#[test]
	fn test_typed_accessors() {
		let value = ConfigValue::create(&sample(), &namespace("bar"));

		assert_eq!(value.string_at("hello", "").unwrap(), "bar!");
		assert_eq!(value.string_at("missing", "dflt").unwrap(), "dflt");
		assert!(value.bool_at("enabled", false).unwrap());
		assert!(value.bool_at("missing", true).unwrap());
		assert_eq!(value.f64_at("ratio", 0.0).unwrap(), 1.5);
		assert_eq!(value.f64_at("count", 0.0).unwrap(), 3.0);
		assert_eq!(value.strings_at("no").unwrap(), vec!["worries", "problem"]);
		assert!(value.strings_at("missing").unwrap().is_empty());

		match value.strings_at("count").unwrap_err() {
			JaffleError::TypeMismatch { key, expected } => {
				assert_eq!(key, "count");
				assert_eq!(expected, "a list");
			}
			other => panic!("Expected TypeMismatch error, got {other:?}"),
		}
	}

	#[test]
	fn test_raw_value_json_shape() {
		let raw = sample();
		let json = serde_json::to_value(&raw).unwrap();
		assert_eq!(json["count"], serde_json::json!(3));
		assert_eq!(json["no"], serde_json::json!(["worries", "problem"]));

		let back: RawValue = serde_json::from_value(json).unwrap();
		assert_eq!(back, raw);
	}
}
