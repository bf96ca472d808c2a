//! Typed configuration variables and their two-phase resolution.
//!
//! Every variable resolves to the literal text it contributes to templates:
//! strings verbatim, booleans as `true`/`false`, numbers in their canonical
//! form, and lists and maps as a JSON string that itself contains JSON.

use crate::config::{ConfigValue, RawValue};
use crate::error::{JaffleError, Result};
use crate::template::{Namespace, TemplateString, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;

/// Environment prefix that marks a runtime variable override.
pub const VAR_PREFIX: &str = "J_VAR_";

/// Literal produced for a variable with neither a value nor a default.
const NULL_LITERAL: &str = "null";

/// Declared or inferred type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
	String,
	Bool,
	Int,
	Float,
	List,
	Map,
}

impl VarType {
	/// Parse a type name. `str` and `dict` are accepted as aliases.
	pub fn parse(name: &str) -> Option<Self> {
		match name {
			"string" | "str" => Some(VarType::String),
			"bool" => Some(VarType::Bool),
			"int" => Some(VarType::Int),
			"float" => Some(VarType::Float),
			"list" => Some(VarType::List),
			"map" | "dict" => Some(VarType::Map),
			_ => None,
		}
	}

	/// Type implied by a default value.
	pub fn infer(value: &RawValue) -> Option<Self> {
		match value {
			RawValue::String(_) => Some(VarType::String),
			RawValue::Bool(_) => Some(VarType::Bool),
			RawValue::Int(_) => Some(VarType::Int),
			RawValue::Float(_) => Some(VarType::Float),
			RawValue::List(_) => Some(VarType::List),
			RawValue::Map(_) => Some(VarType::Map),
			RawValue::Null => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			VarType::String => "string",
			VarType::Bool => "bool",
			VarType::Int => "int",
			VarType::Float => "float",
			VarType::List => "list",
			VarType::Map => "map",
		}
	}
}

impl fmt::Display for VarType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A `[variable.<name>]` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableDefinition {
	pub var_type: Option<String>,
	pub default: Option<RawValue>,
}

impl VariableDefinition {
	pub fn from_raw(name: &str, raw: &RawValue) -> Result<Self> {
		let map = match raw {
			RawValue::Null => return Ok(Self::default()),
			RawValue::Map(map) => map,
			_ => {
				return Err(JaffleError::TypeMismatch {
					key: format!("variable.{name}"),
					expected: "a table",
				});
			}
		};

		let var_type = match map.get("type") {
			None | Some(RawValue::Null) => None,
			Some(RawValue::String(s)) => Some(s.clone()),
			Some(other) => {
				return Err(JaffleError::InvalidVariableType {
					name: name.to_string(),
					type_name: format!("{other:?}"),
				});
			}
		};

		Ok(VariableDefinition {
			var_type,
			default: map.get("default").cloned(),
		})
	}

	/// Explicit type, else the default's type, else `string`.
	pub fn effective_type(&self, name: &str) -> Result<VarType> {
		if let Some(type_name) = &self.var_type {
			return VarType::parse(type_name).ok_or_else(|| JaffleError::InvalidVariableType {
				name: name.to_string(),
				type_name: type_name.clone(),
			});
		}
		match &self.default {
			None => Ok(VarType::String),
			Some(default) => VarType::infer(default).ok_or_else(|| JaffleError::InvalidDefault {
				name: name.to_string(),
				value: format!("{default:?}"),
			}),
		}
	}
}

/// Parse every block of a `variable` section.
pub fn definitions(section: &RawValue) -> Result<IndexMap<String, VariableDefinition>> {
	let mut defs = IndexMap::new();
	if let Some(map) = section.as_map() {
		for (name, raw) in map {
			defs.insert(name.clone(), VariableDefinition::from_raw(name, raw)?);
		}
	}
	Ok(defs)
}

/// Parse a `variable` section, rendering each `type` against `namespace`.
///
/// String defaults stay unrendered so that [`resolve`] renders them exactly
/// once; list and map defaults are rendered here since `resolve` only
/// encodes them.
pub fn render_definitions(section: &RawValue, namespace: &Namespace) -> Result<IndexMap<String, VariableDefinition>> {
	let mut defs = definitions(section)?;
	for def in defs.values_mut() {
		if let Some(type_name) = &def.var_type {
			def.var_type = Some(TemplateString::new(type_name.as_str(), namespace.clone()).render()?);
		}
		if let Some(default @ (RawValue::List(_) | RawValue::Map(_))) = &def.default {
			def.default = Some(ConfigValue::create(default, namespace).raw(true)?);
		}
	}
	Ok(defs)
}

/// The value a variable resolution starts from.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
	Text(&'a str),
	Value(&'a RawValue),
	Absent,
}

/// Encode `input` as the literal text of a variable of type `var_type`.
pub fn to_literal(name: &str, var_type: VarType, input: Input<'_>) -> Result<String> {
	let conversion = |value: &str, reason: String| JaffleError::Conversion {
		name: name.to_string(),
		value: value.to_string(),
		target: var_type.to_string(),
		reason,
	};

	match input {
		Input::Text(text) => match var_type {
			VarType::String => Ok(text.to_string()),
			VarType::Bool => match text {
				"true" | "1" => Ok("true".to_string()),
				"false" | "0" => Ok("false".to_string()),
				_ => Err(conversion(text, format!("{text:?} is not bool value"))),
			},
			VarType::Int => text
				.trim()
				.parse::<i64>()
				.map(|i| i.to_string())
				.map_err(|e| conversion(text, e.to_string())),
			VarType::Float => text
				.trim()
				.parse::<f64>()
				.map(|f| format!("{f:?}"))
				.map_err(|e| conversion(text, e.to_string())),
			VarType::List | VarType::Map => {
				let parsed: serde_json::Value =
					serde_json::from_str(text).map_err(|e| conversion(text, e.to_string()))?;
				let shape_ok = match var_type {
					VarType::List => parsed.is_array(),
					_ => parsed.is_object(),
				};
				if !shape_ok {
					return Err(conversion(text, format!("{text:?} is not {var_type}")));
				}
				let inner = serde_json::to_string(&parsed).map_err(|e| conversion(text, e.to_string()))?;
				serde_json::to_string(&inner).map_err(|e| conversion(text, e.to_string()))
			}
		},
		Input::Absent | Input::Value(RawValue::Null) => Ok(NULL_LITERAL.to_string()),
		Input::Value(RawValue::String(text)) => to_literal(name, var_type, Input::Text(text)),
		Input::Value(RawValue::Bool(b)) => Ok(b.to_string()),
		Input::Value(value) => {
			serde_json::to_string(value).map_err(|e| conversion(&format!("{value:?}"), e.to_string()))
		}
	}
}

/// Resolved variables exposed to templates as `var`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariablesNamespace {
	values: BTreeMap<String, String>,
	keep_undefined: bool,
}

impl VariablesNamespace {
	/// A namespace in which every variable renders back to `${var.<name>}`.
	pub fn placeholder() -> Self {
		VariablesNamespace {
			values: BTreeMap::new(),
			keep_undefined: true,
		}
	}

	pub fn from_values(values: BTreeMap<String, String>, keep_undefined: bool) -> Self {
		VariablesNamespace {
			values,
			keep_undefined,
		}
	}

	/// Value of `var.<name>`.
	pub fn get(&self, name: &str) -> Result<String> {
		match self.values.get(name) {
			Some(value) => Ok(value.clone()),
			None if self.keep_undefined => Ok(format!("${{var.{name}}}")),
			None => Err(JaffleError::NotFound {
				key: format!("var.{name}"),
			}),
		}
	}

	/// Value of `var(<name>, <default>)`; never fails.
	pub fn call(&self, name: &str, default: Option<Value>) -> Value {
		match self.values.get(name) {
			Some(value) => Value::Str(value.clone()),
			None => default.unwrap_or(Value::Null),
		}
	}

	pub fn values(&self) -> &BTreeMap<String, String> {
		&self.values
	}

	pub fn keeps_undefined(&self) -> bool {
		self.keep_undefined
	}
}

/// Resolve every definition against `overrides`.
///
/// String defaults are rendered as templates against `base` extended with
/// the variables resolved so far, so a default may refer to any other
/// variable regardless of declaration order. References that can never be
/// satisfied, including cycles, fail with `NotFound`.
pub fn resolve(
	defs: &IndexMap<String, VariableDefinition>,
	overrides: &BTreeMap<String, String>,
	keep_undefined: bool,
	base: &Namespace,
) -> Result<VariablesNamespace> {
	let mut resolved = BTreeMap::new();
	let mut pending: Vec<&String> = defs.keys().collect();

	while !pending.is_empty() {
		let namespace = base.with_variables(VariablesNamespace::from_values(resolved.clone(), false));
		let mut deferred = Vec::new();
		let mut last_error = None;

		for name in pending.iter().copied() {
			match resolve_one(name, &defs[name], overrides.get(name), &namespace) {
				Ok(value) => {
					resolved.insert(name.clone(), value);
				}
				Err(err) if err.missing_variable().is_some_and(|missing| defs.contains_key(missing)) => {
					deferred.push(name);
					last_error = Some(err);
				}
				Err(err) => return Err(err),
			}
		}

		if deferred.len() == pending.len()
			&& let Some(err) = last_error
		{
			return Err(err);
		}
		pending = deferred;
	}

	Ok(VariablesNamespace::from_values(resolved, keep_undefined))
}

fn resolve_one(
	name: &str,
	def: &VariableDefinition,
	override_value: Option<&String>,
	namespace: &Namespace,
) -> Result<String> {
	let var_type = def.effective_type(name)?;
	match (override_value, &def.default) {
		(Some(text), _) => to_literal(name, var_type, Input::Text(text)),
		(None, Some(RawValue::String(text))) => {
			let rendered = TemplateString::new(text.as_str(), namespace.clone()).render()?;
			to_literal(name, var_type, Input::Text(&rendered))
		}
		(None, Some(default)) => to_literal(name, var_type, Input::Value(default)),
		(None, None) => to_literal(name, var_type, Input::Absent),
	}
}

/// Collect runtime overrides from `J_VAR_`-prefixed environment entries,
/// then from `name=value` assignments, later entries winning.
pub fn runtime_variables(
	env: impl IntoIterator<Item = (String, String)>,
	assignments: &[String],
) -> Result<BTreeMap<String, String>> {
	let mut vars: BTreeMap<String, String> = env
		.into_iter()
		.filter_map(|(key, value)| {
			let name = key.strip_prefix(VAR_PREFIX)?;
			name.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
				.then(|| (name.to_string(), value))
		})
		.collect();

	for assignment in assignments {
		let (name, value) = assignment
			.split_once('=')
			.ok_or_else(|| JaffleError::InvalidAssignment {
				assignment: assignment.clone(),
			})?;
		vars.insert(name.to_string(), value.to_string());
	}

	Ok(vars)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::template::FunctionRegistry;

	fn def(var_type: Option<&str>, default: Option<RawValue>) -> VariableDefinition {
		VariableDefinition {
			var_type: var_type.map(str::to_string),
			default,
		}
	}

	fn string(s: &str) -> RawValue {
		RawValue::String(s.to_string())
	}

	fn base() -> Namespace {
		Namespace::new(BTreeMap::new(), VariablesNamespace::default(), FunctionRegistry::builtin())
	}

	fn overrides(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
		entries
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	fn resolve_single(definition: VariableDefinition, value: Option<&str>) -> Result<String> {
		let mut defs = IndexMap::new();
		defs.insert("x".to_string(), definition);
		let overrides = value.map(|v| overrides(&[("x", v)])).unwrap_or_default();
		let vars = resolve(&defs, &overrides, false, &base())?;
		vars.get("x")
	}

	#[test]
	fn test_effective_type() {
		assert_eq!(def(Some("dict"), None).effective_type("x").unwrap(), VarType::Map);
		assert_eq!(def(Some("str"), Some(RawValue::Int(1))).effective_type("x").unwrap(), VarType::String);
		assert_eq!(def(None, Some(RawValue::Float(1.5))).effective_type("x").unwrap(), VarType::Float);
		assert_eq!(def(None, None).effective_type("x").unwrap(), VarType::String);

		match def(Some("complex"), None).effective_type("x").unwrap_err() {
			JaffleError::InvalidVariableType { name, type_name } => {
				assert_eq!(name, "x");
				assert_eq!(type_name, "complex");
			}
			other => panic!("Expected InvalidVariableType error, got {other:?}"),
		}
		assert!(matches!(
			def(None, Some(RawValue::Null)).effective_type("x").unwrap_err(),
			JaffleError::InvalidDefault { .. }
		));
	}

	#[test]
	fn test_bool_literals() {
		for (input, expected) in [("true", "true"), ("1", "true"), ("false", "false"), ("0", "false")] {
			assert_eq!(resolve_single(def(Some("bool"), None), Some(input)).unwrap(), expected);
		}
		assert_eq!(resolve_single(def(None, Some(RawValue::Bool(true))), None).unwrap(), "true");

		match resolve_single(def(Some("bool"), None), Some("yes")).unwrap_err() {
			JaffleError::Conversion { name, value, target, .. } => {
				assert_eq!(name, "x");
				assert_eq!(value, "yes");
				assert_eq!(target, "bool");
			}
			other => panic!("Expected Conversion error, got {other:?}"),
		}
	}

	#[test]
	fn test_numeric_literals() {
		assert_eq!(resolve_single(def(Some("int"), None), Some("42")).unwrap(), "42");
		assert_eq!(resolve_single(def(Some("float"), None), Some("1")).unwrap(), "1.0");
		assert_eq!(resolve_single(def(Some("float"), None), Some("2.5")).unwrap(), "2.5");
		assert_eq!(resolve_single(def(None, Some(RawValue::Int(8000))), None).unwrap(), "8000");
		assert_eq!(resolve_single(def(None, Some(RawValue::Int(8000))), Some("9000")).unwrap(), "9000");

		match resolve_single(def(Some("int"), None), Some("1.5")).unwrap_err() {
			JaffleError::Conversion { target, .. } => assert_eq!(target, "int"),
			other => panic!("Expected Conversion error, got {other:?}"),
		}
		match resolve_single(def(None, Some(RawValue::Float(0.5))), Some("abc")).unwrap_err() {
			JaffleError::Conversion { target, .. } => assert_eq!(target, "float"),
			other => panic!("Expected Conversion error, got {other:?}"),
		}
	}

	#[test]
	fn test_collection_literals_are_double_encoded() {
		assert_eq!(
			resolve_single(def(Some("list"), None), Some("[1, 2]")).unwrap(),
			r#""[1,2]""#
		);
		assert_eq!(
			resolve_single(def(Some("map"), None), Some(r#"{"a": 1}"#)).unwrap(),
			r#""{\"a\":1}""#
		);
		assert!(matches!(
			resolve_single(def(Some("list"), None), Some(r#"{"a": 1}"#)).unwrap_err(),
			JaffleError::Conversion { .. }
		));
		assert!(matches!(
			resolve_single(def(Some("map"), None), Some("not json")).unwrap_err(),
			JaffleError::Conversion { .. }
		));
	}

	#[test]
	fn test_non_string_defaults_are_json() {
		let list = RawValue::List(vec![RawValue::Int(1), string("a")]);
		assert_eq!(resolve_single(def(None, Some(list)), None).unwrap(), r#"[1,"a"]"#);
	}

	#[test]
	fn test_absent_value_is_null() {
		assert_eq!(resolve_single(def(None, None), None).unwrap(), "null");
		assert_eq!(resolve_single(def(Some("int"), None), None).unwrap(), "null");
	}

	#[test]
	fn test_string_passthrough() {
		assert_eq!(resolve_single(def(None, Some(string("dflt"))), None).unwrap(), "dflt");
		assert_eq!(resolve_single(def(None, Some(string("dflt"))), Some("given")).unwrap(), "given");
	}

	#[test]
	fn test_resolve_out_of_order_references() {
		let mut defs = IndexMap::new();
		defs.insert("url".to_string(), def(None, Some(string("http://${var.host}:${var.port}"))));
		defs.insert("host".to_string(), def(None, Some(string("localhost"))));
		defs.insert("port".to_string(), def(None, Some(RawValue::Int(8000))));

		let vars = resolve(&defs, &overrides(&[("port", "9000")]), false, &base()).unwrap();
		assert_eq!(vars.get("url").unwrap(), "http://localhost:9000");
	}

	#[test]
	fn test_resolve_cycle_is_not_found() {
		let mut defs = IndexMap::new();
		defs.insert("a".to_string(), def(None, Some(string("${var.b}"))));
		defs.insert("b".to_string(), def(None, Some(string("${var.a}"))));

		let err = resolve(&defs, &BTreeMap::new(), false, &base()).unwrap_err();
		assert!(matches!(err, JaffleError::NotFound { .. }));
	}

	#[test]
	fn test_resolve_undefined_reference_is_not_found() {
		let mut defs = IndexMap::new();
		defs.insert("a".to_string(), def(None, Some(string("${var.missing}"))));

		match resolve(&defs, &BTreeMap::new(), false, &base()).unwrap_err() {
			JaffleError::NotFound { key } => assert_eq!(key, "var.missing"),
			other => panic!("Expected NotFound error, got {other:?}"),
		}
	}

	#[test]
	fn test_namespace_accessors() {
		let strict = VariablesNamespace::from_values(overrides(&[("a", "1")]), false);
		assert_eq!(strict.get("a").unwrap(), "1");
		assert!(strict.get("b").is_err());
		assert_eq!(strict.call("a", None), Value::from("1"));
		assert_eq!(strict.call("b", Some(Value::from("d"))), Value::from("d"));
		assert_eq!(strict.call("b", None), Value::Null);

		let placeholder = VariablesNamespace::placeholder();
		assert_eq!(placeholder.get("b").unwrap(), "${var.b}");
	}

	#[test]
	fn test_definitions_from_section() {
		let section: toml::Table = toml::from_str(
			r#"
[port]
type = "int"
default = 8000

[name]
"#,
		)
		.unwrap();
		let defs = definitions(&RawValue::from(toml::Value::Table(section))).unwrap();

		assert_eq!(defs.len(), 2);
		assert_eq!(defs["port"].var_type.as_deref(), Some("int"));
		assert_eq!(defs["port"].default, Some(RawValue::Int(8000)));
		assert_eq!(defs["name"], VariableDefinition::default());
	}

	#[test]
	fn test_runtime_variables() {
		let env = vec![
			("J_VAR_port".to_string(), "8000".to_string()),
			("J_VAR_host".to_string(), "env-host".to_string()),
			("J_VAR_".to_string(), "ignored".to_string()),
			("HOME".to_string(), "/home/me".to_string()),
		];
		let vars = runtime_variables(env, &["host=cli-host".to_string(), "eq=a=b".to_string()]).unwrap();

		assert_eq!(vars.len(), 3);
		assert_eq!(vars["port"], "8000");
		assert_eq!(vars["host"], "cli-host");
		assert_eq!(vars["eq"], "a=b");
	}

	#[test]
	fn test_runtime_variables_rejects_bad_assignment() {
		match runtime_variables(Vec::new(), &["novalue".to_string()]).unwrap_err() {
			JaffleError::InvalidAssignment { assignment } => assert_eq!(assignment, "novalue"),
			other => panic!("Expected InvalidAssignment error, got {other:?}"),
		}
	}
}
