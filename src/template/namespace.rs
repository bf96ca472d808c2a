use super::functions::FunctionRegistry;
use crate::variables::{VAR_PREFIX, VariablesNamespace};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

struct Inner {
	raw: BTreeMap<String, String>,
	variables: VariablesNamespace,
	functions: FunctionRegistry,
}

/// The names visible to a template: raw passthrough values, the `var`
/// accessor and the registered functions.
///
/// Cloning is cheap; the contents are never mutated. Use
/// [`Namespace::with_variables`] to derive a namespace with other variables.
#[derive(Clone)]
pub struct Namespace(Arc<Inner>);

impl Namespace {
	pub fn new(raw: BTreeMap<String, String>, variables: VariablesNamespace, functions: FunctionRegistry) -> Self {
		Namespace(Arc::new(Inner {
			raw,
			variables,
			functions,
		}))
	}

	/// A namespace with nothing in it.
	pub fn empty() -> Self {
		Self::new(BTreeMap::new(), VariablesNamespace::default(), FunctionRegistry::new())
	}

	/// A namespace whose raw values are the current process environment.
	///
	/// Only names made of ASCII letters, digits and `_` are kept, and
	/// runtime variable overrides (the `J_VAR_` entries) are left out.
	pub fn from_env(variables: VariablesNamespace, functions: FunctionRegistry) -> Self {
		Self::new(raw_env(std::env::vars()), variables, functions)
	}

	/// The same raw values and functions with a different variable set.
	pub fn with_variables(&self, variables: VariablesNamespace) -> Self {
		Self::new(self.0.raw.clone(), variables, self.0.functions.clone())
	}

	pub fn raw_value(&self, name: &str) -> Option<&str> {
		self.0.raw.get(name).map(String::as_str)
	}

	pub fn raw_values(&self) -> &BTreeMap<String, String> {
		&self.0.raw
	}

	pub fn variables(&self) -> &VariablesNamespace {
		&self.0.variables
	}

	pub fn functions(&self) -> &FunctionRegistry {
		&self.0.functions
	}
}

impl fmt::Debug for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Namespace")
			.field("raw", &self.0.raw.len())
			.field("variables", &self.0.variables)
			.field("functions", &self.0.functions)
			.finish()
	}
}

/// Filter environment entries down to the names templates may reference.
pub fn raw_env(vars: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, String> {
	vars.into_iter()
		.filter(|(name, _)| {
			!name.is_empty()
				&& name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
				&& !name.starts_with(VAR_PREFIX)
		})
		.collect()
}
