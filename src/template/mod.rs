//! String templates with `${ expr }` interpolation.
//!
//! A [`TemplateString`] pairs raw text with the [`Namespace`] it renders
//! against. Rendering is deferred until a caller needs the text, and
//! [`TemplateString::render_match`] additionally expands regex
//! backreferences for use as a replacement.

pub mod expand;
pub mod functions;
pub mod namespace;
mod parser;
pub mod query;

pub use expand::MatchGroups;
pub use functions::{FunctionRegistry, TemplateFn, Value};
pub use namespace::Namespace;

use crate::error::{JaffleError, Result};
use parser::{Expr, Segment};
use std::fmt;

/// Identifier that resolves to the variables accessor.
const VAR_NAME: &str = "var";

/// Immutable template text bound to a namespace.
#[derive(Clone)]
pub struct TemplateString {
	text: String,
	namespace: Namespace,
}

impl TemplateString {
	pub fn new(text: impl Into<String>, namespace: Namespace) -> Self {
		TemplateString {
			text: text.into(),
			namespace,
		}
	}

	/// The unrendered text.
	pub fn as_str(&self) -> &str {
		&self.text
	}

	pub fn namespace(&self) -> &Namespace {
		&self.namespace
	}

	/// Render against the bound namespace.
	pub fn render(&self) -> Result<String> {
		self.render_with(None)
	}

	/// Render as a regex replacement, expanding backreferences such as `\1`
	/// in literal text and in every string argument passed to a function.
	pub fn render_match(&self, groups: &MatchGroups) -> Result<String> {
		self.render_with(Some(groups))
	}

	fn render_with(&self, groups: Option<&MatchGroups>) -> Result<String> {
		let segments = parser::parse(&self.text).map_err(|e| JaffleError::template(&self.text, e))?;
		let mut out = String::with_capacity(self.text.len());

		for segment in &segments {
			match segment {
				Segment::Literal(text) => match groups {
					Some(groups) => out.push_str(&self.expand(text, groups)?),
					None => out.push_str(text),
				},
				Segment::Expr(expr) => out.push_str(&self.eval(expr, groups)?.render()),
			}
		}

		Ok(out)
	}

	fn expand(&self, text: &str, groups: &MatchGroups) -> Result<String> {
		expand::expand(text, groups).map_err(|e| JaffleError::template(&self.text, e.to_string()))
	}

	fn eval(&self, expr: &Expr, groups: Option<&MatchGroups>) -> Result<Value> {
		match expr {
			Expr::Null => Ok(Value::Null),
			Expr::Bool(b) => Ok(Value::Bool(*b)),
			Expr::Int(i) => Ok(Value::Int(*i)),
			Expr::Float(f) => Ok(Value::Float(*f)),
			Expr::Str(s) => Ok(Value::Str(s.clone())),
			Expr::Ident(name) => self.lookup(name),
			Expr::Member(target, attr) => match target.as_ref() {
				Expr::Ident(name) if name == VAR_NAME => Ok(Value::Str(self.namespace.variables().get(attr)?)),
				_ => Err(JaffleError::template(&self.text, format!("cannot access attribute {attr:?}"))),
			},
			Expr::Call(callee, args) => {
				let Expr::Ident(name) = callee.as_ref() else {
					return Err(JaffleError::template(&self.text, "only named functions can be called"));
				};

				let mut values = Vec::with_capacity(args.len());
				for arg in args {
					let value = match (self.eval(arg, groups)?, groups) {
						(Value::Str(s), Some(groups)) => Value::Str(self.expand(&s, groups)?),
						(value, _) => value,
					};
					values.push(value);
				}

				if name == VAR_NAME {
					return self.call_var(&values);
				}

				let function = self
					.namespace
					.functions()
					.get(name)
					.ok_or_else(|| JaffleError::UndefinedName { name: name.clone() })?;
				function(&values).map_err(|e| JaffleError::TemplateFunction {
					template: self.text.clone(),
					function: name.clone(),
					source: Box::new(e),
				})
			}
		}
	}

	fn lookup(&self, name: &str) -> Result<Value> {
		if name == VAR_NAME || self.namespace.functions().contains(name) {
			return Err(JaffleError::template(&self.text, format!("{name} cannot be used as a value")));
		}
		match self.namespace.raw_value(name) {
			Some(value) => Ok(Value::Str(value.to_string())),
			None => Err(JaffleError::UndefinedName { name: name.to_string() }),
		}
	}

	fn call_var(&self, args: &[Value]) -> Result<Value> {
		match args {
			[Value::Str(name)] => Ok(self.namespace.variables().call(name, None)),
			[Value::Str(name), default] => Ok(self.namespace.variables().call(name, Some(default.clone()))),
			_ => Err(JaffleError::template(&self.text, "var() takes a name and an optional default")),
		}
	}
}

/// Templates compare by their text; the namespace is not part of equality.
impl PartialEq for TemplateString {
	fn eq(&self, other: &Self) -> bool {
		self.text == other.text
	}
}

impl fmt::Debug for TemplateString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("TemplateString").field(&self.text).finish()
	}
}

impl fmt::Display for TemplateString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.text)
	}
}
