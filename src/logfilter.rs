//! Suppression and rewriting of log messages.
//!
//! Filters are compiled once from the `logger` tables of the config: the
//! top-level `[logger]` table gives the global filter and the `logger` table
//! of each app, process or job gives that scope's filter.

use crate::config::ConfigValue;
use crate::error::{JaffleError, Result};
use crate::template::{MatchGroups, Namespace, TemplateString};
use regex::Regex;
use std::collections::BTreeMap;

/// Compile a regex pattern string.
pub(crate) fn compile_regex(pattern: &str) -> Result<Regex> {
	Regex::new(pattern).map_err(|source| JaffleError::InvalidRegex {
		pattern: pattern.to_string(),
		source,
	})
}

/// A `{from, to}` replacement.
#[derive(Debug, Clone)]
pub struct ReplaceRule {
	pub pattern: Regex,
	pub replacement: TemplateString,
}

impl ReplaceRule {
	pub fn apply(&self, input: &str) -> Result<String> {
		replace_all(&self.pattern, &self.replacement, input)
	}
}

/// Replace every match of `pattern` in `input` with the rendered `replacement`.
pub fn replace_all(pattern: &Regex, replacement: &TemplateString, input: &str) -> Result<String> {
	let mut out = String::with_capacity(input.len());
	let mut last = 0;

	for captures in pattern.captures_iter(input) {
		let Some(whole) = captures.get(0) else {
			continue;
		};
		out.push_str(&input[last..whole.start()]);
		out.push_str(&replacement.render_match(&MatchGroups::new(pattern, &captures))?);
		last = whole.end();
	}
	out.push_str(&input[last..]);

	Ok(out)
}

/// Suppress and replace rules of one scope.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
	pub suppress: Vec<Regex>,
	pub replace: Vec<ReplaceRule>,
}

impl LogFilter {
	/// Compile a `logger` table (`suppress_regex`, `replace_regex`).
	pub fn compile(logger: &ConfigValue) -> Result<Self> {
		let suppress = logger
			.strings_at("suppress_regex")?
			.iter()
			.map(|pattern| compile_regex(pattern))
			.collect::<Result<Vec<_>>>()?;

		let mut replace = Vec::new();
		if let Some(rules) = logger.lookup("replace_regex") {
			let Some(rules) = rules.as_list() else {
				return Err(JaffleError::TypeMismatch {
					key: "replace_regex".to_string(),
					expected: "a list",
				});
			};
			for rule in rules {
				let from = rule.get("from")?.render_string()?;
				let to = rule.get("to")?;
				let replacement = match to.as_template() {
					Some(template) => template.clone(),
					None => TemplateString::new(to.render_string()?, Namespace::empty()),
				};
				replace.push(ReplaceRule {
					pattern: compile_regex(&from)?,
					replacement,
				});
			}
		}

		Ok(LogFilter { suppress, replace })
	}

	pub fn is_empty(&self) -> bool {
		self.suppress.is_empty() && self.replace.is_empty()
	}

	fn suppresses(&self, message: &str) -> bool {
		self.suppress.iter().any(|pattern| pattern.is_match(message))
	}

	fn rewrite(&self, message: String) -> Result<String> {
		self.replace
			.iter()
			.try_fold(message, |message, rule| rule.apply(&message))
	}
}

/// The global filter plus one filter per scope.
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
	pub global: LogFilter,
	pub scopes: BTreeMap<String, LogFilter>,
}

impl LogFilters {
	/// Compile the `[logger]` table and the `logger` table of every entry
	/// in the `app`, `process` and `job` sections of `root`.
	pub fn compile(root: &ConfigValue) -> Result<Self> {
		let global = match root.lookup("logger") {
			Some(logger) => LogFilter::compile(logger)?,
			None => LogFilter::default(),
		};

		let mut scopes: BTreeMap<String, LogFilter> = BTreeMap::new();
		for section in ["app", "process", "job"] {
			let Some(entries) = root.lookup(section) else {
				continue;
			};
			for (name, entry) in entries.entries() {
				let Some(logger) = entry.lookup("logger") else {
					continue;
				};
				let filter = LogFilter::compile(logger)?;
				let scope = scopes.entry(name.clone()).or_default();
				scope.suppress.extend(filter.suppress);
				scope.replace.extend(filter.replace);
			}
		}

		Ok(LogFilters { global, scopes })
	}

	/// Filter `message` logged in `scope`.
	///
	/// Returns `None` when any scope or global suppress pattern matches.
	/// Otherwise the scope's replace rules run, then the global ones, each
	/// feeding its output to the next.
	pub fn apply(&self, scope: &str, message: &str) -> Result<Option<String>> {
		let scoped = self.scopes.get(scope);

		if scoped.is_some_and(|filter| filter.suppresses(message)) || self.global.suppresses(message) {
			return Ok(None);
		}

		let mut message = message.to_string();
		if let Some(filter) = scoped {
			message = filter.rewrite(message)?;
		}
		Ok(Some(self.global.rewrite(message)?))
	}
}
