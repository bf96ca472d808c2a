//! Glob patterns translated to anchored regular expressions.

use crate::error::{JaffleError, Result};
use crate::template::MatchGroups;
use regex::{Regex, RegexBuilder};

/// Translate a glob into regex source.
///
/// - `**`, optionally followed by `/`, becomes `(.*?)` and may span directories.
/// - `*` becomes `([^/]*?)` and stays within one path component.
/// - `\*` is a literal star.
/// - Every other character matches itself.
///
/// The result is anchored at both ends.
pub fn glob_to_regex(pattern: &str) -> String {
	let chars: Vec<char> = pattern.chars().collect();
	let mut out = String::with_capacity(pattern.len() * 2 + 2);
	out.push('^');

	let mut i = 0;
	while i < chars.len() {
		match (chars[i], chars.get(i + 1)) {
			('\\', Some('*')) => {
				out.push_str(r"\*");
				i += 2;
			}
			('*', Some('*')) => {
				out.push_str("(.*?)");
				i += 2;
				if chars.get(i) == Some(&'/') {
					i += 1;
				}
			}
			('*', _) => {
				out.push_str("([^/]*?)");
				i += 1;
			}
			(c, _) => {
				let mut buf = [0u8; 4];
				out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
				i += 1;
			}
		}
	}

	out.push('$');
	out
}

/// A glob compiled once for repeated matching.
///
/// A pattern without `/` is matched against the last path component only,
/// so `*.py` matches Python files in any directory.
#[derive(Debug, Clone)]
pub struct CompiledGlob {
	pattern: String,
	regex: Regex,
	basename_only: bool,
}

impl CompiledGlob {
	pub fn new(pattern: &str, case_sensitive: bool) -> Result<Self> {
		let source = glob_to_regex(pattern);
		let regex = RegexBuilder::new(&source)
			.case_insensitive(!case_sensitive)
			.build()
			.map_err(|source| JaffleError::InvalidRegex {
				pattern: pattern.to_string(),
				source,
			})?;

		Ok(CompiledGlob {
			pattern: pattern.to_string(),
			regex,
			basename_only: !pattern.contains('/'),
		})
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	pub fn regex(&self) -> &Regex {
		&self.regex
	}

	/// Number of wildcard groups in the pattern.
	pub fn capture_arity(&self) -> usize {
		self.regex.captures_len() - 1
	}

	fn subject<'p>(&self, path: &'p str) -> &'p str {
		if self.basename_only {
			path.rsplit('/').next().unwrap_or(path)
		} else {
			path
		}
	}

	pub fn is_match(&self, path: &str) -> bool {
		self.regex.is_match(self.subject(path))
	}

	/// Wildcard captures of a matching path.
	pub fn captures(&self, path: &str) -> Option<MatchGroups> {
		self.regex
			.captures(self.subject(path))
			.map(|captures| MatchGroups::new(&self.regex, &captures))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn glob(pattern: &str) -> CompiledGlob {
		CompiledGlob::new(pattern, true).unwrap()
	}

	#[test]
	fn test_glob_to_regex() {
		assert_eq!(glob_to_regex("*.py"), r"^([^/]*?)\.py$");
		assert_eq!(glob_to_regex("**/*.py"), r"^(.*?)([^/]*?)\.py$");
		assert_eq!(glob_to_regex("src/**"), r"^src/(.*?)$");
		assert_eq!(glob_to_regex(r"a\*b"), r"^a\*b$");
		assert_eq!(glob_to_regex("a+b(c)"), r"^a\+b\(c\)$");
	}

	#[test]
	fn test_double_star_spans_directories() {
		let g = glob("**/*.py");
		assert!(g.is_match("a/b/c/test_foo.py"));
		assert!(g.is_match("test_foo.py"));
		assert!(!g.is_match("a/b/c/test_foo.txt"));
	}

	#[test]
	fn test_single_star_stays_in_component() {
		let g = glob("src/*.py");
		assert!(g.is_match("src/foo.py"));
		assert!(!g.is_match("src/sub/foo.py"));
		assert!(!g.is_match("lib/foo.py"));
	}

	#[test]
	fn test_pattern_without_slash_matches_basename() {
		let g = glob("*.py");
		assert!(g.is_match("foo.py"));
		assert!(g.is_match("deep/dir/foo.py"));
		assert!(!g.is_match("deep/dir/foo.pyc"));
	}

	#[test]
	fn test_escaped_star_is_literal() {
		let g = glob(r"note\*.md");
		assert!(g.is_match("note*.md"));
		assert!(!g.is_match("notes.md"));
	}

	#[test]
	fn test_case_sensitivity() {
		assert!(!glob("*.PY").is_match("foo.py"));
		assert!(CompiledGlob::new("*.PY", false).unwrap().is_match("foo.py"));
	}

	#[test]
	fn test_captures_and_arity() {
		let g = glob("src/**/test_*.py");
		assert_eq!(g.capture_arity(), 2);

		let groups = g.captures("src/pkg/sub/test_app.py").unwrap();
		assert_eq!(groups.group(1).unwrap(), "pkg/sub/");
		assert_eq!(groups.group(2).unwrap(), "app");
		assert!(g.captures("src/pkg/app.py").is_none());
	}
}
