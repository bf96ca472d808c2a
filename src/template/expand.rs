//! Backreference expansion for regex replacement templates.

use crate::error::{JaffleError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;

/// The groups of one regex match, detached from the haystack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchGroups {
	groups: Vec<Option<String>>,
	names: HashMap<String, usize>,
}

impl MatchGroups {
	pub fn new(regex: &Regex, captures: &Captures<'_>) -> Self {
		let groups = (0..captures.len())
			.map(|i| captures.get(i).map(|m| m.as_str().to_string()))
			.collect();
		let names = regex
			.capture_names()
			.enumerate()
			.filter_map(|(i, name)| name.map(|n| (n.to_string(), i)))
			.collect();
		MatchGroups { groups, names }
	}

	/// Groups from plain values; index 0 is the whole match.
	pub fn from_groups(groups: Vec<Option<String>>) -> Self {
		MatchGroups {
			groups,
			names: HashMap::new(),
		}
	}

	/// Text of group `index`. Unmatched groups are empty; missing groups are an error.
	pub fn group(&self, index: usize) -> Result<&str> {
		match self.groups.get(index) {
			Some(group) => Ok(group.as_deref().unwrap_or("")),
			None => Err(invalid(format!("group {index} does not exist"))),
		}
	}

	pub fn named(&self, name: &str) -> Result<&str> {
		match self.names.get(name) {
			Some(&index) => self.group(index),
			None => Err(invalid(format!("unknown group name {name:?}"))),
		}
	}

	/// Number of capture groups, not counting the whole match.
	pub fn arity(&self) -> usize {
		self.groups.len().saturating_sub(1)
	}
}

fn invalid(reference: impl Into<String>) -> JaffleError {
	JaffleError::InvalidBackreference {
		reference: reference.into(),
	}
}

/// Expand `\N`, `\g<N>`, `\g<name>`, `\\`, `\n` and `\t` in `text`.
///
/// Any other backslash sequence is copied through unchanged.
pub fn expand(text: &str, groups: &MatchGroups) -> Result<String> {
	let mut out = String::with_capacity(text.len());
	let mut chars = text.char_indices().peekable();

	while let Some((_, c)) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}

		match chars.peek().map(|&(_, next)| next) {
			Some('\\') => {
				chars.next();
				out.push('\\');
			}
			Some('n') => {
				chars.next();
				out.push('\n');
			}
			Some('t') => {
				chars.next();
				out.push('\t');
			}
			Some(d) if d.is_ascii_digit() => {
				let mut digits = String::new();
				while digits.len() < 2
					&& let Some(&(_, next)) = chars.peek()
					&& next.is_ascii_digit()
				{
					digits.push(next);
					chars.next();
				}
				let index: usize = digits.parse().map_err(|_| invalid(format!("\\{digits}")))?;
				out.push_str(groups.group(index)?);
			}
			Some('g') => {
				chars.next();
				if chars.peek().map(|&(_, next)| next) != Some('<') {
					return Err(invalid("missing '<' after \\g"));
				}
				chars.next();
				let mut name = String::new();
				loop {
					match chars.next() {
						Some((_, '>')) => break,
						Some((_, ch)) => name.push(ch),
						None => return Err(invalid("missing '>' in group reference")),
					}
				}
				if name.is_empty() {
					return Err(invalid("empty group reference"));
				}
				match name.parse::<usize>() {
					Ok(index) => out.push_str(groups.group(index)?),
					Err(_) => out.push_str(groups.named(&name)?),
				}
			}
			_ => out.push('\\'),
		}
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn groups_for(pattern: &str, haystack: &str) -> MatchGroups {
		let regex = Regex::new(pattern).unwrap();
		let captures = regex.captures(haystack).unwrap();
		MatchGroups::new(&regex, &captures)
	}

	#[test]
	fn test_numbered_references() {
		let groups = groups_for(r"^(\w+)-(\w+)$", "foo-bar");
		assert_eq!(expand(r"\2 \1", &groups).unwrap(), "bar foo");
		assert_eq!(expand(r"\g<1>0", &groups).unwrap(), "foo0");
		assert_eq!(expand(r"\0", &groups).unwrap(), "foo-bar");
		assert_eq!(groups.arity(), 2);
	}

	#[test]
	fn test_named_references() {
		let groups = groups_for(r"^(?P<word>\w+)!$", "hey!");
		assert_eq!(expand(r"<\g<word>>", &groups).unwrap(), "<hey>");
		assert!(expand(r"\g<nope>", &groups).is_err());
	}

	#[test]
	fn test_escapes() {
		let groups = MatchGroups::from_groups(vec![Some("x".to_string())]);
		assert_eq!(expand(r"a\\b", &groups).unwrap(), r"a\b");
		assert_eq!(expand(r"a\nb\tc", &groups).unwrap(), "a\nb\tc");
		assert_eq!(expand(r"keep \q", &groups).unwrap(), r"keep \q");
		assert_eq!(expand("trailing \\", &groups).unwrap(), "trailing \\");
	}

	#[test]
	fn test_unmatched_optional_group_is_empty() {
		let groups = groups_for(r"^a(b)?(c)$", "ac");
		assert_eq!(expand(r"[\1][\2]", &groups).unwrap(), "[][c]");
	}

	#[test]
	fn test_missing_group_is_error() {
		let groups = groups_for(r"^(a)$", "a");
		match expand(r"\2", &groups).unwrap_err() {
			JaffleError::InvalidBackreference { reference } => assert!(reference.contains("group 2")),
			other => panic!("Expected InvalidBackreference error, got {other:?}"),
		}
		assert!(expand(r"\g<5>", &groups).is_err());
		assert!(expand(r"\g<1", &groups).is_err());
	}
}
