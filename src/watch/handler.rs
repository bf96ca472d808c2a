use super::dispatcher::DispatchPolicy;
use super::event::FsEvent;
use super::glob::CompiledGlob;
use crate::config::ConfigValue;
use crate::error::{JaffleError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One action of a watch rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRef {
	/// Index into the rule's code blocks and the code itself.
	Code(usize, String),
	/// Name of a `[job.<name>]` entry.
	Job(String),
}

impl fmt::Display for ActionRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActionRef::Code(index, _) => write!(f, "code_blocks[{index}]"),
			ActionRef::Job(name) => write!(f, "job.{name}"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
	Literal(String),
	/// Zero-based wildcard index; group `N + 1` of the match.
	Wildcard(usize),
}

/// Parse `{}`, `{N}`, `{{` and `}}` in a target template.
fn parse_target(template: &str) -> std::result::Result<Vec<Piece>, String> {
	let mut pieces = Vec::new();
	let mut literal = String::new();
	let mut next_auto = 0;
	let mut numbering = None;
	let mut chars = template.chars();

	while let Some(c) = chars.next() {
		match c {
			'{' => {
				let mut field = String::new();
				loop {
					match chars.next() {
						Some('{') if field.is_empty() => {
							literal.push('{');
							break;
						}
						Some('}') => {
							let auto = field.is_empty();
							if *numbering.get_or_insert(auto) != auto {
								return Err("cannot mix {} and {N} fields".to_string());
							}
							let index = if auto {
								next_auto += 1;
								next_auto - 1
							} else {
								field.trim().parse().map_err(|_| format!("invalid field {{{field}}}"))?
							};
							pieces.push(Piece::Literal(std::mem::take(&mut literal)));
							pieces.push(Piece::Wildcard(index));
							break;
						}
						Some(ch) => field.push(ch),
						None => return Err("unterminated '{'".to_string()),
					}
				}
			}
			'}' => {
				if chars.next() != Some('}') {
					return Err("single '}' must be written as '}}'".to_string());
				}
				literal.push('}');
			}
			c => literal.push(c),
		}
	}

	pieces.push(Piece::Literal(literal));
	pieces.retain(|piece| !matches!(piece, Piece::Literal(text) if text.is_empty()));
	Ok(pieces)
}

/// Maps a changed file to the target its jobs receive as last argument.
#[derive(Debug, Clone)]
pub struct TargetRule {
	glob: CompiledGlob,
	/// `None` targets the changed file itself.
	template: Option<Vec<Piece>>,
}

impl TargetRule {
	/// A rule whose template may only reference wildcards `glob` has.
	pub fn new(glob: CompiledGlob, template: Option<&str>) -> Result<Self> {
		let template = match template {
			None => None,
			Some(text) => {
				let invalid = |message: String| JaffleError::InvalidTarget {
					pattern: glob.pattern().to_string(),
					target: text.to_string(),
					message,
				};
				let pieces = parse_target(text).map_err(invalid)?;
				let arity = glob.capture_arity();
				for piece in &pieces {
					if let Piece::Wildcard(index) = piece
						&& *index >= arity
					{
						return Err(invalid(format!("field {index} but the glob has {arity} wildcards")));
					}
				}
				Some(pieces)
			}
		};
		Ok(TargetRule { glob, template })
	}

	pub fn pattern(&self) -> &str {
		self.glob.pattern()
	}

	/// Target for `src_path`, or `None` when the glob does not match.
	pub fn target(&self, src_path: &str) -> Option<String> {
		let groups = self.glob.captures(src_path)?;
		let Some(pieces) = &self.template else {
			return Some(src_path.to_string());
		};

		let mut target = String::new();
		for piece in pieces {
			match piece {
				Piece::Literal(text) => target.push_str(text),
				Piece::Wildcard(index) => target.push_str(groups.group(index + 1).unwrap_or("")),
			}
		}
		Some(target.replace("//", "/"))
	}
}

/// Targets of `src_path` that exist under `base_dir`, in rule order without repeats.
pub fn resolve_targets(rules: &[TargetRule], src_path: &str, base_dir: &Path) -> Vec<String> {
	let mut found: Vec<String> = Vec::new();
	for rule in rules {
		let Some(target) = rule.target(src_path) else {
			continue;
		};
		if !base_dir.join(&target).exists() {
			debug!(glob = %rule.pattern(), path = %src_path, target = %target, "target does not exist");
			continue;
		}
		if !found.contains(&target) {
			found.push(target);
		}
	}
	found
}

/// A watch rule from an app's `options.handlers` list.
#[derive(Debug, Clone)]
pub struct HandlerSpec {
	pub name: String,
	pub watch_path: PathBuf,
	pub patterns: Vec<CompiledGlob>,
	pub ignore_patterns: Vec<CompiledGlob>,
	pub ignore_directories: bool,
	pub case_sensitive: bool,
	pub code_blocks: Vec<String>,
	pub jobs: Vec<String>,
	pub clear_cache: Vec<String>,
	/// From `auto_test` and `auto_test_map`; empty runs actions without a target.
	pub targets: Vec<TargetRule>,
	pub policy: DispatchPolicy,
}

impl HandlerSpec {
	pub fn from_config(name: impl Into<String>, value: &ConfigValue) -> Result<Self> {
		let case_sensitive = value.bool_at("case_sensitive", false)?;
		let compile = |key: &str| -> Result<Vec<CompiledGlob>> {
			value
				.strings_at(key)?
				.iter()
				.map(|pattern| CompiledGlob::new(pattern, case_sensitive))
				.collect()
		};

		let mut targets = compile("auto_test")?
			.into_iter()
			.map(|glob| TargetRule::new(glob, None))
			.collect::<Result<Vec<_>>>()?;
		match value.lookup("auto_test_map") {
			None | Some(ConfigValue::Null) => {}
			Some(ConfigValue::Map(map)) => {
				for (pattern, target) in map {
					let target = target.render_string()?;
					targets.push(TargetRule::new(CompiledGlob::new(pattern, case_sensitive)?, Some(&target))?);
				}
			}
			Some(_) => {
				return Err(JaffleError::TypeMismatch {
					key: "auto_test_map".to_string(),
					expected: "a table",
				});
			}
		}

		Ok(HandlerSpec {
			name: name.into(),
			watch_path: PathBuf::from(value.string_at("watch_path", ".")?),
			patterns: compile("patterns")?,
			ignore_patterns: compile("ignore_patterns")?,
			ignore_directories: value.bool_at("ignore_directories", false)?,
			case_sensitive,
			code_blocks: value.strings_at("code_blocks")?,
			jobs: value.strings_at("jobs")?,
			clear_cache: value.strings_at("clear_cache")?,
			targets,
			policy: DispatchPolicy::from_secs(value.f64_at("debounce", 0.0)?, value.f64_at("throttle", 0.0)?),
		})
	}

	/// Whether `event` should reach this rule's dispatcher.
	///
	/// Ignore patterns win over patterns; no patterns at all matches everything.
	pub fn matches(&self, event: &FsEvent) -> bool {
		if self.ignore_directories && event.is_directory {
			return false;
		}
		if self.ignore_patterns.iter().any(|glob| glob.is_match(&event.src_path)) {
			return false;
		}
		self.patterns.is_empty() || self.patterns.iter().any(|glob| glob.is_match(&event.src_path))
	}

	/// Code blocks in order, then jobs in order.
	pub fn actions(&self) -> Vec<ActionRef> {
		self.code_blocks
			.iter()
			.enumerate()
			.map(|(index, code)| ActionRef::Code(index, code.clone()))
			.chain(self.jobs.iter().cloned().map(ActionRef::Job))
			.collect()
	}
}
