use crate::config::merge::deep_merge;
use crate::config::parser::{SECTIONS, parse_config_file};
use crate::config::value::{ConfigValue, RawValue};
use crate::error::{JaffleError, Result};
use crate::logfilter::LogFilters;
use crate::template::{FunctionRegistry, Namespace};
use crate::variables::{self, VariablesNamespace};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file used when none is given on the command line.
pub const CONFIG_FILE_NAME: &str = "jaffle.toml";

/// User-level defaults, looked up in the home directory.
pub const USER_CONFIG_FILE_NAME: &str = ".jaffle.toml";

/// Environment variable that, if truthy, skips the user-level defaults.
pub const NO_USER_CONFIG_ENV: &str = "JAFFLE_NO_USER_CONFIG";

/// A parsed config file with its source path for debugging/display.
#[derive(Debug, Clone)]
pub struct LoadedSource {
	pub path: PathBuf,
	pub raw: RawValue,
}

/// Get the path to the user's config file.
pub fn user_config_path() -> Option<PathBuf> {
	dirs::home_dir().map(|home| home.join(USER_CONFIG_FILE_NAME))
}

/// Check if an environment variable is set to a truthy value.
pub fn is_env_truthy(var_name: &str) -> bool {
	match std::env::var(var_name) {
		Ok(value) => {
			let lower = value.to_lowercase();
			!value.is_empty() && lower != "0" && lower != "false" && lower != "no"
		}
		Err(_) => false,
	}
}

/// Parse the user-level defaults (unless disabled) followed by `paths`.
pub fn discover_sources(paths: &[PathBuf]) -> Result<Vec<LoadedSource>> {
	let user_config = if is_env_truthy(NO_USER_CONFIG_ENV) {
		None
	} else {
		user_config_path().filter(|path| path.exists())
	};
	collect_sources(paths, user_config.as_deref())
}

/// Parse `user_config` (if any) and then every path in `paths`, in order.
///
/// A missing path is an error; a missing user config is simply skipped by
/// passing `None`.
pub fn collect_sources(paths: &[PathBuf], user_config: Option<&Path>) -> Result<Vec<LoadedSource>> {
	let mut sources = Vec::with_capacity(paths.len() + 1);

	if let Some(path) = user_config {
		debug!(path = %path.display(), "loading user config");
		sources.push(LoadedSource {
			path: path.to_path_buf(),
			raw: parse_config_file(path)?,
		});
	}

	for path in paths {
		if !path.exists() {
			return Err(JaffleError::ConfigNotFound { path: path.clone() });
		}
		debug!(path = %path.display(), "loading config");
		sources.push(LoadedSource {
			path: path.clone(),
			raw: parse_config_file(path)?,
		});
	}

	Ok(sources)
}

/// Load, merge and resolve the config files at `paths`.
///
/// `overrides` are the runtime variable values. Raw template names come
/// from the process environment.
pub fn load_config(
	paths: &[PathBuf],
	overrides: &BTreeMap<String, String>,
	functions: FunctionRegistry,
) -> Result<JaffleConfig> {
	let sources = discover_sources(paths)?;
	let raw = crate::template::namespace::raw_env(std::env::vars());
	JaffleConfig::from_sources(sources, raw, overrides, functions)
}

/// The merged, variable-resolved configuration.
#[derive(Debug, Clone)]
pub struct JaffleConfig {
	root: ConfigValue,
	namespace: Namespace,
	filters: LogFilters,
	sources: Vec<PathBuf>,
}

impl JaffleConfig {
	pub fn from_sources(
		sources: Vec<LoadedSource>,
		raw: BTreeMap<String, String>,
		overrides: &BTreeMap<String, String>,
		functions: FunctionRegistry,
	) -> Result<Self> {
		let merged = deep_merge(sources.iter().map(|source| &source.raw));
		let mut config = Self::create(merged, raw, overrides, functions)?;
		config.sources = sources.into_iter().map(|source| source.path).collect();
		Ok(config)
	}

	/// Build from an already merged tree.
	///
	/// Variables are resolved in two phases: first the `type` of every
	/// variable is rendered with undefined variables kept as `${var.<name>}`,
	/// then every variable is resolved against the others, rendering each
	/// string default once, and the strict namespace is built for the rest of
	/// the tree.
	pub fn create(
		mut merged: RawValue,
		raw: BTreeMap<String, String>,
		overrides: &BTreeMap<String, String>,
		functions: FunctionRegistry,
	) -> Result<Self> {
		if let RawValue::Map(map) = &mut merged {
			for section in SECTIONS {
				map.entry(section.to_string()).or_insert_with(RawValue::empty_map);
			}
		}

		let placeholder = Namespace::new(raw, VariablesNamespace::placeholder(), functions);
		let variable_section = merged.get("variable").cloned().unwrap_or_default();
		let definitions = variables::render_definitions(&variable_section, &placeholder)?;

		let base = placeholder.with_variables(VariablesNamespace::default());
		let resolved = variables::resolve(&definitions, overrides, false, &base)?;
		debug!(count = resolved.values().len(), "resolved variables");
		let namespace = base.with_variables(resolved);

		let root = ConfigValue::create(&merged, &namespace);
		let filters = LogFilters::compile(&root)?;

		Ok(JaffleConfig {
			root,
			namespace,
			filters,
			sources: Vec::new(),
		})
	}

	pub fn root(&self) -> &ConfigValue {
		&self.root
	}

	pub fn namespace(&self) -> &Namespace {
		&self.namespace
	}

	pub fn variables(&self) -> &VariablesNamespace {
		self.namespace.variables()
	}

	pub fn filters(&self) -> &LogFilters {
		&self.filters
	}

	/// Files the config was merged from, in merge order.
	pub fn sources(&self) -> &[PathBuf] {
		&self.sources
	}

	/// A top-level section; every known section is present, possibly empty.
	pub fn section(&self, name: &str) -> Result<&ConfigValue> {
		self.root.get(name)
	}

	pub fn variable(&self) -> Result<&ConfigValue> {
		self.section("variable")
	}

	pub fn kernel(&self) -> Result<&ConfigValue> {
		self.section("kernel")
	}

	pub fn app(&self) -> Result<&ConfigValue> {
		self.section("app")
	}

	pub fn process(&self) -> Result<&ConfigValue> {
		self.section("process")
	}

	pub fn job(&self) -> Result<&ConfigValue> {
		self.section("job")
	}

	pub fn logger(&self) -> Result<&ConfigValue> {
		self.section("logger")
	}

	/// The whole tree, rendered when `render` is set.
	pub fn raw(&self, render: bool) -> Result<RawValue> {
		self.root.raw(render)
	}
}
