//! Configuration loading and parsing for jaffle.
//!
//! This module handles:
//! - TOML config file parsing into raw trees
//! - Deep merging of the user defaults and the given files
//! - The lazily rendered config value model
//! - Two-phase variable resolution

pub mod loader;
pub mod merge;
pub mod parser;
pub mod value;

pub use loader::{
	CONFIG_FILE_NAME, JaffleConfig, LoadedSource, NO_USER_CONFIG_ENV, collect_sources, discover_sources,
	is_env_truthy, load_config, user_config_path,
};
pub use merge::{deep_merge, deep_merge_into};
pub use parser::{parse_config_file, parse_config_str};
pub use value::{ConfigValue, Key, RawValue};
