//! Configuration loading, validation, and env substitution.
//!
//! Config files: `chunkhook.toml`, `chunkhook.yaml`, or `chunkhook.json`
//! Searched in `./` then `~/.config/chunkhook/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{ChunkhookConfig, InterceptorConfig, PluginsConfig, SettingValue},
    validate::{Diagnostic, Severity, ValidationResult},
};
