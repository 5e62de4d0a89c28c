//! Plugin patch manifests: discovery, parsing, and registration.
//!
//! A plugin ships its patches as `PATCHES.toml` in its own directory under
//! one of the search paths. Manifests become [`PatchDescriptor`]s whose
//! `when` conditions read the plugin's settings at patch time.
//!
//! [`PatchDescriptor`]: chunkhook_interceptor::PatchDescriptor

pub mod discovery;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod settings;

pub use {
    discovery::{DiscoveredPlugin, FsPatchDiscoverer, ManifestSource, PatchDiscoverer},
    error::{Error, Result},
    loader::{LoadedPlugin, register_plugins},
    manifest::{Condition, MANIFEST_FILE, PatchManifest, PatchSpec, RuleSpec, parse_manifest},
    settings::SettingsStore,
};
