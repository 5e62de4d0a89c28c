/// Config schema types (interceptor wiring, plugin discovery, plugin settings).
use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkhookConfig {
    pub interceptor: InterceptorConfig,
    pub plugins: PluginsConfig,
}

/// How the interceptor finds and talks to the host bundler.
///
/// The property names are specific to the host build and change whenever
/// the host switches bundler versions or chunk naming. They are read by the
/// host glue that traps those slots; the engine only names them in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Global variable holding the chunk queue (`self.webpackChunk<name>`).
    pub chunk_global: String,
    /// Runtime property holding the pre-populated factory map.
    pub factory_map_property: String,
    /// Runtime property holding the "all chunks loaded" callback.
    pub chunks_loaded_property: String,
    /// Substring that must appear in the assignment's stack trace for a
    /// runtime to count as the host's own.
    pub origin_marker: String,
    /// Substring expected in the genuine ensure-chunk source.
    pub ensure_chunk_signature: String,
    /// Pattern (may use `\i`) identifying the app-initialisation callback.
    pub init_callback_pattern: String,
    /// Expression substituted for `$self`; `{id}` becomes the JSON-quoted
    /// plugin name.
    pub self_reference: String,
    /// Prefix of the `//# sourceURL=` tag appended to patched modules.
    pub source_url_prefix: String,
    /// Emit before/after context and word diffs for failed patches.
    pub dev_mode: bool,
    /// Strip literal newlines from factory source before matching.
    pub normalize_newlines: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            chunk_global: "webpackChunkdiscord_app".into(),
            factory_map_property: "m".into(),
            chunks_loaded_property: "O".into(),
            origin_marker: "discord.com".into(),
            ensure_chunk_signature: "Promise.all".into(),
            init_callback_pattern: r#"\{return \i\(".+?"\)\}"#.into(),
            self_reference: "Chunkhook.plugins[{id}]".into(),
            source_url_prefix: "WebpackModule".into(),
            dev_mode: false,
            normalize_newlines: true,
        }
    }
}

/// Plugin discovery and per-plugin settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Extra directories scanned for `<plugin>/PATCHES.toml`.
    pub search_paths: Vec<PathBuf>,
    /// Plugins whose patches are never registered.
    pub disabled: Vec<String>,
    /// Settings consulted by manifest `when` predicates, keyed by plugin.
    pub settings: HashMap<String, HashMap<String, SettingValue>>,
}

impl PluginsConfig {
    pub fn is_disabled(&self, plugin: &str) -> bool {
        self.disabled.iter().any(|d| d == plugin)
    }
}

/// A single plugin setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    /// JS-style truthiness, which is what patch predicates test.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::Text(s) => !s.is_empty(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_discord_webpack() {
        let cfg = ChunkhookConfig::default();
        assert_eq!(cfg.interceptor.chunk_global, "webpackChunkdiscord_app");
        assert_eq!(cfg.interceptor.factory_map_property, "m");
        assert_eq!(cfg.interceptor.chunks_loaded_property, "O");
        assert!(cfg.interceptor.normalize_newlines);
        assert!(!cfg.interceptor.dev_mode);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: ChunkhookConfig = toml::from_str(
            r#"
[interceptor]
chunk_global = "webpackChunkmy_app"
dev_mode = true

[plugins]
disabled = ["noisy"]

[plugins.settings.pinDms]
sortByRecent = true
maxPinned = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.interceptor.chunk_global, "webpackChunkmy_app");
        assert_eq!(cfg.interceptor.origin_marker, "discord.com");
        assert!(cfg.interceptor.dev_mode);
        assert!(cfg.plugins.is_disabled("noisy"));
        let pin = &cfg.plugins.settings["pinDms"];
        assert_eq!(pin["sortByRecent"], SettingValue::Bool(true));
        assert_eq!(pin["maxPinned"], SettingValue::Integer(5));
    }

    #[test]
    fn truthiness_follows_js_rules() {
        assert!(!SettingValue::Integer(0).is_truthy());
        assert!(!SettingValue::Text(String::new()).is_truthy());
        assert!(!SettingValue::Float(f64::NAN).is_truthy());
        assert!(SettingValue::Text("off".into()).is_truthy());
    }
}
