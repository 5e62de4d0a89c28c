//! Registering discovered manifests with an engine.

use {
    chunkhook_common::PluginId,
    chunkhook_config::PluginsConfig,
    chunkhook_interceptor::{Host, Interceptor, PatchId},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{discovery::DiscoveredPlugin, settings::SettingsStore};

#[derive(Debug, Clone, Serialize)]
pub struct LoadedPlugin {
    pub plugin: PluginId,
    pub patches: Vec<PatchId>,
}

/// Register every enabled plugin's patches. Disabled plugins and manifests
/// that fail to convert are skipped.
pub fn register_plugins<H: Host>(
    engine: &Interceptor<H>,
    plugins: &[DiscoveredPlugin],
    config: &PluginsConfig,
    settings: &SettingsStore,
) -> Vec<LoadedPlugin> {
    let mut loaded = Vec::new();
    for found in plugins {
        let name = &found.manifest.name;
        if config.is_disabled(name) {
            info!(plugin = %name, "plugin disabled, not registering patches");
            continue;
        }
        let (plugin, descriptors) = match found
            .manifest
            .plugin_id()
            .and_then(|id| Ok((id, found.manifest.descriptors(&found.path, settings)?)))
        {
            Ok(built) => built,
            Err(e) => {
                warn!(plugin = %name, %e, "failed to build plugin patches");
                continue;
            },
        };
        let patches = engine.register_patches(plugin.clone(), descriptors);
        info!(plugin = %plugin, patches = patches.len(), "registered plugin");
        loaded.push(LoadedPlugin { plugin, patches });
    }
    loaded
}
