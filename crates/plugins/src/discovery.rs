//! Patch manifest discovery from filesystem directories.
//!
//! Each search path holds one directory per plugin, with the plugin's
//! patches in `<plugin>/PATCHES.toml`.

use std::path::PathBuf;

use {async_trait::async_trait, tracing::warn};

use crate::manifest::{MANIFEST_FILE, PatchManifest, parse_manifest};

/// Where a discovered manifest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSource {
    Project,
    User,
    Config,
}

#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PatchManifest,
    pub path: PathBuf,
    pub source: ManifestSource,
}

/// Finds plugin patch manifests.
#[async_trait]
pub trait PatchDiscoverer: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredPlugin>>;
}

/// Scans directories in priority order. A plugin name found twice keeps the
/// first manifest.
pub struct FsPatchDiscoverer {
    search_paths: Vec<(PathBuf, ManifestSource)>,
}

impl FsPatchDiscoverer {
    pub fn new(search_paths: Vec<(PathBuf, ManifestSource)>) -> Self {
        Self { search_paths }
    }

    /// `./.chunkhook/plugins`, the user config dir's `plugins/`, then the
    /// configured extra paths.
    pub fn default_paths(extra: &[PathBuf]) -> Vec<(PathBuf, ManifestSource)> {
        let mut paths = vec![(PathBuf::from(".chunkhook/plugins"), ManifestSource::Project)];
        if let Some(dir) = chunkhook_config::config_dir() {
            paths.push((dir.join("plugins"), ManifestSource::User));
        }
        paths.extend(extra.iter().map(|p| (p.clone(), ManifestSource::Config)));
        paths
    }
}

#[async_trait]
impl PatchDiscoverer for FsPatchDiscoverer {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredPlugin>> {
        let mut plugins: Vec<DiscoveredPlugin> = Vec::new();

        for (base_path, source) in &self.search_paths {
            let mut entries = match tokio::fs::read_dir(base_path).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            let mut dirs = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let dir = entry.path();
                if dir.is_dir() {
                    dirs.push(dir);
                }
            }
            // read_dir order is platform-dependent
            dirs.sort();

            for dir in dirs {
                let manifest_path = dir.join(MANIFEST_FILE);
                if !manifest_path.is_file() {
                    continue;
                }
                let content = match tokio::fs::read_to_string(&manifest_path).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(?manifest_path, %e, "failed to read patch manifest");
                        continue;
                    },
                };
                let manifest = match parse_manifest(&content, &manifest_path) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(%e, "skipping invalid patch manifest");
                        continue;
                    },
                };
                if let Some(existing) = plugins.iter().find(|p| p.manifest.name == manifest.name) {
                    warn!(
                        plugin = %manifest.name,
                        kept = ?existing.path,
                        ignored = ?manifest_path,
                        "duplicate plugin manifest"
                    );
                    continue;
                }
                plugins.push(DiscoveredPlugin {
                    manifest,
                    path: manifest_path,
                    source: *source,
                });
            }
        }

        Ok(plugins)
    }
}
