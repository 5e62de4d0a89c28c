//! CLI commands for plugin manifests.

use {
    chunkhook_config::ChunkhookConfig,
    chunkhook_plugins::{DiscoveredPlugin, FsPatchDiscoverer, PatchDiscoverer},
    clap::Subcommand,
};

#[derive(Subcommand)]
pub enum PluginsAction {
    /// List all discovered plugin manifests.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub async fn discover(config: &ChunkhookConfig) -> anyhow::Result<Vec<DiscoveredPlugin>> {
    let paths = FsPatchDiscoverer::default_paths(&config.plugins.search_paths);
    let discoverer = FsPatchDiscoverer::new(paths);
    discoverer.discover().await
}

pub async fn handle_plugins(
    action: &PluginsAction,
    config: &ChunkhookConfig,
) -> anyhow::Result<()> {
    let plugins = discover(config).await?;

    match action {
        PluginsAction::List { json } => {
            if *json {
                let entries: Vec<serde_json::Value> = plugins
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.manifest.name,
                            "description": p.manifest.description,
                            "patches": p.manifest.patches.len(),
                            "source": p.source,
                            "path": p.path,
                            "disabled": config.plugins.is_disabled(&p.manifest.name),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if plugins.is_empty() {
                println!("No plugin manifests found.");
                return Ok(());
            }
            for p in &plugins {
                let status = if config.plugins.is_disabled(&p.manifest.name) {
                    "disabled"
                } else {
                    "enabled"
                };
                println!(
                    "  {name} ({status}, {count} patches) [{source:?}]",
                    name = p.manifest.name,
                    count = p.manifest.patches.len(),
                    source = p.source,
                );
                if !p.manifest.description.is_empty() {
                    println!("    {}", p.manifest.description);
                }
                println!("    {}", p.path.display());
            }
        },
    }
    Ok(())
}
