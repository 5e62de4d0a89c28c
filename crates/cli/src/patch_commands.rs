//! Offline patch previews over module source files.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, bail},
    chunkhook_common::{ModuleId, PluginId},
    chunkhook_config::ChunkhookConfig,
    chunkhook_interceptor::{
        FactoryMap, FindResult, FnFactory, InertHost, Interceptor, Module, PatchReport,
        PluginScope, RulePreview, diagnostics::render_diff, find_module, normalize_source,
        preview_rule,
    },
    chunkhook_plugins::{DiscoveredPlugin, SettingsStore, register_plugins},
    clap::Subcommand,
    serde::Serialize,
};

use crate::plugins_commands::discover;

#[derive(Subcommand)]
pub enum PatchAction {
    /// Run plugin patches over module sources and show what changes.
    Preview {
        /// Only run this plugin's patches.
        #[arg(long)]
        plugin: Option<String>,
        /// Module source files; the file stem is the module id.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Print the full patched source instead of per-rule diffs.
        #[arg(long)]
        full: bool,
    },
    /// Show which of the given modules a find string selects.
    Find {
        find: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

struct ModuleFile {
    id: ModuleId,
    path: PathBuf,
    source: String,
}

#[derive(Debug, Serialize)]
struct RuleReport {
    plugin: PluginId,
    find: String,
    rule: String,
    #[serde(flatten)]
    preview: RulePreview,
}

#[derive(Debug, Serialize)]
struct ModulePreview {
    module: ModuleId,
    path: PathBuf,
    patched_by: Vec<PluginId>,
    patched_source: Option<String>,
    rules: Vec<RuleReport>,
}

pub async fn handle_patch(action: &PatchAction, config: &ChunkhookConfig) -> anyhow::Result<()> {
    match action {
        PatchAction::Preview {
            plugin,
            files,
            json,
            full,
        } => {
            let mut plugins = discover(config).await?;
            if let Some(name) = plugin {
                plugins.retain(|p| &p.manifest.name == name);
                if plugins.is_empty() {
                    bail!("no plugin manifest named {name:?}");
                }
            }
            let modules = read_modules(files).await?;
            let (previews, report) = preview_modules(config, &plugins, &modules)?;
            if *json {
                let out = serde_json::json!({ "modules": previews, "report": report });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_previews(&previews, &report, *full);
            }
            Ok(())
        },
        PatchAction::Find { find, files } => {
            let modules = read_modules(files).await?;
            match find_module(&factory_map(&modules), find) {
                FindResult::Unique(id) => println!("{find:?} selects module {id}"),
                FindResult::NoMatch => println!("{find:?} matches no module"),
                FindResult::Multiple(ids) => {
                    let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                    println!("{find:?} is not unique: {}", ids.join(", "));
                },
            }
            Ok(())
        },
    }
}

async fn read_modules(files: &[PathBuf]) -> anyhow::Result<Vec<ModuleFile>> {
    let mut modules = Vec::with_capacity(files.len());
    for path in files {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        modules.push(ModuleFile {
            id: module_id(path)?,
            path: path.clone(),
            source,
        });
    }
    Ok(modules)
}

fn module_id(path: &Path) -> anyhow::Result<ModuleId> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(ModuleId::from)
        .with_context(|| format!("cannot derive a module id from {}", path.display()))
}

fn factory_map(modules: &[ModuleFile]) -> FactoryMap<InertHost> {
    modules
        .iter()
        .map(|m| {
            let factory = FnFactory::new(m.source.as_str(), |_: &mut Module<InertHost>, _| Ok(()));
            (m.id.clone(), factory)
        })
        .collect()
}

fn preview_modules(
    config: &ChunkhookConfig,
    plugins: &[DiscoveredPlugin],
    modules: &[ModuleFile],
) -> anyhow::Result<(Vec<ModulePreview>, PatchReport)> {
    let engine = Interceptor::new(InertHost::new(), &config.interceptor)?;
    let settings = SettingsStore::from_config(&config.plugins);
    let loaded = register_plugins(&engine, plugins, &config.plugins, &settings);

    let mut factories = factory_map(modules);
    engine.patch_factories(&mut factories);

    let host = InertHost::new();
    let mut previews = Vec::with_capacity(modules.len());
    for module in modules {
        let factory = factories
            .get(&module.id)
            .with_context(|| format!("module {} vanished from the factory map", module.id))?;
        let code = normalize_source(&module.source, true);

        let mut rules = Vec::new();
        for found in plugins {
            let Some(entry) = loaded
                .iter()
                .find(|l| l.plugin.as_str() == found.manifest.name)
            else {
                continue;
            };
            let scope = PluginScope::new(entry.plugin.clone(), &config.interceptor.self_reference);
            for descriptor in found.manifest.descriptors(&found.path, &settings)? {
                if !code.contains(descriptor.find.as_str()) || !descriptor.is_enabled() {
                    continue;
                }
                for rule in descriptor.replacements.iter().filter(|r| r.is_enabled()) {
                    rules.push(RuleReport {
                        plugin: entry.plugin.clone(),
                        find: descriptor.find.clone(),
                        rule: rule.matcher.to_string(),
                        preview: preview_rule(&host, &module.id, &module.source, rule, &scope),
                    });
                }
            }
        }

        previews.push(ModulePreview {
            module: module.id.clone(),
            path: module.path.clone(),
            patched_by: factory.patched_by().to_vec(),
            patched_source: factory.patched_source().map(str::to_string),
            rules,
        });
    }
    Ok((previews, engine.report()))
}

fn print_previews(previews: &[ModulePreview], report: &PatchReport, full: bool) {
    for preview in previews {
        if preview.patched_by.is_empty() {
            println!("{} ({}): unchanged", preview.module, preview.path.display());
        } else {
            let plugins: Vec<&str> = preview.patched_by.iter().map(PluginId::as_str).collect();
            println!(
                "{} ({}): patched by {}",
                preview.module,
                preview.path.display(),
                plugins.join(", ")
            );
        }
        if full {
            if let Some(source) = &preview.patched_source {
                println!("{source}\n");
            }
            continue;
        }
        for rule in &preview.rules {
            let outcome = match (&rule.preview.error, rule.preview.matched.is_some()) {
                (Some(e), _) => format!("error: {e}"),
                (None, false) => "no match".to_string(),
                (None, true) if rule.preview.patched.is_none() => "no effect".to_string(),
                (None, true) => render_diff(&rule.preview.diff),
            };
            println!("    {} {}: {outcome}", rule.plugin, rule.rule);
        }
    }

    if !report.plugins.is_empty() {
        println!();
        println!("{:<24} {:>8} {:>8} {:>8}", "plugin", "applied", "no-op", "failed");
        for (plugin, stats) in &report.plugins {
            println!(
                "{:<24} {:>8} {:>8} {:>8}",
                plugin.as_str(),
                stats.applied,
                stats.no_op,
                stats.failed
            );
        }
    }
    for pending in report.unmatched() {
        println!("warning: {} patch {:?} matched no module", pending.plugin, pending.find);
    }
}
