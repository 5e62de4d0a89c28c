mod config_commands;
mod patch_commands;
mod plugins_commands;

use std::path::PathBuf;

use {
    chunkhook_config::ChunkhookConfig,
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chunkhook", about = "Preview webpack module patches offline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./chunkhook.toml and friends).
    #[arg(long, global = true, env = "CHUNKHOOK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plugin manifest management.
    Plugins {
        #[command(subcommand)]
        action: plugins_commands::PluginsAction,
    },
    /// Run patches over module sources without executing anything.
    Patch {
        #[command(subcommand)]
        action: patch_commands::PatchAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr; stdout is reserved for command output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ChunkhookConfig> {
    match &cli.config {
        Some(path) => chunkhook_config::load_config(path),
        None => Ok(chunkhook_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "chunkhook starting");

    match cli.command {
        Commands::Config { ref action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        Commands::Plugins { ref action } => {
            let config = load_config(&cli)?;
            plugins_commands::handle_plugins(action, &config).await
        },
        Commands::Patch { ref action } => {
            let config = load_config(&cli)?;
            patch_commands::handle_patch(action, &config).await
        },
    }
}
