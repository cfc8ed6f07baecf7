//! Conductor CLI
//!
//! Drives the policy engine against the simulated platform and manages the
//! policy file.

mod scenario;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_core::domain::{ConfigManager, ConfigWatcher, DeviceFetchOrchestrator, PolicyEvent};
use conductor_infra::{PolicyEventLoop, SimulatedPlatform};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use scenario::Scenario;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Audio device routing policy engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory (defaults to the user config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted routing scenario on the simulated platform
    Scenario {
        #[arg(value_enum)]
        name: Scenario,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the policy file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the factory default policy
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective policy
    Show,
    /// Print the policy file location
    Path,
    /// Run the engine and reload it whenever the policy file changes
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir().context("no user config directory")?,
    };
    let manager = ConfigManager::new(config_dir);

    match cli.command {
        Command::Scenario { name, json } => {
            let config = manager.load().await;
            let report = scenario::run(name, config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print();
            }
        }
        Command::Config { action } => config_command(&manager, action).await?,
    }

    Ok(())
}

async fn config_command(manager: &ConfigManager, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if manager.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite",
                    manager.config_path().display()
                );
            }
            manager
                .save(&conductor_core::domain::PolicyConfig::factory_default())
                .await?;
            println!("Wrote {}", manager.config_path().display());
        }
        ConfigAction::Show => {
            let config = manager.load().await;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => println!("{}", manager.config_path().display()),
        ConfigAction::Watch => watch(manager).await?,
    }
    Ok(())
}

async fn watch(manager: &ConfigManager) -> anyhow::Result<()> {
    let platform = SimulatedPlatform::new();
    let orchestrator = Arc::new(DeviceFetchOrchestrator::new(
        manager.load().await,
        platform.collaborators(),
    ));
    orchestrator.init()?;

    let mut handle = PolicyEventLoop::spawn(Arc::clone(&orchestrator))?;
    let watcher = ConfigWatcher::new(manager.config_dir().to_path_buf()).await?;
    let mut changes = watcher.subscribe();

    tracing::info!(path = %manager.config_path().display(), "Watching policy file, Ctrl-C to stop");
    loop {
        tokio::select! {
            changed = changes.recv() => {
                let path = match changed {
                    Ok(path) => path,
                    Err(broadcast::error::RecvError::Lagged(_)) => manager.config_path().to_path_buf(),
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if path != manager.config_path() {
                    continue;
                }
                let config = manager.load().await;
                let event = PolicyEvent::ConfigReloaded(Box::new(config));
                if let Err(e) = tokio::task::block_in_place(|| handle.call(event)) {
                    tracing::warn!(error = %e, "Rejected policy reload");
                    continue;
                }
                let active = orchestrator.context().active_devices();
                tracing::info!(output = %active.output, input = %active.input, "Policy reloaded");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    Ok(())
}
