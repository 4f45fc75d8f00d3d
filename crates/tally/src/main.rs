//! Tally CLI
//!
//! Computes and inspects the set of plugins loaded for tracking requests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tally::watcher::PluginWatcher;
use tally::{Application, TallyConfig};

/// Tracker plugin activation
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Tracker plugin activation", long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to ./tally.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the plugins directory
    #[arg(long, global = true)]
    plugins_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the tracker plugins and print their names
    Tracker {
        /// Print the names as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// List installed plugins and their tracker relevance
    List,
    /// Drop the cached tracker plugin list
    Invalidate,
    /// Invalidate the cached list whenever a plugin manifest changes
    Watch,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tally=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = TallyConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = args.plugins_dir {
        config.plugins.dir = dir;
    }

    if let Command::Config = args.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let app = Arc::new(Application::bootstrap(config).context("failed to bootstrap")?);

    match args.command {
        Command::Tracker { json } => tracker(&app, json)?,
        Command::List => list(&app),
        Command::Invalidate => {
            let removed = app.controller().invalidate();
            app.persist_cache();
            println!(
                "{}",
                if removed {
                    "Tracker plugin list invalidated"
                } else {
                    "No cached tracker plugin list"
                }
            );
        }
        Command::Watch => watch(app).await?,
        Command::Config => {}
    }

    Ok(())
}

fn tracker(app: &Application, json: bool) -> Result<()> {
    let plugins = app.controller().load_tracker_plugins()?;
    app.persist_cache();

    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
    } else {
        for name in &plugins {
            println!("{}", name);
        }
    }

    info!("{} tracker plugins loaded", plugins.len());
    Ok(())
}

fn list(app: &Application) {
    for descriptor in app.catalog().descriptors() {
        let marker = if app.is_tracker_plugin(descriptor) { "tracker" } else { "-" };

        let scopes: Vec<String> = descriptor
            .dimensions
            .iter()
            .map(|d| format!("{}:{}", d.scope, d.name))
            .collect();

        if scopes.is_empty() {
            println!("{:<24} {:<8} {}", descriptor.name, marker, descriptor.version);
        } else {
            println!(
                "{:<24} {:<8} {} [{}]",
                descriptor.name,
                marker,
                descriptor.version,
                scopes.join(", ")
            );
        }
    }
}

async fn watch(app: Arc<Application>) -> Result<()> {
    let plugins_dir = app.config().plugins.dir.clone();
    let watcher = PluginWatcher::new(&plugins_dir, app.clone())
        .with_context(|| format!("failed to watch {}", plugins_dir.display()))?;

    let handle = tokio::spawn(watcher.run());
    info!("Plugin watcher started, press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down plugin watcher");
        }
        _ = handle => {
            error!("Plugin watcher stopped unexpectedly");
        }
    }

    app.persist_cache();
    Ok(())
}
