//! Latch Script Runtime
//!
//! Binary that boots logging, binds the console and filesystem plugins into
//! a QuickJS context and runs a script file.

mod console;

use anyhow::{Context as _, Result};
use clap::Parser;
use console::Console;
use latch_asset::plugin::DEFAULT_NAMESPACE;
use latch_asset::{FileContentStore, FileSystemPlugin};
use latch_bridge::{BridgeSettings, ChannelOptions};
use latch_script::QuickJsContext;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "latch")]
#[command(about = "Run a script with native plugins bound", long_about = None)]
#[command(version)]
struct Cli {
    /// Script file to run
    script: PathBuf,

    /// Bridge settings (JSON)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Namespace the filesystem plugin is bound at
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    fs_namespace: String,

    /// Directory filesystem paths resolve below
    #[arg(long)]
    root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => BridgeSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => BridgeSettings::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(settings.max_level())
        .init();

    tracing::info!("Latch Runtime v{}", latch_bridge::VERSION);

    let context = QuickJsContext::with_settings(&settings)?;
    let options = ChannelOptions::from_settings(&settings);

    let console = context.load_plugin(Arc::new(Console), console::NAMESPACE, options.clone())?;

    let store = match cli.root {
        Some(root) => FileContentStore::rooted(root),
        None => FileContentStore::new(),
    };
    let fs = context.load_plugin(
        Arc::new(FileSystemPlugin::new(Arc::new(store))),
        &cli.fs_namespace,
        options,
    )?;

    let outcome = context.execute_file(&cli.script);

    // Drain fire-and-forget calls before reporting.
    for handle in [&console, &fs] {
        handle.channel().flush()?;
    }
    outcome.with_context(|| format!("running {}", cli.script.display()))?;

    tracing::info!(script = %cli.script.display(), "script finished");
    Ok(())
}
