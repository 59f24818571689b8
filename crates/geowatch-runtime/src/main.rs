//! geowatch: terminal demo for the permission-gated position watcher.
//! Drives a simulated sensor, prompts for consent on the terminal and
//! remembers "always"/"never" answers in a JSON preference file.

use clap::Parser;

mod cli;
mod config;
mod demo;
mod prompt;
mod sim;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("GEOWATCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::RuntimeConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    let prefs_path = match args.prefs.clone().or_else(|| config.preferences.clone()) {
        Some(path) => path,
        None => config::default_preferences_path()?,
    };

    tracing::info!(
        app_id = %config.watcher.app_id,
        prefs = %prefs_path.display(),
        interval_ms = config.simulation.interval_ms,
        "geowatch starting"
    );

    demo::run(config, prefs_path, args.demo_options()).await
}
