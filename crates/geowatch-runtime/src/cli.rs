//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use geowatch::ConsentAction;

use crate::config::RuntimeConfig;
use crate::demo::DemoOptions;

#[derive(Debug, Parser)]
#[command(name = "geowatch", about = "Permission-gated position watcher demo")]
pub struct Cli {
    /// TOML config file with [watcher] and [simulation] sections
    #[arg(long, short = 'c', env = "GEOWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Application identity; scopes the remembered consent
    #[arg(long)]
    pub app_id: Option<String>,

    /// Preference file (default: $XDG_CONFIG_HOME/geowatch/preferences.json)
    #[arg(long)]
    pub prefs: Option<PathBuf>,

    /// Simulated sensor interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Request high-accuracy fixes
    #[arg(long)]
    pub high_accuracy: bool,

    /// Forget the remembered decision and prompt again
    #[arg(long)]
    pub reask: bool,

    /// Answer the prompt non-interactively (share-once, share-always, deny-once, deny-always)
    #[arg(long)]
    pub answer: Option<ConsentAction>,

    /// Exit after this many milliseconds instead of waiting for ctrl-c
    #[arg(long)]
    pub exit_after_ms: Option<u64>,
}

impl Cli {
    /// Flags win over the config file.
    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(app_id) = &self.app_id {
            config.watcher.app_id = app_id.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.simulation.interval_ms = interval_ms;
        }
        if self.high_accuracy {
            config.watcher.options.enable_high_accuracy = true;
        }
    }

    pub fn demo_options(&self) -> DemoOptions {
        DemoOptions {
            reask: self.reask,
            answer: self.answer,
            exit_after: self.exit_after_ms.map(Duration::from_millis),
        }
    }
}
