//! Demo flow: watch, print, query once, release on ctrl-c.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use geowatch::{
    Collaborators, ConsentAction, JsonPreferenceStore, ListenerId, PreferenceStore, UnloadSignal,
    WatchError, Watcher, WatcherConfig, preference_key,
};
use tokio::runtime::Handle;

use crate::config::RuntimeConfig;
use crate::prompt::TerminalPrompt;
use crate::sim::SimulatedSensor;

#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    pub reask: bool,
    pub answer: Option<ConsentAction>,
    pub exit_after: Option<Duration>,
}

pub async fn run(config: RuntimeConfig, prefs_path: PathBuf, opts: DemoOptions) -> anyhow::Result<()> {
    let preferences = JsonPreferenceStore::open(&prefs_path)
        .with_context(|| format!("failed to open preference file {}", prefs_path.display()))?;
    let unload = Arc::new(UnloadSignal::new());
    let runtime = Handle::current();
    let collaborators = Collaborators {
        sensor: Arc::new(SimulatedSensor::new(config.simulation, runtime.clone())),
        prompt: Arc::new(TerminalPrompt::new(opts.answer, runtime)),
        preferences: Arc::new(preferences),
        unload: unload.clone(),
    };

    let watcher = build_watcher(collaborators, config.watcher, opts.reask)?;
    attach_first_fix_listener(&watcher);
    watcher.on_error(|error| eprintln!("position error: {error}"));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tokio::select! {
        result = watcher.position() => match result {
            Ok(position) => println!(
                "current position: {:.5}, {:.5} (±{}m)",
                position.coords.latitude, position.coords.longitude, position.coords.accuracy
            ),
            Err(WatchError::PermissionDenied) => {
                println!("location access denied; run with --reask to be asked again");
            }
            Err(e) => eprintln!("position query failed: {e}"),
        },
        _ = &mut shutdown => {
            tracing::info!("received ctrl-c, shutting down");
            unload.fire();
            return Ok(());
        }
    }

    let deadline = async {
        match opts.exit_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = &mut shutdown => tracing::info!("received ctrl-c, shutting down"),
        () = deadline => tracing::info!("exit timer elapsed, shutting down"),
    }

    let released = unload.fire();
    tracing::debug!(released, watching = watcher.is_watching(), "unload signal delivered");
    Ok(())
}

/// With `reask`, the remembered decision is erased before the watcher opens
/// its first consent cycle, so startup shows a single prompt.
fn build_watcher(
    collaborators: Collaborators,
    config: WatcherConfig,
    reask: bool,
) -> anyhow::Result<Arc<Watcher>> {
    if reask {
        collaborators
            .preferences
            .remove(&preference_key(&config.app_id))
            .context("failed to clear remembered consent")?;
        tracing::info!(app_id = %config.app_id, "cleared remembered location consent");
    }
    let watcher = Watcher::builder(collaborators)
        .config(config)
        .on_change(|position| println!("latitude: {:.5}", position.coords.latitude))
        .build();
    Ok(Arc::new(watcher))
}

/// A `change` listener that prints the first fix and then removes itself.
fn attach_first_fix_listener(watcher: &Arc<Watcher>) {
    let slot: Arc<Mutex<Option<ListenerId>>> = Arc::default();
    let weak = Arc::downgrade(watcher);
    let own_id = Arc::clone(&slot);
    let id = watcher.on("change", move |event| {
        if let Some(position) = event.position() {
            println!(
                "first fix: {:.5}, {:.5}",
                position.coords.latitude, position.coords.longitude
            );
        }
        let id = own_id.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let (Some(watcher), Some(id)) = (weak.upgrade(), id) {
            watcher.remove_listener("change", id);
        }
    });
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = id;
}
