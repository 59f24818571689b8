//! Simulated position sensor: walks a configured route on a tokio timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use geowatch::{
    Coordinates, Position, PositionError, PositionErrorCode, PositionOptions, PositionReply,
    PositionSensor, SensorReading, WatchHandle, WatchSink,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::SimulationConfig;

/// Fallback when the configured route is empty.
const ORIGIN: [f64; 2] = [0.0, 0.0];

pub struct SimulatedSensor {
    config: Arc<SimulationConfig>,
    runtime: Handle,
    next_handle: AtomicU64,
    /// Shared step counter so consecutive reads move along the route.
    step: Arc<AtomicU64>,
    watches: Mutex<HashMap<WatchHandle, JoinHandle<()>>>,
}

impl SimulatedSensor {
    /// Tasks are spawned on `runtime`, so the sensor may be driven from
    /// threads outside it.
    pub fn new(config: SimulationConfig, runtime: Handle) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            next_handle: AtomicU64::new(0),
            step: Arc::new(AtomicU64::new(0)),
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_watches(&self) -> usize {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Reading number `step` (1-based) of the route.
pub fn reading_at(config: &SimulationConfig, step: u64) -> SensorReading {
    if config.fail_every > 0 && step % u64::from(config.fail_every) == 0 {
        return Err(PositionError::new(
            PositionErrorCode::PositionUnavailable,
            format!("simulated signal loss at reading {step}"),
        ));
    }
    let [latitude, longitude] = if config.route.is_empty() {
        ORIGIN
    } else {
        // `step` is 1-based; usize fits any realistic route length.
        config.route[(step.saturating_sub(1) % config.route.len() as u64) as usize]
    };
    let coords = Coordinates::new(latitude, longitude).with_accuracy(config.accuracy_m);
    Ok(Position::new(coords, Utc::now()))
}

impl PositionSensor for SimulatedSensor {
    fn watch_position(&self, sink: WatchSink, options: &PositionOptions) -> WatchHandle {
        let handle = WatchHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let config = Arc::clone(&self.config);
        let step = Arc::clone(&self.step);
        let task = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(config.interval());
            loop {
                interval.tick().await;
                let n = step.fetch_add(1, Ordering::Relaxed) + 1;
                sink(reading_at(&config, n));
            }
        });
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, task);
        tracing::debug!(
            handle = %handle,
            interval_ms = self.config.interval_ms,
            high_accuracy = options.enable_high_accuracy,
            "simulated watch started"
        );
        handle
    }

    fn clear_watch(&self, handle: WatchHandle) {
        let task = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        match task {
            Some(task) => {
                task.abort();
                tracing::debug!(handle = %handle, "simulated watch cleared");
            }
            None => tracing::debug!(handle = %handle, "clear for unknown watch ignored"),
        }
    }

    fn current_position(&self, reply: PositionReply, options: &PositionOptions) {
        let config = Arc::clone(&self.config);
        let step = Arc::clone(&self.step);
        let delay = config.interval();
        let timeout = options.timeout_ms.map(Duration::from_millis);
        self.runtime.spawn(async move {
            if let Some(timeout) = timeout.filter(|t| *t < delay) {
                tokio::time::sleep(timeout).await;
                reply(Err(PositionError::new(
                    PositionErrorCode::Timeout,
                    format!("no fix within {}ms", timeout.as_millis()),
                )));
                return;
            }
            tokio::time::sleep(delay).await;
            let n = step.fetch_add(1, Ordering::Relaxed) + 1;
            reply(reading_at(&config, n));
        });
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        let watches = self.watches.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in watches.drain() {
            task.abort();
        }
    }
}
