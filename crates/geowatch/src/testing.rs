//! In-memory doubles for the collaborator traits.
//!
//! Everything here is synchronous and deterministic: the sensor only
//! produces readings when told to, and the prompt only answers when told to
//! (or immediately, if scripted).

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geowatch_core::{ConsentAction, Position, PositionOptions, preference_key};

use crate::error::PreferenceError;
use crate::preferences::{MemoryPreferenceStore, PreferenceStore};
use crate::prompt::{ConsentPrompt, ConsentRequest};
use crate::sensor::{PositionReply, PositionSensor, SensorReading, WatchHandle, WatchSink};
use crate::unload::UnloadSignal;
use crate::watcher::{Collaborators, Watcher, WatcherConfig};

// ─── Sensor ─────────────────────────────────────────────────────────

#[derive(Default)]
struct SensorState {
    next_handle: u64,
    sinks: BTreeMap<WatchHandle, WatchSink>,
    started: Vec<WatchHandle>,
    cleared: Vec<WatchHandle>,
    watch_options: Vec<PositionOptions>,
    read_options: Vec<PositionOptions>,
    pending_reads: VecDeque<PositionReply>,
    auto_reply: Option<SensorReading>,
}

/// Sensor that records every call and emits readings on demand.
#[derive(Default)]
pub struct FakeSensor {
    state: Mutex<SensorState>,
}

impl FakeSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer one-shot reads immediately with `reading`.
    #[must_use]
    pub fn replying_with(self, reading: SensorReading) -> Self {
        self.lock().auto_reply = Some(reading);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed `reading` to every live watch. Returns how many sinks got it.
    pub fn push(&self, reading: SensorReading) -> usize {
        let sinks: Vec<WatchSink> = self.lock().sinks.values().cloned().collect();
        for sink in &sinks {
            sink(reading.clone());
        }
        sinks.len()
    }

    pub fn push_position(&self, latitude: f64, longitude: f64) -> usize {
        self.push(Ok(Position::at(latitude, longitude)))
    }

    pub fn active_handles(&self) -> Vec<WatchHandle> {
        self.lock().sinks.keys().copied().collect()
    }

    /// Every handle ever issued, in order.
    pub fn started(&self) -> Vec<WatchHandle> {
        self.lock().started.clone()
    }

    /// Every clear call, in order, including unknown handles.
    pub fn cleared(&self) -> Vec<WatchHandle> {
        self.lock().cleared.clone()
    }

    pub fn watch_options(&self) -> Vec<PositionOptions> {
        self.lock().watch_options.clone()
    }

    pub fn read_count(&self) -> usize {
        self.lock().read_options.len()
    }

    pub fn read_options(&self) -> Vec<PositionOptions> {
        self.lock().read_options.clone()
    }

    pub fn pending_reads(&self) -> usize {
        self.lock().pending_reads.len()
    }

    /// Answer the oldest outstanding one-shot read.
    pub fn answer_read(&self, reading: SensorReading) -> bool {
        let reply = self.lock().pending_reads.pop_front();
        match reply {
            Some(reply) => {
                reply(reading);
                true
            }
            None => false,
        }
    }
}

impl PositionSensor for FakeSensor {
    fn watch_position(&self, sink: WatchSink, options: &PositionOptions) -> WatchHandle {
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = WatchHandle::new(state.next_handle);
        state.sinks.insert(handle, sink);
        state.started.push(handle);
        state.watch_options.push(options.clone());
        handle
    }

    fn clear_watch(&self, handle: WatchHandle) {
        let mut state = self.lock();
        state.sinks.remove(&handle);
        state.cleared.push(handle);
    }

    fn current_position(&self, reply: PositionReply, options: &PositionOptions) {
        let immediate = {
            let mut state = self.lock();
            state.read_options.push(options.clone());
            match state.auto_reply.clone() {
                Some(reading) => Some((reading, reply)),
                None => {
                    state.pending_reads.push_back(reply);
                    None
                }
            }
        };
        if let Some((reading, reply)) = immediate {
            reply(reading);
        }
    }
}

// ─── Prompt ─────────────────────────────────────────────────────────

#[derive(Default)]
struct PromptState {
    auto: Option<ConsentAction>,
    pending: Vec<ConsentRequest>,
    messages: Vec<String>,
}

/// Prompt that holds requests until a test answers them.
#[derive(Default)]
pub struct ScriptedPrompt {
    state: Mutex<PromptState>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every prompt immediately with `action`.
    pub fn answering(action: ConsentAction) -> Self {
        let prompt = Self::default();
        prompt.lock().auto = Some(action);
        prompt
    }

    fn lock(&self) -> MutexGuard<'_, PromptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().messages.clone()
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Answer the most recent unanswered prompt.
    pub fn respond(&self, action: ConsentAction) -> bool {
        let request = self.lock().pending.pop();
        match request {
            Some(request) => {
                request.respond(action);
                true
            }
            None => false,
        }
    }

    /// Hand every unanswered request to the caller, oldest first.
    pub fn take_requests(&self) -> Vec<ConsentRequest> {
        std::mem::take(&mut self.lock().pending)
    }
}

impl ConsentPrompt for ScriptedPrompt {
    fn prompt(&self, request: ConsentRequest) {
        let auto = {
            let mut state = self.lock();
            state.messages.push(request.message().to_owned());
            match state.auto {
                Some(action) => Some((action, request)),
                None => {
                    state.pending.push(request);
                    None
                }
            }
        };
        if let Some((action, request)) = auto {
            request.respond(action);
        }
    }
}

// ─── Preferences ────────────────────────────────────────────────────

/// Store whose writes always fail. Reads see nothing.
#[derive(Debug, Default)]
pub struct FailingPreferenceStore {
    attempts: Mutex<Vec<(String, Option<bool>)>>,
}

impl FailingPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every rejected write, in order. `None` is a removal.
    pub fn attempts(&self) -> Vec<(String, Option<bool>)> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reject(&self, key: &str, value: Option<bool>) -> Result<(), PreferenceError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.to_owned(), value));
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only preference store").into())
    }
}

impl PreferenceStore for FailingPreferenceStore {
    fn get(&self, _key: &str) -> Option<bool> {
        None
    }

    fn set(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.reject(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.reject(key, None)
    }
}

// ─── Harness ────────────────────────────────────────────────────────

/// The four doubles wired together.
pub struct Harness {
    pub sensor: Arc<FakeSensor>,
    pub prompt: Arc<ScriptedPrompt>,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub unload: Arc<UnloadSignal>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            sensor: Arc::new(FakeSensor::new()),
            prompt: Arc::new(ScriptedPrompt::new()),
            preferences: Arc::new(MemoryPreferenceStore::new()),
            unload: Arc::new(UnloadSignal::new()),
        }
    }

    /// Seed a remembered decision for `app_id`.
    #[must_use]
    pub fn with_preference(mut self, app_id: &str, allowed: bool) -> Self {
        self.preferences =
            Arc::new(MemoryPreferenceStore::new().with_value(preference_key(app_id), allowed));
        self
    }

    #[must_use]
    pub fn with_sensor(mut self, sensor: FakeSensor) -> Self {
        self.sensor = Arc::new(sensor);
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: ScriptedPrompt) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            sensor: self.sensor.clone(),
            prompt: self.prompt.clone(),
            preferences: self.preferences.clone(),
            unload: self.unload.clone(),
        }
    }

    /// A watcher for `app_id` with default options.
    pub fn watcher(&self, app_id: &str) -> Watcher {
        Watcher::builder(self.collaborators())
            .config(WatcherConfig::for_app(app_id))
            .build()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
