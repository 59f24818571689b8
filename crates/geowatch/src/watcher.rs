//! Permission-gated position watcher.
//!
//! One lock guards three coupled pieces of state:
//! - the consent gate, with one-shot queries parked on it,
//! - the `change` / `error` listener registry,
//! - the sensor watch slot, live iff the registry is non-empty.
//!
//! No lock is held while calling the sensor, the prompt, the preference
//! store or a listener, so any of them may call back into the watcher.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use geowatch_core::{
    Callback, Channel, ConsentAction, ConsentCycle, ConsentDecision, ConsentGate, ConsentState,
    EventRegistry, ListenerId, Position, PositionError, PositionOptions, SettleOutcome, WatchEvent,
    preference_key, prompt_message,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{PreferenceError, WatchError};
use crate::preferences::PreferenceStore;
use crate::prompt::{ConsentPrompt, ConsentRequest, ConsentResponder};
use crate::sensor::{PositionSensor, SensorReading, WatchHandle, WatchSink};
use crate::unload::{UnloadNotifier, UnloadToken};

const DEFAULT_APP_ID: &str = "geowatch";

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Stable application identity. Scopes the remembered consent.
    pub app_id: String,
    /// Defaults for the continuous watch and for one-shot queries.
    pub options: PositionOptions,
}

impl WatcherConfig {
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            options: PositionOptions::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::for_app(DEFAULT_APP_ID)
    }
}

/// Services the watcher depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub sensor: Arc<dyn PositionSensor>,
    pub prompt: Arc<dyn ConsentPrompt>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub unload: Arc<dyn UnloadNotifier>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

// ─── Shared state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchSlot {
    Idle,
    /// `watch_position` is in flight; the lock is not held across it.
    Starting,
    Active(WatchHandle),
}

type QueryReply = oneshot::Sender<Result<Position, WatchError>>;

struct PendingQuery {
    options: PositionOptions,
    reply: QueryReply,
}

struct State {
    consent: ConsentGate<PendingQuery>,
    listeners: EventRegistry<Channel, WatchEvent>,
    watch: WatchSlot,
    torn_down: bool,
}

impl State {
    fn listener_total(&self) -> usize {
        self.listeners.count_all(&Channel::ALL)
    }

    /// Take the live handle if no listener is left on either channel.
    fn take_if_idle(&mut self) -> Option<WatchHandle> {
        if self.listener_total() > 0 {
            return None;
        }
        match self.watch {
            WatchSlot::Active(handle) => {
                self.watch = WatchSlot::Idle;
                Some(handle)
            }
            WatchSlot::Idle | WatchSlot::Starting => None,
        }
    }
}

struct Shared {
    app_id: String,
    preference_key: String,
    options: PositionOptions,
    sensor: Arc<dyn PositionSensor>,
    prompt: Arc<dyn ConsentPrompt>,
    preferences: Arc<dyn PreferenceStore>,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── consent ─────────────────────────────────────────────────────

    fn request_consent(self: &Arc<Self>, cycle: ConsentCycle) {
        if let Some(allowed) = self.preferences.get(&self.preference_key) {
            tracing::debug!(app_id = %self.app_id, cycle = %cycle, allowed, "adopting remembered location consent");
            self.settle(cycle, ConsentDecision::from_allowed(allowed));
            return;
        }

        let weak = Arc::downgrade(self);
        let responder = ConsentResponder::new(move |action| {
            if let Some(shared) = weak.upgrade() {
                shared.answer(cycle, action);
            }
        });
        tracing::info!(app_id = %self.app_id, cycle = %cycle, "prompting for location consent");
        self.prompt.prompt(ConsentRequest::new(
            self.app_id.clone(),
            prompt_message(&self.app_id),
            responder,
        ));
    }

    fn answer(&self, cycle: ConsentCycle, action: ConsentAction) {
        if !self.settle(cycle, action.decision()) {
            return;
        }
        let Some(value) = action.persisted_value() else {
            return;
        };
        match self.preferences.set(&self.preference_key, value) {
            Ok(()) => {
                tracing::debug!(app_id = %self.app_id, key = %self.preference_key, value, "remembered location consent");
            }
            Err(e) => {
                tracing::warn!(app_id = %self.app_id, key = %self.preference_key, error = %e, "failed to remember location consent");
            }
        }
    }

    /// Settle `cycle` and resume parked queries. `false` if the answer was ignored.
    fn settle(&self, cycle: ConsentCycle, decision: ConsentDecision) -> bool {
        let outcome = self.lock().consent.settle(cycle, decision);
        let waiters = match outcome {
            SettleOutcome::Settled(waiters) => waiters,
            SettleOutcome::Stale => {
                tracing::debug!(app_id = %self.app_id, cycle = %cycle, "ignoring answer for superseded consent prompt");
                return false;
            }
            SettleOutcome::AlreadySettled(existing) => {
                tracing::debug!(app_id = %self.app_id, cycle = %cycle, existing = %existing, "consent already settled for this cycle");
                return false;
            }
        };

        tracing::info!(
            app_id = %self.app_id,
            cycle = %cycle,
            decision = %decision,
            pending_queries = waiters.len(),
            "location consent settled"
        );
        for query in waiters {
            self.run_query(decision, query);
        }
        true
    }

    // ── one-shot queries ────────────────────────────────────────────

    fn run_query(&self, decision: ConsentDecision, query: PendingQuery) {
        let PendingQuery { options, reply } = query;
        match decision {
            ConsentDecision::Denied => {
                let _ = reply.send(Err(WatchError::PermissionDenied));
            }
            ConsentDecision::Granted => {
                let torn_down = self.lock().torn_down;
                if torn_down {
                    let _ = reply.send(Err(WatchError::Detached));
                    return;
                }
                self.sensor.current_position(
                    Box::new(move |reading: SensorReading| {
                        let _ = reply.send(reading.map_err(WatchError::Sensor));
                    }),
                    &options,
                );
            }
        }
    }

    fn query(&self, options: PositionOptions) -> PositionQuery {
        let (reply, rx) = oneshot::channel();
        let ready = {
            let mut state = self.lock();
            if state.torn_down {
                let _ = reply.send(Err(WatchError::Detached));
                return PositionQuery { rx };
            }
            state.consent.wait(PendingQuery { options, reply })
        };
        match ready {
            Some((decision, query)) => self.run_query(decision, query),
            None => tracing::debug!(app_id = %self.app_id, "position query waiting for consent"),
        }
        PositionQuery { rx }
    }

    // ── watch lifecycle ─────────────────────────────────────────────

    fn ensure_watching(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.torn_down || state.watch != WatchSlot::Idle || state.listener_total() == 0 {
                return;
            }
            state.watch = WatchSlot::Starting;
        }

        let weak = Arc::downgrade(self);
        let sink: WatchSink = Arc::new(move |reading: SensorReading| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(reading);
            }
        });
        let handle = self.sensor.watch_position(sink, &self.options);

        // Listeners may have gone, or teardown may have run, while the
        // sensor call was in flight.
        let keep = {
            let mut state = self.lock();
            let keep = !state.torn_down && state.listener_total() > 0;
            state.watch = if keep {
                WatchSlot::Active(handle)
            } else {
                WatchSlot::Idle
            };
            keep
        };
        if keep {
            tracing::debug!(app_id = %self.app_id, handle = %handle, "position watch started");
        } else {
            self.sensor.clear_watch(handle);
            tracing::debug!(app_id = %self.app_id, handle = %handle, "position watch no longer needed, cleared");
        }
    }

    fn release_if_idle(&self) {
        let handle = self.lock().take_if_idle();
        if let Some(handle) = handle {
            self.sensor.clear_watch(handle);
            tracing::debug!(app_id = %self.app_id, handle = %handle, "no listeners left, position watch cleared");
        }
    }

    fn teardown(&self, reason: &'static str) {
        let (handle, orphaned) = {
            let mut state = self.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            let handle = match std::mem::replace(&mut state.watch, WatchSlot::Idle) {
                WatchSlot::Active(handle) => Some(handle),
                WatchSlot::Idle | WatchSlot::Starting => None,
            };
            (handle, state.consent.drain())
        };

        if let Some(handle) = handle {
            self.sensor.clear_watch(handle);
        }
        for query in orphaned {
            let _ = query.reply.send(Err(WatchError::Detached));
        }
        tracing::info!(app_id = %self.app_id, reason, released = ?handle, "watcher torn down");
    }

    // ── listeners & delivery ────────────────────────────────────────

    fn add_listener(
        self: &Arc<Self>,
        channel: Channel,
        callback: Callback<WatchEvent>,
        once: bool,
    ) -> ListenerId {
        let id = {
            let mut state = self.lock();
            if once {
                state.listeners.once(channel, callback)
            } else {
                state.listeners.on(channel, callback)
            }
        };
        tracing::trace!(app_id = %self.app_id, channel = %channel, listener = %id, once, "listener added");
        self.ensure_watching();
        id
    }

    fn remove_listener(&self, channel: Channel, id: ListenerId) -> bool {
        let removed = self.lock().listeners.off(channel, id);
        if removed {
            tracing::trace!(app_id = %self.app_id, channel = %channel, listener = %id, "listener removed");
            self.release_if_idle();
        }
        removed
    }

    /// Entry point for every reading of the continuous watch.
    fn deliver(&self, reading: SensorReading) {
        let channel = match &reading {
            Ok(_) => Channel::Change,
            Err(_) => Channel::Error,
        };

        let (dispatch, released) = {
            let mut state = self.lock();
            if state.torn_down {
                return;
            }
            let consent = state.consent.state();
            if !consent.is_granted() {
                // Dropped, not queued.
                tracing::trace!(app_id = %self.app_id, channel = %channel, consent = %consent, "dropping sensor reading");
                return;
            }
            let dispatch = state.listeners.dispatch(channel);
            let released = if dispatch.expired > 0 {
                state.take_if_idle()
            } else {
                None
            };
            (dispatch, released)
        };

        if let Some(handle) = released {
            self.sensor.clear_watch(handle);
            tracing::debug!(app_id = %self.app_id, handle = %handle, "last one-shot listener fired, position watch cleared");
        }

        let event = WatchEvent::from(reading);
        let delivered = dispatch.run(&event);
        tracing::trace!(app_id = %self.app_id, channel = %channel, delivered, "sensor reading delivered");
    }
}

// ─── Query future ───────────────────────────────────────────────────

/// Pending result of [`Watcher::position`].
///
/// Settles once consent is decided and, if granted, the sensor has answered.
/// Stays pending for as long as the consent prompt goes unanswered.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct PositionQuery {
    rx: oneshot::Receiver<Result<Position, WatchError>>,
}

impl PositionQuery {
    /// Non-blocking check. `None` while still pending.
    pub fn try_result(&mut self) -> Option<Result<Position, WatchError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WatchError::Detached)),
        }
    }
}

impl Future for PositionQuery {
    type Output = Result<Position, WatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(WatchError::Detached)))
    }
}

// ─── Watcher ────────────────────────────────────────────────────────

/// Public facade. Dropping it releases any live watch.
pub struct Watcher {
    shared: Arc<Shared>,
    unload: Arc<dyn UnloadNotifier>,
    unload_token: UnloadToken,
}

impl Watcher {
    pub fn builder(collaborators: Collaborators) -> WatcherBuilder {
        WatcherBuilder {
            collaborators,
            config: WatcherConfig::default(),
            initial: Vec::new(),
        }
    }

    pub fn new(collaborators: Collaborators, config: WatcherConfig) -> Self {
        Self::builder(collaborators).config(config).build()
    }

    pub fn app_id(&self) -> &str {
        &self.shared.app_id
    }

    pub fn options(&self) -> &PositionOptions {
        &self.shared.options
    }

    /// Subscribe to `channel` (`"change"` or `"error"`).
    ///
    /// Any other channel name is ignored and returns `None`.
    pub fn on<F>(&self, channel: impl AsRef<str>, listener: F) -> Option<ListenerId>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let channel = recognize(channel.as_ref())?;
        Some(self.shared.add_listener(channel, Arc::new(listener), false))
    }

    /// Like [`on`](Self::on), but the listener is removed after it fires once.
    pub fn once<F>(&self, channel: impl AsRef<str>, listener: F) -> Option<ListenerId>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let channel = recognize(channel.as_ref())?;
        Some(self.shared.add_listener(channel, Arc::new(listener), true))
    }

    /// Unsubscribe. Returns `false` for unknown channels or ids.
    pub fn remove_listener(&self, channel: impl AsRef<str>, id: ListenerId) -> bool {
        match recognize(channel.as_ref()) {
            Some(channel) => self.shared.remove_listener(channel, id),
            None => false,
        }
    }

    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Position) + Send + Sync + 'static,
    {
        self.shared
            .add_listener(Channel::Change, change_callback(listener), false)
    }

    pub fn once_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Position) + Send + Sync + 'static,
    {
        self.shared
            .add_listener(Channel::Change, change_callback(listener), true)
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PositionError) + Send + Sync + 'static,
    {
        self.shared
            .add_listener(Channel::Error, error_callback(listener), false)
    }

    /// One-shot read with the configured default options.
    pub fn position(&self) -> PositionQuery {
        self.shared.query(self.shared.options.clone())
    }

    /// One-shot read overriding the default options.
    pub fn position_with(&self, options: PositionOptions) -> PositionQuery {
        self.shared.query(options)
    }

    /// Drop the current decision and ask again.
    ///
    /// Parked and future queries wait on the new decision. A remembered
    /// preference still answers without a prompt; see
    /// [`forget_consent`](Self::forget_consent).
    /// Does nothing once the watcher has been torn down.
    pub fn reask_permission(&self) {
        let cycle = {
            let mut state = self.shared.lock();
            if state.torn_down {
                tracing::debug!(app_id = %self.shared.app_id, "watcher torn down, not re-asking consent");
                return;
            }
            state.consent.reset()
        };
        tracing::info!(app_id = %self.shared.app_id, cycle = %cycle, "re-asking location consent");
        self.shared.request_consent(cycle);
    }

    /// Erase the remembered decision for this application.
    pub fn forget_consent(&self) -> Result<(), PreferenceError> {
        self.shared.preferences.remove(&self.shared.preference_key)?;
        tracing::info!(app_id = %self.shared.app_id, "forgot remembered location consent");
        Ok(())
    }

    pub fn consent_state(&self) -> ConsentState {
        self.shared.lock().consent.state()
    }

    pub fn is_watching(&self) -> bool {
        self.watch_handle().is_some()
    }

    pub fn watch_handle(&self) -> Option<WatchHandle> {
        match self.shared.lock().watch {
            WatchSlot::Active(handle) => Some(handle),
            WatchSlot::Idle | WatchSlot::Starting => None,
        }
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        self.shared.lock().listeners.count(channel)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shared.teardown("dropped");
        self.unload.cancel_unload(self.unload_token);
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Watcher")
            .field("app_id", &self.shared.app_id)
            .field("consent", &state.consent.state())
            .field("watch", &state.watch)
            .field("listeners", &state.listeners)
            .field("torn_down", &state.torn_down)
            .finish()
    }
}

fn recognize(name: &str) -> Option<Channel> {
    let channel = Channel::parse(name);
    if channel.is_none() {
        tracing::debug!(channel = name, "ignoring listener call for unrecognized channel");
    }
    channel
}

fn change_callback<F>(listener: F) -> Callback<WatchEvent>
where
    F: Fn(&Position) + Send + Sync + 'static,
{
    Arc::new(move |event: &WatchEvent| {
        if let WatchEvent::Change(position) = event {
            listener(position);
        }
    })
}

fn error_callback<F>(listener: F) -> Callback<WatchEvent>
where
    F: Fn(&PositionError) + Send + Sync + 'static,
{
    Arc::new(move |event: &WatchEvent| {
        if let WatchEvent::Error(error) = event {
            listener(error);
        }
    })
}

// ─── Builder ────────────────────────────────────────────────────────

pub struct WatcherBuilder {
    collaborators: Collaborators,
    config: WatcherConfig,
    initial: Vec<(Channel, Callback<WatchEvent>)>,
}

impl WatcherBuilder {
    #[must_use]
    pub fn config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = app_id.into();
        self
    }

    #[must_use]
    pub fn options(mut self, options: PositionOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Listener attached during construction (starts the watch).
    #[must_use]
    pub fn on_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Position) + Send + Sync + 'static,
    {
        self.initial.push((Channel::Change, change_callback(listener)));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(&PositionError) + Send + Sync + 'static,
    {
        self.initial.push((Channel::Error, error_callback(listener)));
        self
    }

    /// Create the watcher and open the first consent cycle.
    pub fn build(self) -> Watcher {
        let Collaborators {
            sensor,
            prompt,
            preferences,
            unload,
        } = self.collaborators;
        let WatcherConfig { app_id, options } = self.config;

        let shared = Arc::new(Shared {
            preference_key: preference_key(&app_id),
            app_id,
            options,
            sensor,
            prompt,
            preferences,
            state: Mutex::new(State {
                consent: ConsentGate::new(),
                listeners: EventRegistry::new(),
                watch: WatchSlot::Idle,
                torn_down: false,
            }),
        });

        let weak = Arc::downgrade(&shared);
        let unload_token = unload.on_unload(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.teardown("unload");
            }
        }));

        let cycle = shared.lock().consent.cycle();
        shared.request_consent(cycle);

        for (channel, callback) in self.initial {
            shared.add_listener(channel, callback, false);
        }

        Watcher {
            shared,
            unload,
            unload_token,
        }
    }
}

impl fmt::Debug for WatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherBuilder")
            .field("config", &self.config)
            .field("initial_listeners", &self.initial.len())
            .finish()
    }
}
