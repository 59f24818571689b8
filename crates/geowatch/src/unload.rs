//! Process/extension teardown notification.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type UnloadCallback = Box<dyn FnOnce() + Send>;

/// Identifies one `on_unload` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnloadToken(u64);

impl UnloadToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Something that announces teardown exactly once.
pub trait UnloadNotifier: Send + Sync {
    /// Run `callback` at teardown. Registering after teardown runs it at once.
    fn on_unload(&self, callback: UnloadCallback) -> UnloadToken;

    /// Drop a registration that has not run yet. `false` if it already ran
    /// or was never registered.
    fn cancel_unload(&self, token: UnloadToken) -> bool;
}

#[derive(Default)]
struct SignalState {
    fired: bool,
    next_token: u64,
    callbacks: Vec<(UnloadToken, UnloadCallback)>,
}

/// Manually fired unload notifier.
///
/// The runtime fires it on ctrl-c; tests fire it directly.
#[derive(Default)]
pub struct UnloadSignal {
    state: Mutex<SignalState>,
}

impl UnloadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every registered callback. Later calls do nothing.
    ///
    /// Returns the number of callbacks run by this call.
    pub fn fire(&self) -> usize {
        let callbacks = {
            let mut state = self.lock();
            if state.fired {
                return 0;
            }
            state.fired = true;
            std::mem::take(&mut state.callbacks)
        };
        let count = callbacks.len();
        tracing::debug!(callbacks = count, "unload signal fired");
        for (_, callback) in callbacks {
            callback();
        }
        count
    }

    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Callbacks still waiting for `fire`.
    pub fn pending(&self) -> usize {
        self.lock().callbacks.len()
    }
}

impl UnloadNotifier for UnloadSignal {
    fn on_unload(&self, callback: UnloadCallback) -> UnloadToken {
        let token = {
            let mut state = self.lock();
            state.next_token += 1;
            let token = UnloadToken(state.next_token);
            if !state.fired {
                state.callbacks.push((token, callback));
                return token;
            }
            token
        };
        callback();
        token
    }

    fn cancel_unload(&self, token: UnloadToken) -> bool {
        let mut state = self.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|(t, _)| *t != token);
        state.callbacks.len() != before
    }
}

impl fmt::Debug for UnloadSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("UnloadSignal")
            .field("fired", &state.fired)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(hits: &Arc<AtomicUsize>) -> UnloadCallback {
        let h = Arc::clone(hits);
        Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fire_runs_callbacks_once() {
        let signal = UnloadSignal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        signal.on_unload(counting(&hits));
        signal.on_unload(counting(&hits));

        assert_eq!(signal.fire(), 2);
        assert_eq!(signal.fire(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(signal.is_fired());
    }

    #[test]
    fn cancelled_callback_never_runs() {
        let signal = UnloadSignal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let dropped = signal.on_unload(counting(&hits));
        let kept = signal.on_unload(counting(&hits));
        assert_ne!(dropped, kept);

        assert!(signal.cancel_unload(dropped));
        assert!(!signal.cancel_unload(dropped));
        assert_eq!(signal.pending(), 1);

        assert_eq!(signal.fire(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!signal.cancel_unload(kept), "already ran");
    }

    #[test]
    fn late_registration_runs_immediately() {
        let signal = UnloadSignal::new();
        signal.fire();
        let hits = Arc::new(AtomicUsize::new(0));
        signal.on_unload(counting(&hits));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
