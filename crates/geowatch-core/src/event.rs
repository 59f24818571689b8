//! Channel-keyed listener registry.
//!
//! A plain data structure: it never invokes callbacks while borrowed by the
//! caller's lock. [`EventRegistry::dispatch`] hands back the callbacks to run
//! so the owner can release its lock first and let listeners re-enter.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Shared listener callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Token identifying one registration. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

struct Registration<E> {
    id: ListenerId,
    callback: Callback<E>,
    once: bool,
}

/// Callbacks collected for one emission.
pub struct Dispatch<E> {
    /// Callbacks to invoke, in registration order.
    pub callbacks: Vec<Callback<E>>,
    /// Number of one-shot registrations removed by this dispatch.
    pub expired: usize,
}

impl<E> Dispatch<E> {
    /// Invoke every collected callback with `event`. Returns how many ran.
    pub fn run(self, event: &E) -> usize {
        let count = self.callbacks.len();
        for callback in self.callbacks {
            callback(event);
        }
        count
    }
}

/// Listeners partitioned by channel key.
pub struct EventRegistry<K, E> {
    channels: HashMap<K, Vec<Registration<E>>>,
    next_id: u64,
}

impl<K, E> EventRegistry<K, E>
where
    K: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a persistent listener.
    pub fn on(&mut self, channel: K, callback: Callback<E>) -> ListenerId {
        self.register(channel, callback, false)
    }

    /// Register a listener removed automatically after its first invocation.
    pub fn once(&mut self, channel: K, callback: Callback<E>) -> ListenerId {
        self.register(channel, callback, true)
    }

    /// Remove a registration. Returns `true` if it was present on `channel`.
    pub fn off(&mut self, channel: K, id: ListenerId) -> bool {
        let Some(registrations) = self.channels.get_mut(&channel) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            self.channels.remove(&channel);
        }
        removed
    }

    /// Number of active listeners on `channel`.
    pub fn count(&self, channel: K) -> usize {
        self.channels.get(&channel).map_or(0, Vec::len)
    }

    /// Sum of [`count`](Self::count) over `channels`.
    pub fn count_all(&self, channels: &[K]) -> usize {
        channels.iter().map(|c| self.count(*c)).sum()
    }

    pub fn contains(&self, channel: K, id: ListenerId) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|regs| regs.iter().any(|r| r.id == id))
    }

    /// Collect the callbacks for one emission on `channel`.
    ///
    /// One-shot registrations are removed here, before anything runs, so a
    /// re-entrant emission cannot fire them twice.
    pub fn dispatch(&mut self, channel: K) -> Dispatch<E> {
        let Some(registrations) = self.channels.get_mut(&channel) else {
            return Dispatch {
                callbacks: Vec::new(),
                expired: 0,
            };
        };

        let callbacks = registrations
            .iter()
            .map(|r| Arc::clone(&r.callback))
            .collect();
        let before = registrations.len();
        registrations.retain(|r| !r.once);
        let expired = before - registrations.len();
        if registrations.is_empty() {
            self.channels.remove(&channel);
        }

        Dispatch { callbacks, expired }
    }

    /// Dispatch and run in one step. Only for owners that hold no lock.
    pub fn emit(&mut self, channel: K, event: &E) -> usize {
        self.dispatch(channel).run(event)
    }

    fn register(&mut self, channel: K, callback: Callback<E>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.channels.entry(channel).or_default().push(Registration {
            id,
            callback,
            once,
        });
        id
    }
}

impl<K, E> Default for EventRegistry<K, E>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> fmt::Debug for EventRegistry<K, E>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (channel, regs) in &self.channels {
            map.entry(channel, &regs.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Topic {
        A,
        B,
    }

    fn counter() -> (Arc<AtomicUsize>, Callback<u32>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let cb: Callback<u32> = Arc::new(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    // ── registration ────────────────────────────────────────────────

    #[test]
    fn ids_are_unique_across_channels() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let (_, cb) = counter();
        let a = reg.on(Topic::A, Arc::clone(&cb));
        let b = reg.on(Topic::B, Arc::clone(&cb));
        let c = reg.once(Topic::A, cb);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(reg.count(Topic::A), 2);
        assert_eq!(reg.count(Topic::B), 1);
        assert_eq!(reg.count_all(&[Topic::A, Topic::B]), 3);
    }

    #[test]
    fn off_removes_only_matching_channel() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let (_, cb) = counter();
        let id = reg.on(Topic::A, cb);
        assert!(!reg.off(Topic::B, id));
        assert!(reg.contains(Topic::A, id));
        assert!(reg.off(Topic::A, id));
        assert!(!reg.off(Topic::A, id));
        assert_eq!(reg.count(Topic::A), 0);
    }

    // ── emission ────────────────────────────────────────────────────

    #[test]
    fn emit_reaches_every_listener_once() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let (hits_1, cb_1) = counter();
        let (hits_2, cb_2) = counter();
        let (hits_b, cb_b) = counter();
        reg.on(Topic::A, cb_1);
        reg.on(Topic::A, cb_2);
        reg.on(Topic::B, cb_b);

        assert_eq!(reg.emit(Topic::A, &7), 2);
        assert_eq!(hits_1.load(Ordering::SeqCst), 1);
        assert_eq!(hits_2.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_passes_event_value() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        reg.on(
            Topic::A,
            Arc::new(move |v: &u32| s.lock().expect("test").push(*v)),
        );
        reg.emit(Topic::A, &3);
        reg.emit(Topic::A, &5);
        assert_eq!(*seen.lock().expect("test"), vec![3, 5]);
    }

    #[test]
    fn emit_on_empty_channel_is_noop() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        assert_eq!(reg.emit(Topic::B, &1), 0);
    }

    // ── once ────────────────────────────────────────────────────────

    #[test]
    fn once_fires_at_most_once() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let (hits, cb) = counter();
        let id = reg.once(Topic::A, cb);

        let dispatch = reg.dispatch(Topic::A);
        assert_eq!(dispatch.expired, 1);
        assert!(!reg.contains(Topic::A, id));
        dispatch.run(&1);

        reg.emit(Topic::A, &2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(reg.count(Topic::A), 0);
    }

    #[test]
    fn once_mixed_with_persistent() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let (once_hits, once_cb) = counter();
        let (on_hits, on_cb) = counter();
        reg.once(Topic::A, once_cb);
        reg.on(Topic::A, on_cb);

        reg.emit(Topic::A, &1);
        reg.emit(Topic::A, &2);
        assert_eq!(once_hits.load(Ordering::SeqCst), 1);
        assert_eq!(on_hits.load(Ordering::SeqCst), 2);
        assert_eq!(reg.count(Topic::A), 1);
    }

    #[test]
    fn debug_lists_counts() {
        let mut reg: EventRegistry<Topic, u32> = EventRegistry::new();
        let (_, cb) = counter();
        reg.on(Topic::B, cb);
        assert_eq!(format!("{reg:?}"), "{B: 1}");
    }
}
