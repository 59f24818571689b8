//! Consent state machine.
//!
//! One decision per ask cycle. Continuations registered while the cycle is
//! unresolved survive a reset and are handed back when a later cycle settles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ─── Decision & State ─────────────────────────────────────────────

/// Settled outcome of an ask cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    Granted,
    Denied,
}

impl ConsentDecision {
    /// Map a persisted allow flag onto a decision.
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed { Self::Granted } else { Self::Denied }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for ConsentDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Unresolved,
    Granted,
    Denied,
}

impl ConsentState {
    pub fn decision(self) -> Option<ConsentDecision> {
        match self {
            Self::Unresolved => None,
            Self::Granted => Some(ConsentDecision::Granted),
            Self::Denied => Some(ConsentDecision::Denied),
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl From<ConsentDecision> for ConsentState {
    fn from(decision: ConsentDecision) -> Self {
        match decision {
            ConsentDecision::Granted => Self::Granted,
            ConsentDecision::Denied => Self::Denied,
        }
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── User actions ─────────────────────────────────────────────────

/// Answer the user can give to a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentAction {
    ShareOnce,
    ShareAlways,
    DenyOnce,
    DenyAlways,
}

impl ConsentAction {
    pub const ALL: [Self; 4] = [
        Self::ShareOnce,
        Self::ShareAlways,
        Self::DenyOnce,
        Self::DenyAlways,
    ];

    pub fn decision(self) -> ConsentDecision {
        match self {
            Self::ShareOnce | Self::ShareAlways => ConsentDecision::Granted,
            Self::DenyOnce | Self::DenyAlways => ConsentDecision::Denied,
        }
    }

    /// Whether the answer is written to the preference store.
    pub fn remember(self) -> bool {
        matches!(self, Self::ShareAlways | Self::DenyAlways)
    }

    /// Value to persist, if any.
    pub fn persisted_value(self) -> Option<bool> {
        self.remember().then(|| self.decision().is_granted())
    }

    /// Button label for prompt UIs.
    pub fn label(self) -> &'static str {
        match self {
            Self::ShareOnce => "Share Location",
            Self::ShareAlways => "Always Share Location",
            Self::DenyOnce => "Don't Share",
            Self::DenyAlways => "Never Share",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShareOnce => "share-once",
            Self::ShareAlways => "share-always",
            Self::DenyOnce => "deny-once",
            Self::DenyAlways => "deny-always",
        }
    }
}

impl fmt::Display for ConsentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown consent action: {0} (expected share-once, share-always, deny-once or deny-always)")]
pub struct UnknownConsentAction(pub String);

impl FromStr for ConsentAction {
    type Err = UnknownConsentAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "share-once" | "share" => Ok(Self::ShareOnce),
            "share-always" | "always" => Ok(Self::ShareAlways),
            "deny-once" | "deny" => Ok(Self::DenyOnce),
            "deny-always" | "never" => Ok(Self::DenyAlways),
            _ => Err(UnknownConsentAction(s.to_owned())),
        }
    }
}

// ─── Preference & prompt text ─────────────────────────────────────

/// Preference-store key holding the remembered decision for `app_id`.
pub fn preference_key(app_id: &str) -> String {
    format!("geolocation.{app_id}.allowed")
}

/// Human-readable prompt text for `app_id`.
pub fn prompt_message(app_id: &str) -> String {
    format!("{app_id} wants to know your location.")
}

// ─── Gate ─────────────────────────────────────────────────────────

/// Identifier of one ask cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsentCycle(u64);

impl ConsentCycle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsentCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of [`ConsentGate::settle`].
#[derive(Debug)]
pub enum SettleOutcome<W> {
    /// The cycle settled; run these continuations.
    Settled(Vec<W>),
    /// The answer belongs to a superseded cycle.
    Stale,
    /// The cycle already has a decision.
    AlreadySettled(ConsentDecision),
}

/// Deferred consent decision with a continuation list.
///
/// `W` is whatever the owner needs to resume a waiter (a reply channel,
/// a closure). The gate only stores and returns them.
#[derive(Debug)]
pub struct ConsentGate<W> {
    state: ConsentState,
    cycle: ConsentCycle,
    waiters: Vec<W>,
}

impl<W> ConsentGate<W> {
    pub fn new() -> Self {
        Self {
            state: ConsentState::Unresolved,
            cycle: ConsentCycle(0),
            waiters: Vec::new(),
        }
    }

    pub fn state(&self) -> ConsentState {
        self.state
    }

    pub fn cycle(&self) -> ConsentCycle {
        self.cycle
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Discard the current decision and open a new cycle.
    ///
    /// Waiters still queued stay queued and follow the new cycle.
    pub fn reset(&mut self) -> ConsentCycle {
        self.cycle = ConsentCycle(self.cycle.0 + 1);
        self.state = ConsentState::Unresolved;
        self.cycle
    }

    /// Settle `cycle`. Only the first answer for the current cycle counts.
    pub fn settle(&mut self, cycle: ConsentCycle, decision: ConsentDecision) -> SettleOutcome<W> {
        if cycle != self.cycle {
            return SettleOutcome::Stale;
        }
        if let Some(existing) = self.state.decision() {
            return SettleOutcome::AlreadySettled(existing);
        }
        self.state = decision.into();
        SettleOutcome::Settled(std::mem::take(&mut self.waiters))
    }

    /// Queue `waiter` until the current cycle settles.
    ///
    /// If a decision is already in place the waiter is handed straight back
    /// together with it.
    pub fn wait(&mut self, waiter: W) -> Option<(ConsentDecision, W)> {
        match self.state.decision() {
            Some(decision) => Some((decision, waiter)),
            None => {
                self.waiters.push(waiter);
                None
            }
        }
    }

    /// Remove every queued waiter without settling.
    pub fn drain(&mut self) -> Vec<W> {
        std::mem::take(&mut self.waiters)
    }
}

impl<W> Default for ConsentGate<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── actions ─────────────────────────────────────────────────────

    #[test]
    fn actions_map_to_decisions() {
        assert_eq!(ConsentAction::ShareOnce.decision(), ConsentDecision::Granted);
        assert_eq!(ConsentAction::ShareAlways.decision(), ConsentDecision::Granted);
        assert_eq!(ConsentAction::DenyOnce.decision(), ConsentDecision::Denied);
        assert_eq!(ConsentAction::DenyAlways.decision(), ConsentDecision::Denied);
    }

    #[test]
    fn only_always_variants_persist() {
        assert_eq!(ConsentAction::ShareOnce.persisted_value(), None);
        assert_eq!(ConsentAction::DenyOnce.persisted_value(), None);
        assert_eq!(ConsentAction::ShareAlways.persisted_value(), Some(true));
        assert_eq!(ConsentAction::DenyAlways.persisted_value(), Some(false));
    }

    #[test]
    fn action_parse_accepts_names_and_aliases() {
        for action in ConsentAction::ALL {
            assert_eq!(action.as_str().parse::<ConsentAction>(), Ok(action));
        }
        assert_eq!("never".parse::<ConsentAction>(), Ok(ConsentAction::DenyAlways));
        assert!("maybe".parse::<ConsentAction>().is_err());
    }

    #[test]
    fn preference_key_is_scoped_by_app() {
        assert_eq!(preference_key("maps"), "geolocation.maps.allowed");
        assert_ne!(preference_key("a"), preference_key("b"));
    }

    // ── gate ────────────────────────────────────────────────────────

    #[test]
    fn new_gate_is_unresolved() {
        let gate: ConsentGate<u8> = ConsentGate::new();
        assert_eq!(gate.state(), ConsentState::Unresolved);
        assert_eq!(gate.cycle().raw(), 0);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn settle_hands_back_waiters() {
        let mut gate = ConsentGate::new();
        assert!(gate.wait("a").is_none());
        assert!(gate.wait("b").is_none());
        match gate.settle(gate.cycle(), ConsentDecision::Granted) {
            SettleOutcome::Settled(waiters) => assert_eq!(waiters, vec!["a", "b"]),
            other => panic!("expected Settled, got {other:?}"),
        }
        assert_eq!(gate.state(), ConsentState::Granted);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn wait_after_settle_returns_immediately() {
        let mut gate = ConsentGate::new();
        let cycle = gate.cycle();
        assert!(matches!(
            gate.settle(cycle, ConsentDecision::Denied),
            SettleOutcome::Settled(_)
        ));
        assert_eq!(gate.wait(7u8), Some((ConsentDecision::Denied, 7)));
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn second_answer_in_cycle_is_ignored() {
        let mut gate: ConsentGate<u8> = ConsentGate::new();
        let cycle = gate.cycle();
        gate.settle(cycle, ConsentDecision::Granted);
        assert!(matches!(
            gate.settle(cycle, ConsentDecision::Denied),
            SettleOutcome::AlreadySettled(ConsentDecision::Granted)
        ));
        assert_eq!(gate.state(), ConsentState::Granted);
    }

    #[test]
    fn reset_discards_settled_decision() {
        let mut gate: ConsentGate<u8> = ConsentGate::new();
        let first = gate.cycle();
        gate.settle(first, ConsentDecision::Denied);
        let second = gate.reset();
        assert_ne!(first, second);
        assert_eq!(gate.state(), ConsentState::Unresolved);
        assert!(gate.wait(1).is_none());
    }

    #[test]
    fn stale_cycle_answer_is_rejected() {
        let mut gate: ConsentGate<u8> = ConsentGate::new();
        let old = gate.cycle();
        gate.reset();
        assert!(matches!(
            gate.settle(old, ConsentDecision::Granted),
            SettleOutcome::Stale
        ));
        assert_eq!(gate.state(), ConsentState::Unresolved);
    }

    #[test]
    fn waiters_follow_reset_into_new_cycle() {
        let mut gate = ConsentGate::new();
        gate.wait("query");
        let next = gate.reset();
        assert_eq!(gate.pending(), 1);
        match gate.settle(next, ConsentDecision::Denied) {
            SettleOutcome::Settled(waiters) => assert_eq!(waiters, vec!["query"]),
            other => panic!("expected Settled, got {other:?}"),
        }
    }

    #[test]
    fn drain_empties_without_settling() {
        let mut gate = ConsentGate::new();
        gate.wait(1u8);
        gate.wait(2u8);
        assert_eq!(gate.drain(), vec![1, 2]);
        assert_eq!(gate.state(), ConsentState::Unresolved);
        assert_eq!(gate.pending(), 0);
    }
}
