//! Property tests for the listener-driven watch lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use geowatch::testing::Harness;
use geowatch::{Channel, ConsentAction, ListenerId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    On(Channel),
    Once(Channel),
    /// Remove the n-th (mod len) live registration.
    Remove(usize),
    Push,
    PushError,
}

fn arb_channel() -> impl Strategy<Value = Channel> {
    prop_oneof![Just(Channel::Change), Just(Channel::Error)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_channel().prop_map(Op::On),
        arb_channel().prop_map(Op::Once),
        (0usize..16).prop_map(Op::Remove),
        Just(Op::Push),
        Just(Op::PushError),
    ]
}

proptest! {
    /// A watch is live iff at least one change/error listener is registered,
    /// and never more than one at a time.
    #[test]
    fn watch_live_iff_listeners(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let h = Harness::new().with_preference("prop", true);
        let watcher = h.watcher("prop");
        // (channel, id, once) for every registration still in the watcher.
        let mut live: Vec<(Channel, ListenerId, bool)> = Vec::new();

        for op in ops {
            match op {
                Op::On(channel) => {
                    let id = watcher.on(channel, |_| {}).expect("recognized");
                    live.push((channel, id, false));
                }
                Op::Once(channel) => {
                    let id = watcher.once(channel, |_| {}).expect("recognized");
                    live.push((channel, id, true));
                }
                Op::Remove(n) => {
                    if !live.is_empty() {
                        let (channel, id, _) = live.remove(n % live.len());
                        prop_assert!(watcher.remove_listener(channel, id));
                    }
                }
                Op::Push => {
                    h.sensor.push_position(1.0, 2.0);
                    live.retain(|&(channel, _, once)| !(once && channel == Channel::Change));
                }
                Op::PushError => {
                    h.sensor.push(Err(geowatch::PositionError::new(
                        geowatch::PositionErrorCode::Timeout,
                        "prop",
                    )));
                    live.retain(|&(channel, _, once)| !(once && channel == Channel::Error));
                }
            }

            let total = watcher.listener_count(Channel::Change) + watcher.listener_count(Channel::Error);
            prop_assert_eq!(total, live.len());
            prop_assert_eq!(watcher.is_watching(), total > 0);
            prop_assert!(h.sensor.active_handles().len() <= 1);
            prop_assert_eq!(h.sensor.active_handles().len(), usize::from(total > 0));
        }
    }

    /// Nothing reaches a listener before consent is granted.
    #[test]
    fn no_delivery_before_grant(before in 0usize..6, after in 0usize..6, grant in any::<bool>()) {
        let h = Harness::new();
        let watcher = h.watcher("prop");
        let hits = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&hits);
        watcher.on_change(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..before {
            h.sensor.push_position(0.0, 0.0);
        }
        prop_assert_eq!(hits.load(Ordering::SeqCst), 0);

        let action = if grant { ConsentAction::ShareOnce } else { ConsentAction::DenyOnce };
        h.prompt.respond(action);
        for _ in 0..after {
            h.sensor.push_position(0.0, 0.0);
        }
        let expected = if grant { after } else { 0 };
        prop_assert_eq!(hits.load(Ordering::SeqCst), expected);
    }
}
