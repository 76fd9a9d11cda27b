// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::event::Event;

type Callback = Box<dyn Fn(&Event) + Send + 'static>;

struct Subscriber {
    alive: Arc<AtomicBool>,
    callback: Callback,
}

/// Revoking a subscription. Dropping this has no effect; call
/// [`Unsubscribe::unsubscribe`] explicitly. Idempotent.
pub struct Unsubscribe {
    alive: Arc<AtomicBool>,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Topic-keyed pub/sub with synchronous, in-order, per-topic delivery
/// (spec §4.F). Deliberately not built on [`tokio::sync::broadcast`]: that
/// channel drops messages for lagging receivers and can reorder under
/// backpressure, which would violate the ordering guarantee in spec §5.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic (a session or meeting id). The callback is
    /// invoked synchronously, in emission order, for every `emit` on this
    /// topic until unsubscribed.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        callback: impl Fn(&Event) + Send + 'static,
    ) -> Unsubscribe {
        let alive = Arc::new(AtomicBool::new(true));
        let mut topics = self.topics.lock().unwrap();
        topics.entry(topic.into()).or_default().push(Subscriber {
            alive: alive.clone(),
            callback: Box::new(callback),
        });
        Unsubscribe { alive }
    }

    /// Deliver `event` to every live subscriber of `topic`, in subscription
    /// order, skipping any that unsubscribed mid-delivery. A panicking
    /// subscriber is isolated and logged, not propagated.
    pub fn emit(&self, topic: &str, event: &Event) {
        let mut topics = self.topics.lock().unwrap();
        let Some(subscribers) = topics.get_mut(topic) else {
            return;
        };
        subscribers.retain(|s| s.alive.load(Ordering::SeqCst));
        for subscriber in subscribers.iter() {
            if !subscriber.alive.load(Ordering::SeqCst) {
                continue;
            }
            let callback = &subscriber.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(topic, "event bus subscriber panicked; isolating");
            }
        }
    }

    /// A system-wide event not scoped to any one topic. Delivered to every
    /// subscriber of the reserved `"*"` topic.
    pub fn publish_global(&self, event: &Event) {
        self.emit("*", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn delivers_in_emission_order_to_each_subscriber() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _unsub = bus.subscribe("s1", move |event| {
            seen2.lock().unwrap().push(event.sse_name().to_string());
        });

        bus.emit("s1", &Event::TextDelta { text: "a".into() });
        bus.emit("s1", &Event::TextDelta { text: "b".into() });
        bus.emit("s1", &Event::Done);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["text_delta", "text_delta", "done"]
        );
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicBool::new(false));
        let count2 = count.clone();
        let unsub = bus.subscribe("s1", move |_| {
            count2.store(true, Ordering::SeqCst);
        });
        unsub.unsubscribe();
        bus.emit("s1", &Event::Done);
        assert!(!count.load(Ordering::SeqCst));
    }

    #[test]
    fn topics_are_independent() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _unsub = bus.subscribe("s1", move |event| {
            seen2.lock().unwrap().push(event.sse_name().to_string());
        });
        bus.emit("s2", &Event::Done);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn a_panicking_subscriber_does_not_break_the_bus() {
        let bus = EventBus::new();
        let _unsub_panicking = bus.subscribe("s1", |_| panic!("boom"));
        let seen = Arc::new(StdMutex::new(0));
        let seen2 = seen.clone();
        let _unsub_ok = bus.subscribe("s1", move |_| {
            *seen2.lock().unwrap() += 1;
        });

        bus.emit("s1", &Event::Done);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn publish_global_reaches_star_topic_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        let _unsub = bus.subscribe("*", move |_| {
            seen2.store(true, Ordering::SeqCst);
        });
        bus.publish_global(&Event::Done);
        assert!(seen.load(Ordering::SeqCst));
    }
}
