//! The event bus.
//!
//! Fan-out publish/subscribe with typed streams, in-flight handler
//! tracking, and a deterministic flush barrier the main loop uses before
//! shutdown.
//!
//! # Invariants
//!
//! 1. In-flight increments happen *before* a handler task is spawned, never
//!    inside it; otherwise a tracked publish could be observed complete
//!    while the scheduler is still starting handlers.
//! 2. The "is in-flight zero?" check and the decision to resume or keep
//!    waiting sit inside the same critical section as the counter itself.
//! 3. Handlers are never cancelled by an abandoned wait; only process
//!    shutdown ends a running handler.
//!
//! Within a single publish, handlers are spawned in subscription insertion
//! order (typed subscribers first, then wildcards). Completion order is
//! unspecified.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use aro_core::value::Value;

/// The wildcard event type: subscribers under `*` receive every event.
pub const WILDCARD: &str = "*";

/// An event in flight on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A subscriber callback. Shared between the bus and any in-flight tasks.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: Uuid,
    handler: EventHandler,
}

struct StreamEntry {
    event_type: String,
    sender: Sender<Event>,
}

#[derive(Default)]
struct BusState {
    by_type: HashMap<String, Vec<Subscription>>,
    wildcard: Vec<Subscription>,
    streams: HashMap<Uuid, StreamEntry>,
    in_flight: usize,
    active_event_sources: usize,
}

struct BusInner {
    state: Mutex<BusState>,
    flush: Condvar,
}

impl BusInner {
    fn finish_tracked(&self) {
        // Invariant 2: decrement, test, and notify under one lock.
        let mut state = self.state.lock().expect("bus lock");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.flush.notify_all();
        }
    }
}

/// Type-indexed publish/subscribe with flush semantics.
///
/// Cheap to clone; clones share the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                flush: Condvar::new(),
            }),
        }
    }

    // -- subscriptions ----------------------------------------------------

    /// Subscribe a handler to an event type (or to everything with `*`).
    pub fn subscribe(&self, event_type: &str, handler: EventHandler) -> Uuid {
        let id = Uuid::new_v4();
        let subscription = Subscription { id, handler };
        let mut state = self.inner.state.lock().expect("bus lock");
        if event_type == WILDCARD {
            state.wildcard.push(subscription);
        } else {
            state
                .by_type
                .entry(event_type.to_string())
                .or_default()
                .push(subscription);
        }
        id
    }

    /// Subscribe an event stream: a channel fed every matching event until
    /// the subscription is removed.
    pub fn subscribe_stream(&self, event_type: &str) -> (Uuid, Receiver<Event>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = unbounded();
        let mut state = self.inner.state.lock().expect("bus lock");
        state.streams.insert(
            id,
            StreamEntry {
                event_type: event_type.to_string(),
                sender,
            },
        );
        (id, receiver)
    }

    /// Remove a subscription by id, across both indexes. Dropping a stream's
    /// sender finalizes its receiver.
    pub fn unsubscribe(&self, id: Uuid) {
        let mut state = self.inner.state.lock().expect("bus lock");
        state.wildcard.retain(|s| s.id != id);
        state.by_type.retain(|_, subs| {
            subs.retain(|s| s.id != id);
            !subs.is_empty()
        });
        state.streams.remove(&id);
    }

    /// Number of direct subscribers that would see this event type.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        let state = self.inner.state.lock().expect("bus lock");
        let typed = state.by_type.get(event_type).map_or(0, Vec::len);
        typed + state.wildcard.len()
    }

    // -- publishing -------------------------------------------------------

    /// Fire-and-forget publish: streams are fed and a detached task is
    /// spawned per matching subscription. No in-flight tracking.
    pub fn publish(&self, event: Event) {
        let handlers = self.snapshot_and_feed_streams(&event);
        let event = Arc::new(event);
        for handler in handlers {
            let event = Arc::clone(&event);
            thread::spawn(move || run_handler(&handler, &event));
        }
    }

    /// Publish and wait for every direct subscriber to complete.
    pub fn publish_and_wait(&self, event: Event) {
        let handlers = self.snapshot_and_feed_streams(&event);
        let event = Arc::new(event);
        let tasks: Vec<JoinHandle<()>> = handlers
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                thread::spawn(move || run_handler(&handler, &event))
            })
            .collect();
        for task in tasks {
            let _ = task.join();
        }
    }

    /// Publish with in-flight tracking and wait for every handler. After
    /// this returns, every handler subscribed at publish time has finished.
    pub fn publish_and_track(&self, event: Event) {
        for task in self.spawn_tracked(event) {
            let _ = task.join();
        }
    }

    /// Publish with in-flight tracking but do not wait. Used for cascading
    /// publishes from inside actions: the statement returns immediately
    /// while `await_pending_events` still observes the handlers.
    pub fn publish_tracked_detached(&self, event: Event) {
        drop(self.spawn_tracked(event));
    }

    fn spawn_tracked(&self, event: Event) -> Vec<JoinHandle<()>> {
        let handlers = {
            let mut state = self.inner.state.lock().expect("bus lock");
            let handlers = matching_handlers(&state, &event.event_type);
            // Invariant 1: count the work before any task exists.
            state.in_flight += handlers.len();
            feed_streams(&mut state, &event);
            handlers
        };
        let event = Arc::new(event);
        handlers
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                let inner = Arc::clone(&self.inner);
                thread::spawn(move || {
                    run_handler(&handler, &event);
                    inner.finish_tracked();
                })
            })
            .collect()
    }

    /// Wait until every tracked handler has completed, or the timeout
    /// elapses. Returns `true` iff the in-flight count was observed zero
    /// within the window. Handlers keep running after a timeout.
    pub fn await_pending_events(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().expect("bus lock");
        while state.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .flush
                .wait_timeout(state, deadline - now)
                .expect("bus lock");
            state = guard;
        }
        true
    }

    /// Current number of tracked handler invocations still running.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().expect("bus lock").in_flight
    }

    // -- long-lived sources -----------------------------------------------

    /// Record a long-lived event source (HTTP server, file watcher) that
    /// keeps the runtime awake.
    pub fn add_event_source(&self) {
        self.inner.state.lock().expect("bus lock").active_event_sources += 1;
    }

    pub fn remove_event_source(&self) {
        let mut state = self.inner.state.lock().expect("bus lock");
        state.active_event_sources = state.active_event_sources.saturating_sub(1);
    }

    pub fn active_event_sources(&self) -> usize {
        self.inner.state.lock().expect("bus lock").active_event_sources
    }

    // -- internals --------------------------------------------------------

    fn snapshot_and_feed_streams(&self, event: &Event) -> Vec<EventHandler> {
        let mut state = self.inner.state.lock().expect("bus lock");
        let handlers = matching_handlers(&state, &event.event_type);
        feed_streams(&mut state, event);
        handlers
    }
}

fn matching_handlers(state: &BusState, event_type: &str) -> Vec<EventHandler> {
    let mut handlers: Vec<EventHandler> = Vec::new();
    if let Some(subs) = state.by_type.get(event_type) {
        handlers.extend(subs.iter().map(|s| Arc::clone(&s.handler)));
    }
    handlers.extend(state.wildcard.iter().map(|s| Arc::clone(&s.handler)));
    handlers
}

fn feed_streams(state: &mut BusState, event: &Event) {
    // Streams whose receiver is gone are cleaned up lazily here.
    state.streams.retain(|_, entry| {
        if entry.event_type != WILDCARD && entry.event_type != event.event_type {
            return true;
        }
        entry.sender.send(event.clone()).is_ok()
    });
}

fn run_handler(handler: &EventHandler, event: &Event) {
    // A panicking handler must not wedge the flush accounting.
    let _ = catch_unwind(AssertUnwindSafe(|| handler(event)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>, delay: Duration) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &Event| {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    // =====================================================================
    // 1. Tracked publish returns only after handlers finish
    // =====================================================================
    #[test]
    fn publish_and_track_waits_for_slow_handlers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("E", counting_handler(&counter, Duration::from_millis(50)));
        bus.publish_and_track(Event::new("E", Value::Null));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(bus.await_pending_events(Duration::from_secs(1)));
    }

    // =====================================================================
    // 2. Detached tracked publish is observed by the flush barrier
    // =====================================================================
    #[test]
    fn await_pending_observes_detached_tracked_publish() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("E", counting_handler(&counter, Duration::from_millis(40)));
        bus.publish_tracked_detached(Event::new("E", Value::Null));
        // The handler was counted before its task spawned, so the barrier
        // cannot return early even if the thread has not started yet.
        assert!(bus.await_pending_events(Duration::from_secs(1)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // =====================================================================
    // 3. Timeout path returns false and leaves handlers running
    // =====================================================================
    #[test]
    fn await_pending_times_out_under_slow_handler() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("E", counting_handler(&counter, Duration::from_millis(200)));
        bus.publish_tracked_detached(Event::new("E", Value::Null));
        assert!(!bus.await_pending_events(Duration::from_millis(30)));
        // The handler keeps going and eventually completes.
        assert!(bus.await_pending_events(Duration::from_secs(2)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // =====================================================================
    // 4. Wildcard subscribers see every event type
    // =====================================================================
    #[test]
    fn wildcard_receives_all_types() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(WILDCARD, counting_handler(&counter, Duration::ZERO));
        bus.publish_and_wait(Event::new("A", Value::Null));
        bus.publish_and_wait(Event::new("B", Value::Null));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    // =====================================================================
    // 5. Unsubscribe removes across indexes and cleans empty entries
    // =====================================================================
    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe("E", counting_handler(&counter, Duration::ZERO));
        bus.publish_and_wait(Event::new("E", Value::Null));
        bus.unsubscribe(id);
        bus.publish_and_wait(Event::new("E", Value::Null));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("E"), 0);
    }

    // =====================================================================
    // 6. Streams receive events until unsubscribed
    // =====================================================================
    #[test]
    fn stream_receives_and_finalizes() {
        let bus = EventBus::new();
        let (id, receiver) = bus.subscribe_stream("E");
        bus.publish(Event::new("E", Value::Int(1)));
        let event = receiver
            .recv_timeout(Duration::from_secs(1))
            .expect("stream event");
        assert_eq!(event.payload, Value::Int(1));
        bus.unsubscribe(id);
        // Sender dropped: the stream ends rather than blocking forever.
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    }

    // =====================================================================
    // 7. A panicking handler does not wedge the flush barrier
    // =====================================================================
    #[test]
    fn panicking_handler_still_decrements() {
        let bus = EventBus::new();
        bus.subscribe("E", Arc::new(|_event: &Event| panic!("boom")));
        bus.publish_and_track(Event::new("E", Value::Null));
        assert!(bus.await_pending_events(Duration::from_millis(100)));
        assert_eq!(bus.in_flight(), 0);
    }

    // =====================================================================
    // 8. Event sources keep their own count
    // =====================================================================
    #[test]
    fn event_source_accounting() {
        let bus = EventBus::new();
        bus.add_event_source();
        bus.add_event_source();
        bus.remove_event_source();
        assert_eq!(bus.active_event_sources(), 1);
    }

    // =====================================================================
    // 9. Flush barrier with many concurrent tracked publishes
    // =====================================================================
    #[test]
    fn flush_with_many_tracked_publishes() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("E", counting_handler(&counter, Duration::from_millis(5)));
        for _ in 0..16 {
            bus.publish_tracked_detached(Event::new("E", Value::Null));
        }
        assert!(bus.await_pending_events(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
