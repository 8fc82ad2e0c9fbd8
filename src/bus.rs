//! Event bus: handler registry and one-shot awaits.
//!
//! Handlers for a single event are scheduled in registration order but
//! each runs on its own task, so a slow handler never blocks the receive
//! loop. Panics are caught per handler and logged; they do not affect
//! other handlers or the dispatcher.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, error, trace};

use crate::event::{Event, EventKind};

/// A registered event handler.
pub type Handler = Arc<dyn Fn(Event) + Send + Sync + 'static>;

/// An optional per-registration filter.
pub type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync + 'static>;

/// Opaque registration handle returned by [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

struct Registration {
    id: u64,
    kind: EventKind,
    predicate: Option<Predicate>,
    handler: Handler,
}

struct AwaitEntry {
    key: String,
    kind: EventKind,
    attrs: serde_json::Map<String, Value>,
    durable: bool,
    tx: UnboundedSender<Event>,
}

#[derive(Default)]
struct BusInner {
    registrations: Vec<Registration>,
    awaits: Vec<AwaitEntry>,
}

/// The handler registry and await table.
pub struct EventBus {
    inner: RwLock<BusInner>,
    next_id: AtomicU64,
    task_counter: AtomicU64,
    /// Bounds concurrently running handler tasks when set.
    limiter: Option<Arc<Semaphore>>,
}

impl EventBus {
    /// An unbounded bus: one task per handler invocation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_concurrency(None)
    }

    /// A bus whose handler tasks share a concurrency bound.
    #[must_use]
    pub fn with_concurrency(bound: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(BusInner::default()),
            next_id: AtomicU64::new(1),
            task_counter: AtomicU64::new(1),
            limiter: bound.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Register a handler for an event kind. Handlers fire in
    /// registration order.
    pub fn on(
        &self,
        kind: EventKind,
        predicate: Option<Predicate>,
        handler: Handler,
    ) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.write().registrations.push(Registration {
            id,
            kind,
            predicate,
            handler,
        });
        HandlerId(id)
    }

    /// Remove a handler registration.
    pub fn off(&self, id: HandlerId) {
        self.inner.write().registrations.retain(|r| r.id != id.0);
    }

    /// Register a one-shot keyed subscription. The matched event is
    /// delivered on the returned channel; unless `durable`, the await is
    /// removed after its first match. Re-using a key replaces the
    /// previous await.
    pub fn add_await(
        &self,
        key: impl Into<String>,
        kind: EventKind,
        attrs: serde_json::Map<String, Value>,
        durable: bool,
    ) -> UnboundedReceiver<Event> {
        let key = key.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        inner.awaits.retain(|a| a.key != key);
        inner.awaits.push(AwaitEntry {
            key,
            kind,
            attrs,
            durable,
            tx,
        });
        rx
    }

    /// Drop an await by key.
    pub fn remove_await(&self, key: &str) {
        self.inner.write().awaits.retain(|a| a.key != key);
    }

    /// Raise an event: schedule every matching handler on its own task,
    /// then feed matching awaits.
    pub fn raise(&self, event: &Event) {
        let kind = event.kind();

        let matching: Vec<Handler> = {
            let inner = self.inner.read();
            inner
                .registrations
                .iter()
                .filter(|r| r.kind == kind)
                .filter(|r| r.predicate.as_ref().map_or(true, |p| p(event)))
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        for handler in matching {
            let task_id = self.task_counter.fetch_add(1, Ordering::Relaxed);
            let event = event.clone();
            let limiter = self.limiter.clone();
            tokio::spawn(async move {
                let _permit = match &limiter {
                    Some(semaphore) => Some(
                        Arc::clone(semaphore)
                            .acquire_owned()
                            .await
                            .expect("handler semaphore closed"),
                    ),
                    None => None,
                };
                trace!(task = %format!("et-{task_id}"), kind = ?event.kind(), "handler task start");
                let result =
                    std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                if let Err(panic) = result {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".into());
                    error!(task = %format!("et-{task_id}"), panic = %message, "event handler panicked");
                }
            });
        }

        self.fire_awaits(event, kind);
    }

    fn fire_awaits(&self, event: &Event, kind: EventKind) {
        let attrs = event.attributes();
        let mut inner = self.inner.write();
        inner.awaits.retain(|entry| {
            if entry.kind != kind || !attrs_match(&entry.attrs, &attrs) {
                return true;
            }
            debug!(key = %entry.key, "await matched");
            // A dropped receiver just means nobody is listening anymore.
            let delivered = entry.tx.send(event.clone()).is_ok();
            entry.durable && delivered
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn attrs_match(expected: &serde_json::Map<String, Value>, actual: &Value) -> bool {
    expected
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::event::Event;

    fn attrs(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn drain(events: &Arc<Mutex<Vec<EventKind>>>, expected: usize) {
        for _ in 0..100 {
            if events.lock().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handlers did not run");
    }

    #[tokio::test]
    async fn handlers_fire_for_matching_kind_only() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on(
            EventKind::GuildDelete,
            None,
            Arc::new(move |e| sink.lock().push(e.kind())),
        );

        bus.raise(&Event::Ready);
        bus.raise(&Event::GuildDelete { server_id: 1 });

        drain(&seen, 1).await;
        assert_eq!(*seen.lock(), vec![EventKind::GuildDelete]);
    }

    #[tokio::test]
    async fn predicate_filters_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on(
            EventKind::GuildDelete,
            Some(Arc::new(|e| {
                matches!(e, Event::GuildDelete { server_id } if *server_id == 7)
            })),
            Arc::new(move |e| sink.lock().push(e.kind())),
        );

        bus.raise(&Event::GuildDelete { server_id: 1 });
        bus.raise(&Event::GuildDelete { server_id: 7 });

        drain(&seen, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn off_unregisters() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = bus.on(
            EventKind::Ready,
            None,
            Arc::new(move |e| sink.lock().push(e.kind())),
        );
        bus.off(id);

        bus.raise(&Event::Ready);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_starve_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.on(EventKind::Ready, None, Arc::new(|_| panic!("boom")));
        let sink = Arc::clone(&seen);
        bus.on(
            EventKind::Ready,
            None,
            Arc::new(move |e| sink.lock().push(e.kind())),
        );

        bus.raise(&Event::Ready);
        drain(&seen, 1).await;
        assert_eq!(*seen.lock(), vec![EventKind::Ready]);
    }

    #[tokio::test]
    async fn bounded_bus_preserves_scheduling_order() {
        let bus = EventBus::with_concurrency(Some(1));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on(
            EventKind::Message,
            None,
            Arc::new(move |e| sink.lock().push(e.kind())),
        );
        let sink = Arc::clone(&seen);
        bus.on(
            EventKind::Mention,
            None,
            Arc::new(move |e| sink.lock().push(e.kind())),
        );

        let message: crate::types::Message = serde_json::from_value(json!({
            "id": "1", "channel_id": "2",
            "author": { "id": "3", "username": "a" },
            "content": "hi", "timestamp": "t"
        }))
        .unwrap();

        bus.raise(&Event::Message(message.clone()));
        bus.raise(&Event::Mention(message));

        drain(&seen, 2).await;
        assert_eq!(*seen.lock(), vec![EventKind::Message, EventKind::Mention]);
    }

    #[tokio::test]
    async fn await_fires_once_and_is_removed() {
        let bus = EventBus::new();
        let mut rx = bus.add_await(
            "gone",
            EventKind::GuildDelete,
            attrs(json!({ "server_id": 7 })),
            false,
        );

        bus.raise(&Event::GuildDelete { server_id: 1 });
        assert!(rx.try_recv().is_err());

        bus.raise(&Event::GuildDelete { server_id: 7 });
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, Event::GuildDelete { server_id: 7 }));

        // One-shot: a second match delivers nothing.
        bus.raise(&Event::GuildDelete { server_id: 7 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn durable_await_keeps_firing() {
        let bus = EventBus::new();
        let mut rx = bus.add_await(
            "watch",
            EventKind::GuildDelete,
            serde_json::Map::new(),
            true,
        );

        bus.raise(&Event::GuildDelete { server_id: 1 });
        bus.raise(&Event::GuildDelete { server_id: 2 });
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn await_key_reuse_replaces() {
        let bus = EventBus::new();
        let mut first = bus.add_await(
            "key",
            EventKind::Ready,
            serde_json::Map::new(),
            false,
        );
        let mut second = bus.add_await(
            "key",
            EventKind::Ready,
            serde_json::Map::new(),
            false,
        );

        bus.raise(&Event::Ready);
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_ok());
    }
}
