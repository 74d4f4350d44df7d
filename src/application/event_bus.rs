//! Typed publish/subscribe event bus tying the core's components together.
//! Grounded on the teacher's `infrastructure/event_bus.rs` (an
//! `Arc<RwLock<Vec<_>>>` of listeners shared via `Clone`), expanded with
//! per-topic subscription lists, a catch-all tap, and an in-memory ring
//! buffer for test assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::error;

use crate::domain::events::{EventKind, TradingEvent};

const DEFAULT_RING_CAPACITY: usize = 256;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &TradingEvent);
}

/// Wraps a plain synchronous closure so it can subscribe without
/// implementing [`EventHandler`] directly.
pub struct FnHandler<F>(pub F)
where
    F: Fn(&TradingEvent) + Send + Sync;

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&TradingEvent) + Send + Sync,
{
    async fn handle(&self, event: &TradingEvent) {
        (self.0)(event);
    }
}

struct Inner {
    subscribers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    catch_all: Vec<Arc<dyn EventHandler>>,
    ring: VecDeque<TradingEvent>,
    ring_capacity: usize,
}

/// Clone shares the same underlying bus, matching the teacher's
/// `EventBus` sharing semantics.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<RwLock<Inner>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl EventBus {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                subscribers: HashMap::new(),
                catch_all: Vec::new(),
                ring: VecDeque::with_capacity(ring_capacity),
                ring_capacity,
            })),
        }
    }

    pub async fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut inner = self.inner.write().await;
        inner.subscribers.entry(kind).or_default().push(handler);
    }

    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        let mut inner = self.inner.write().await;
        inner.catch_all.push(handler);
    }

    /// Synchronous delivery: type-matched handlers run in subscription
    /// order, then catch-all handlers, all in-process before this call
    /// returns. Used on ordering-critical paths (e.g. fill -> portfolio
    /// update) so the caller observes committed state before control
    /// returns. A handler failure is isolated: it cannot panic the bus,
    /// since handlers only observe `&TradingEvent` and report via logging.
    pub async fn publish(&self, event: TradingEvent) {
        let mut inner = self.inner.write().await;
        push_ring(&mut inner.ring, inner.ring_capacity, event.clone());
        let kind = event.kind();
        let topic_handlers = inner.subscribers.get(&kind).cloned().unwrap_or_default();
        let catch_all = inner.catch_all.clone();
        drop(inner);

        for handler in &topic_handlers {
            handler.handle(&event).await;
        }
        for handler in &catch_all {
            handler.handle(&event).await;
        }
    }

    /// Asynchronous delivery: each handler runs as its own task; all are
    /// awaited together. Errors/panics are captured, never propagated to
    /// the publisher.
    pub async fn publish_async(&self, event: TradingEvent) {
        let mut inner = self.inner.write().await;
        push_ring(&mut inner.ring, inner.ring_capacity, event.clone());
        let kind = event.kind();
        let mut handlers = inner.subscribers.get(&kind).cloned().unwrap_or_default();
        handlers.extend(inner.catch_all.iter().cloned());
        drop(inner);

        let event = Arc::new(event);
        let tasks = handlers.into_iter().map(|handler| {
            let event = event.clone();
            tokio::spawn(async move {
                handler.handle(&event).await;
            })
        });
        for result in join_all(tasks).await {
            if let Err(join_err) = result {
                error!(error = %join_err, "event bus handler task panicked");
            }
        }
    }

    /// Most recent events, oldest first, for test assertions and debugging.
    pub async fn recent_events(&self) -> Vec<TradingEvent> {
        self.inner.read().await.ring.iter().cloned().collect()
    }

    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .read()
            .await
            .subscribers
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

fn push_ring(ring: &mut VecDeque<TradingEvent>, capacity: usize, event: TradingEvent) {
    if ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn sample_event() -> TradingEvent {
        TradingEvent::SessionStarted {
            session_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_invokes_topic_matched_then_catch_all_handlers() {
        let bus = EventBus::default();
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let order_topic = order.clone();
        bus.subscribe(
            EventKind::SessionStarted,
            Arc::new(FnHandler(move |_e| order_topic.lock().unwrap().push("topic"))),
        )
        .await;

        let order_catch = order.clone();
        bus.subscribe_all(Arc::new(FnHandler(move |_e| {
            order_catch.lock().unwrap().push("catch_all")
        })))
        .await;

        bus.publish(sample_event()).await;

        assert_eq!(*order.lock().unwrap(), vec!["topic", "catch_all"]);
    }

    #[tokio::test]
    async fn unrelated_topic_handler_is_not_invoked() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        bus.subscribe(
            EventKind::OrderFilled,
            Arc::new(FnHandler(move |_e| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await;

        bus.publish(sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ring_buffer_retains_recent_events_up_to_capacity() {
        let bus = EventBus::new(2);
        for _ in 0..3 {
            bus.publish(sample_event()).await;
        }
        assert_eq!(bus.recent_events().await.len(), 2);
    }

    #[tokio::test]
    async fn publish_async_runs_all_handlers_concurrently_and_awaits_them() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = count.clone();
            bus.subscribe_all(Arc::new(FnHandler(move |_e| {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .await;
        }
        bus.publish_async(sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
