//! Event hub shared by platform adapters
//!
//! Adapters publish platform notifications here; plugins attach handlers
//! through [`Platform::subscribe`](crate::domain::traits::Platform::subscribe).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::domain::entities::{Event, EventHandler, EventKind, Subscription};

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<(u64, EventHandler)>>>,
}

impl HubInner {
    fn remove(&self, kind: EventKind, id: u64) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
        debug!(?kind, id, "Detached event handler");
    }
}

/// Per-kind handler lists with subscription handles
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(id, kind, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(kind, id);
            }
        })
    }

    /// Deliver an event to every handler of its kind, returning how many ran.
    ///
    /// Handlers run one after another. A failing handler is logged and does
    /// not stop delivery to the rest.
    pub async fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let handlers: Vec<(u64, EventHandler)> = {
            let guard = self.inner.handlers.read().unwrap_or_else(PoisonError::into_inner);
            guard.get(&kind).cloned().unwrap_or_default()
        };

        for (id, handler) in &handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!(?kind, handler = id, error = %e, "Event handler failed");
            }
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_handlers(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::BotError;
    use crate::domain::entities::event_handler;
    use std::sync::atomic::AtomicUsize;

    fn counter_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        event_handler(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BotError>(())
            }
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_only_matching_kind() {
        let hub = EventHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = hub.subscribe(EventKind::Ready, counter_handler(hits.clone()));

        assert_eq!(hub.publish(Event::Ready).await, 1);
        let other = Event::MemberLeft {
            channel_id: "c".to_string(),
            user: crate::domain::entities::User::new("u"),
        };
        assert_eq!(hub.publish(other).await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches() {
        let hub = EventHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = hub.subscribe(EventKind::Ready, counter_handler(hits.clone()));
        assert_eq!(hub.handler_count(EventKind::Ready), 1);

        drop(sub);
        assert_eq!(hub.handler_count(EventKind::Ready), 0);
        hub.publish(Event::Ready).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let hub = EventHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = hub.subscribe(
            EventKind::Ready,
            event_handler(|_| async { Err::<(), BotError>(BotError::Internal("boom".to_string())) }),
        );
        let _good = hub.subscribe(EventKind::Ready, counter_handler(hits.clone()));

        assert_eq!(hub.publish(Event::Ready).await, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
