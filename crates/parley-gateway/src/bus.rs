use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use parley_types::events::GatewayEvent;

pub type Handler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event bus is closed")]
pub struct BusClosed;

/// In-process publish/subscribe channel shared by every request handler.
///
/// Handlers are kept in registration order and run synchronously inside
/// `publish`. The bus does not filter: every handler sees every event and
/// discards what it does not care about.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
    closed: bool,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live handler. Returns how many ran.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        // Snapshot under the lock, call outside it, so a handler may
        // subscribe or unsubscribe without deadlocking.
        let handlers: Vec<Handler> = self.inner.registry().handlers.values().cloned().collect();

        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<Unsubscribe, BusClosed>
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        let mut registry = self.inner.registry();
        if registry.closed {
            return Err(BusClosed);
        }

        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(id, Arc::new(handler));
        debug!(subscription = id, total = registry.handlers.len(), "bus subscribe");

        Ok(Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Subscribe with a handler that forwards into an unbounded queue.
    pub fn subscribe_channel(&self) -> Result<Subscription, BusClosed> {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.subscribe(move |event| {
            // Receiver gone means the subscription is being torn down
            let _ = tx.send(event.clone());
        })?;

        Ok(Subscription { rx, _guard: guard })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().handlers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry().closed
    }

    /// Refuse new subscriptions and drop every registered handler. Channel
    /// subscribers see their queue end.
    pub fn shutdown(&self) {
        let dropped = {
            let mut registry = self.inner.registry();
            registry.closed = true;
            std::mem::take(&mut registry.handlers)
        };
        info!(handlers = dropped.len(), "Event bus shut down");
    }
}

/// Registration handle. Consuming it with [`Unsubscribe::unsubscribe`] or
/// dropping it removes the handler, so removal happens exactly once.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {}

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let removed = bus.registry().handlers.remove(&self.id).is_some();
            if removed {
                debug!(subscription = self.id, "bus unsubscribe");
            }
        }
    }
}

/// Queue-backed subscription. Events arrive in publish order.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
    _guard: Unsubscribe,
}

impl Subscription {
    /// `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.rx.try_recv().ok()
    }
}
