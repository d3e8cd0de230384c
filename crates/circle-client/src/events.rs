//! Application-lifetime event bus between views.
//!
//! Listeners are registered with [`EventBus::on`] and stay registered for
//! as long as the returned [`ListenerHandle`] lives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// Conversations changed; chat lists should reload.
    RefreshChatList,
    /// The notifications watermark moved forward.
    NotificationsSeen,
}

type Handler = Arc<dyn Fn(AppEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, Handler>>,
}

impl Listeners {
    fn handlers(&self) -> MutexGuard<'_, HashMap<u64, Handler>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Listeners>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every emitted event.
    pub fn on(&self, handler: impl Fn(AppEvent) + Send + Sync + 'static) -> ListenerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers().insert(id, Arc::new(handler));
        ListenerHandle {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Register a listener that forwards events into a channel.
    pub fn listen(&self) -> (ListenerHandle, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.on(move |event| {
            let _ = tx.send(event);
        });
        (handle, rx)
    }

    /// Deliver `event` to every registered listener, synchronously.
    pub fn emit(&self, event: AppEvent) {
        // Handlers run outside the lock so they may register or drop listeners.
        let handlers: Vec<Handler> = self.inner.handlers().values().cloned().collect();
        tracing::trace!(?event, listeners = handlers.len(), "emit");
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.handlers().len()
    }
}

/// Keeps a listener registered; dropping it unregisters.
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
    bus: Weak<Listeners>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.handlers().remove(&self.id);
        }
    }
}
