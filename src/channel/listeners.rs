//! Per-request inbound listeners.
//!
//! # Responsibilities
//! - Hand out a listener per in-flight request
//! - Fan every parsed inbound message out to all registered listeners
//! - Guarantee each listener is removed exactly once
//!
//! # Design Decisions
//! - Listeners filter by request id themselves; the registry never inspects
//!   message contents
//! - Unbounded per-listener queues: the pump never blocks on a slow request
//! - Dropping a [`Listener`] deregisters it, so an aborted caller cannot
//!   leave its listener armed

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::tunnel::message::InboundMessage;

/// Registry of active inbound listeners.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<u64, mpsc::UnboundedSender<Arc<InboundMessage>>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new listener.
    pub fn register(self: &Arc<Self>) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(id, tx);
        Listener {
            id,
            rx,
            registry: Some(Arc::clone(self)),
        }
    }

    /// Deliver a message to every registered listener. Returns the count.
    pub fn dispatch(&self, message: Arc<InboundMessage>) -> usize {
        let mut delivered = 0;
        for entry in self.listeners.iter() {
            if entry.value().send(Arc::clone(&message)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of currently registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Receiving end registered for one in-flight request.
#[derive(Debug)]
pub struct Listener {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<InboundMessage>>,
    registry: Option<Arc<ListenerRegistry>>,
}

impl Listener {
    /// Next inbound message. Pending once deregistered and drained.
    pub async fn recv(&mut self) -> Option<Arc<InboundMessage>> {
        self.rx.recv().await
    }

    /// Remove this listener from the registry. Returns `true` only the
    /// first time.
    pub fn deregister(&mut self) -> bool {
        match self.registry.take() {
            Some(registry) => {
                registry.listeners.remove(&self.id);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registry.is_some()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.deregister() {
            tracing::trace!(listener_id = self.id, "Listener released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_all_listeners() {
        let registry = ListenerRegistry::new();
        let mut a = registry.register();
        let mut b = registry.register();

        let delivered = registry.dispatch(Arc::new(InboundMessage::ClientDisconnect));
        assert_eq!(delivered, 2);
        assert_eq!(*a.recv().await.unwrap(), InboundMessage::ClientDisconnect);
        assert_eq!(*b.recv().await.unwrap(), InboundMessage::ClientDisconnect);
    }

    #[test]
    fn test_deregister_exactly_once() {
        let registry = ListenerRegistry::new();
        let mut listener = registry.register();
        assert_eq!(registry.len(), 1);

        assert!(listener.deregister());
        assert!(!listener.deregister());
        assert!(!listener.is_registered());
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(Arc::new(InboundMessage::ClientDisconnect)), 0);
    }

    #[test]
    fn test_drop_releases_listener() {
        let registry = ListenerRegistry::new();
        let listener = registry.register();
        let _other = registry.register();
        drop(listener);
        assert_eq!(registry.len(), 1);
    }
}
