//! Registry of connected clients, used to deliver results.
//!
//! Delivery is decoupled from submission: a route's results are pushed to
//! whichever client id submitted it, whenever its reduction finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use trackreduce::ClientId;

use crate::protocol::ClientMessage;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<ClientMessage>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ClientId, mpsc::UnboundedSender<ClientMessage>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new client connection and return its id and outbox.
    pub fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients().remove(&id);
    }

    /// Best-effort delivery. Returns false if the client is gone.
    pub fn deliver(&self, id: ClientId, message: ClientMessage) -> bool {
        let Some(tx) = self.clients().get(&id).cloned() else {
            log::debug!("[Registry] Client {} gone, dropping message", id);
            return false;
        };
        tx.send(message).is_ok()
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackreduce::RouteId;

    #[test]
    fn test_deliver_to_registered_client() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);

        let message = ClientMessage::RouteFailed {
            route_id: RouteId(1),
            reason: "test".to_string(),
        };
        assert!(registry.deliver(a, message.clone()));
        assert_eq!(rx_a.try_recv().unwrap(), message);

        registry.unregister(a);
        assert!(!registry.deliver(a, message));
        assert_eq!(registry.len(), 1);
    }
}
