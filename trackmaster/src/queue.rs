//! Pending-routes queue between client connections and the dispatcher.
//!
//! Many producers (one per client connection), one consumer (the
//! dispatcher). The consumer parks while the queue is empty and is woken
//! once per inserted route.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use trackreduce::Route;

use crate::error::{MasterError, Result};

/// Producer side; cheap to clone.
#[derive(Debug, Clone)]
pub struct RouteQueue {
    tx: mpsc::UnboundedSender<Route>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, owned by the dispatcher.
#[derive(Debug)]
pub struct RouteReceiver {
    rx: mpsc::UnboundedReceiver<Route>,
    depth: Arc<AtomicUsize>,
}

/// Create a connected queue pair.
pub fn route_queue() -> (RouteQueue, RouteReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        RouteQueue {
            tx,
            depth: Arc::clone(&depth),
        },
        RouteReceiver { rx, depth },
    )
}

impl RouteQueue {
    /// Append a route. Fails only if the dispatcher has stopped.
    pub fn push(&self, route: Route) -> Result<()> {
        let route_id = route.id;
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx.send(route).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            MasterError::Protocol(format!("dispatcher stopped, route {} dropped", route_id))
        })
    }

    /// Routes queued but not yet taken by the dispatcher.
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl RouteReceiver {
    /// Wait for the next route in submission order. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Route> {
        let route = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(route)
    }
}
