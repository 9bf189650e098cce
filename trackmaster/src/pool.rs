//! Worker pool with round-robin selection.
//!
//! Handles live in a stable `Vec` with a cursor pointing at the next worker
//! to hand work to. Selection is O(1); a newly connected worker joins the
//! end of the current rotation; removing a worker keeps the rotation order
//! of the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use trackreduce::Chunk;

/// Identifier of a worker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Allocates process-unique worker ids.
#[derive(Debug, Default)]
pub struct WorkerIds(AtomicU64);

impl WorkerIds {
    pub fn next(&self) -> WorkerId {
        WorkerId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Sending side of one worker connection.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    tx: mpsc::UnboundedSender<Chunk>,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, tx: mpsc::UnboundedSender<Chunk>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand a chunk to the worker's connection. Returns the chunk back if the
    /// connection is already gone.
    pub fn assign(&self, chunk: Chunk) -> std::result::Result<(), Chunk> {
        self.tx.send(chunk).map_err(|e| e.0)
    }
}

#[derive(Debug, Default)]
struct Ring {
    slots: Vec<WorkerHandle>,
    cursor: usize,
}

/// Connected workers in round-robin order.
#[derive(Debug, Default)]
pub struct WorkerPool {
    ring: Mutex<Ring>,
    joined: Notify,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn ring(&self) -> std::sync::MutexGuard<'_, Ring> {
        // A panic while holding the lock cannot leave the ring half-updated
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a worker as the last in the current rotation.
    pub fn insert(&self, handle: WorkerHandle) {
        let size = {
            let mut ring = self.ring();
            let at = ring.cursor;
            ring.slots.insert(at, handle);
            ring.cursor = (at + 1) % ring.slots.len();
            ring.slots.len()
        };
        log::info!("[WorkerPool] Worker joined, {} connected", size);
        self.joined.notify_waiters();
    }

    /// Remove a worker. Returns false if it was not in the pool.
    pub fn remove(&self, id: WorkerId) -> bool {
        let mut ring = self.ring();
        let Some(pos) = ring.slots.iter().position(|h| h.id == id) else {
            return false;
        };
        ring.slots.remove(pos);
        if pos < ring.cursor {
            ring.cursor -= 1;
        }
        if ring.cursor >= ring.slots.len() {
            ring.cursor = 0;
        }
        log::info!("[WorkerPool] {} removed, {} connected", id, ring.slots.len());
        true
    }

    pub fn len(&self) -> usize {
        self.ring().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The next worker in rotation, advancing the cursor.
    pub fn next(&self) -> Option<WorkerHandle> {
        let mut ring = self.ring();
        if ring.slots.is_empty() {
            return None;
        }
        let at = ring.cursor;
        ring.cursor = (at + 1) % ring.slots.len();
        Some(ring.slots[at].clone())
    }

    /// Wait until at least one worker is connected and return the pool size.
    ///
    /// `None` for `timeout` waits forever; otherwise returns `None` if no
    /// worker connected in time.
    pub async fn wait_for_workers(&self, timeout: Option<Duration>) -> Option<usize> {
        let wait = async {
            loop {
                // Registered before the check so an insert in between is not missed
                let joined = self.joined.notified();
                let size = self.len();
                if size > 0 {
                    return size;
                }
                joined.await;
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
            None => Some(wait.await),
        }
    }
}
