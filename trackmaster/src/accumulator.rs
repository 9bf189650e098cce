//! Per-route collection of partial results.
//!
//! The dispatcher registers each route with its chunk count before the first
//! chunk leaves, and records which worker holds every chunk. Results are
//! collected until all chunks of a route have reported; only then is the
//! route handed out for reduction. Results may arrive in any order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use trackreduce::{ClientId, PartialResult, RouteId};

use crate::config::WorkerLossPolicy;
use crate::pool::WorkerId;

/// Who a route belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTicket {
    pub route_id: RouteId,
    pub client_id: ClientId,
    pub user: String,
}

/// All partial results of a route, ready for reduction.
#[derive(Debug, Clone)]
pub struct CompletedRoute {
    pub ticket: RouteTicket,
    pub partials: Vec<PartialResult>,
}

/// A route affected by a worker disconnect.
#[derive(Debug, Clone)]
pub struct LostRoute {
    pub ticket: RouteTicket,
    pub lost_chunks: Vec<u32>,
    /// True if the route was dropped, false if it was left stalled
    pub abandoned: bool,
}

/// Outcome of recording one partial result.
#[derive(Debug)]
pub enum Progress {
    Pending { received: usize, expected: usize },
    Complete(CompletedRoute),
    /// This chunk already reported
    Duplicate,
    /// Route not registered (never dispatched, already reduced, or abandoned)
    Unknown,
}

#[derive(Debug)]
struct PendingRoute {
    ticket: RouteTicket,
    expected: usize,
    received: BTreeMap<u32, PartialResult>,
    outstanding: HashMap<u32, WorkerId>,
    stalled: bool,
}

#[derive(Debug, Default)]
pub struct ResultAccumulator {
    routes: Mutex<HashMap<RouteId, PendingRoute>>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> std::sync::MutexGuard<'_, HashMap<RouteId, PendingRoute>> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a route that will be split into `expected` chunks.
    pub fn register(&self, ticket: RouteTicket, expected: usize) {
        let route_id = ticket.route_id;
        self.routes().insert(
            route_id,
            PendingRoute {
                ticket,
                expected,
                received: BTreeMap::new(),
                outstanding: HashMap::new(),
                stalled: false,
            },
        );
        log::debug!("[Accumulator] Route {} expects {} chunks", route_id, expected);
    }

    /// Note that `worker` now holds chunk `chunk_index`. Returns false if the
    /// route is no longer tracked, in which case the chunk should not be sent.
    pub fn assigned(&self, route_id: RouteId, chunk_index: u32, worker: WorkerId) -> bool {
        match self.routes().get_mut(&route_id) {
            Some(route) => {
                route.outstanding.insert(chunk_index, worker);
                true
            }
            None => false,
        }
    }

    /// Record one partial result.
    pub fn record(&self, partial: PartialResult) -> Progress {
        let mut routes = self.routes();
        let Some(route) = routes.get_mut(&partial.route_id) else {
            return Progress::Unknown;
        };
        if partial.chunk_index as usize >= route.expected {
            log::warn!(
                "[Accumulator] Route {} got chunk {} but only expects {}",
                partial.route_id,
                partial.chunk_index,
                route.expected
            );
            return Progress::Unknown;
        }
        if route.received.contains_key(&partial.chunk_index) {
            return Progress::Duplicate;
        }

        let route_id = partial.route_id;
        route.outstanding.remove(&partial.chunk_index);
        route.received.insert(partial.chunk_index, partial);

        let (received, expected) = (route.received.len(), route.expected);
        if received < expected {
            return Progress::Pending { received, expected };
        }

        let Some(done) = routes.remove(&route_id) else {
            return Progress::Unknown;
        };
        Progress::Complete(CompletedRoute {
            ticket: done.ticket,
            partials: done.received.into_values().collect(),
        })
    }

    /// Handle a worker disconnect according to `policy`.
    ///
    /// No chunk is ever re-sent. Under `Abandon` every route with a chunk
    /// outstanding on `worker` is dropped; under `Stall` it stays registered
    /// and can never complete.
    pub fn worker_lost(&self, worker: WorkerId, policy: WorkerLossPolicy) -> Vec<LostRoute> {
        let mut routes = self.routes();
        let mut lost = Vec::new();

        for route in routes.values_mut() {
            let mut chunks: Vec<u32> = route
                .outstanding
                .iter()
                .filter(|(_, holder)| **holder == worker)
                .map(|(index, _)| *index)
                .collect();
            if chunks.is_empty() {
                continue;
            }
            chunks.sort_unstable();
            route.stalled = true;
            lost.push(LostRoute {
                ticket: route.ticket.clone(),
                lost_chunks: chunks,
                abandoned: policy == WorkerLossPolicy::Abandon,
            });
        }

        if policy == WorkerLossPolicy::Abandon {
            for route in &lost {
                routes.remove(&route.ticket.route_id);
            }
        }
        lost
    }

    /// Stop tracking a route; later results for it are reported as `Unknown`.
    pub fn abandon(&self, route_id: RouteId) -> Option<RouteTicket> {
        self.routes().remove(&route_id).map(|r| r.ticket)
    }

    /// Routes that lost a chunk and will never be reduced.
    pub fn stalled_routes(&self) -> Vec<RouteId> {
        let mut stalled: Vec<RouteId> = self
            .routes()
            .values()
            .filter(|r| r.stalled)
            .map(|r| r.ticket.route_id)
            .collect();
        stalled.sort_unstable();
        stalled
    }

    /// Routes registered and not yet complete.
    pub fn in_flight(&self) -> usize {
        self.routes().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackreduce::ActivityStats;

    fn ticket(id: u64) -> RouteTicket {
        RouteTicket {
            route_id: RouteId(id),
            client_id: ClientId(1),
            user: "alice".to_string(),
        }
    }

    fn partial(route: u64, index: u32) -> PartialResult {
        PartialResult {
            client_id: ClientId(1),
            route_id: RouteId(route),
            chunk_index: index,
            stats: ActivityStats {
                route_id: RouteId(route),
                distance: 1.0,
                average_speed: 10.0,
                elevation_gain: 0.0,
                time: 360.0,
                segments: vec![],
            },
        }
    }

    #[test]
    fn test_completes_only_when_all_chunks_reported() {
        let acc = ResultAccumulator::new();
        acc.register(ticket(1), 3);

        assert!(matches!(
            acc.record(partial(1, 2)),
            Progress::Pending { received: 1, expected: 3 }
        ));
        assert!(matches!(acc.record(partial(1, 0)), Progress::Pending { .. }));
        match acc.record(partial(1, 1)) {
            Progress::Complete(done) => {
                assert_eq!(done.ticket, ticket(1));
                let order: Vec<u32> = done.partials.iter().map(|p| p.chunk_index).collect();
                assert_eq!(order, vec![0, 1, 2]);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(acc.in_flight(), 0);
        assert!(matches!(acc.record(partial(1, 0)), Progress::Unknown));
    }

    #[test]
    fn test_duplicates_and_out_of_range() {
        let acc = ResultAccumulator::new();
        acc.register(ticket(1), 2);
        acc.record(partial(1, 0));
        assert!(matches!(acc.record(partial(1, 0)), Progress::Duplicate));
        assert!(matches!(acc.record(partial(1, 5)), Progress::Unknown));
        assert!(matches!(acc.record(partial(9, 0)), Progress::Unknown));
    }

    #[test]
    fn test_worker_loss_abandon() {
        let acc = ResultAccumulator::new();
        acc.register(ticket(1), 2);
        acc.register(ticket(2), 1);
        assert!(acc.assigned(RouteId(1), 0, WorkerId(1)));
        assert!(acc.assigned(RouteId(1), 1, WorkerId(2)));
        assert!(acc.assigned(RouteId(2), 0, WorkerId(2)));
        acc.record(partial(1, 0));

        // worker 1 finished its only chunk; nothing lost
        assert!(acc.worker_lost(WorkerId(1), WorkerLossPolicy::Abandon).is_empty());

        let mut lost = acc.worker_lost(WorkerId(2), WorkerLossPolicy::Abandon);
        lost.sort_by_key(|l| l.ticket.route_id);
        assert_eq!(lost.len(), 2);
        assert_eq!(lost[0].lost_chunks, vec![1]);
        assert!(lost.iter().all(|l| l.abandoned));
        assert_eq!(acc.in_flight(), 0);
        assert!(!acc.assigned(RouteId(1), 1, WorkerId(3)));
    }

    #[test]
    fn test_worker_loss_stall_never_completes() {
        let acc = ResultAccumulator::new();
        acc.register(ticket(1), 2);
        acc.assigned(RouteId(1), 0, WorkerId(1));
        acc.assigned(RouteId(1), 1, WorkerId(2));

        let lost = acc.worker_lost(WorkerId(2), WorkerLossPolicy::Stall);
        assert_eq!(lost.len(), 1);
        assert!(!lost[0].abandoned);

        assert!(matches!(
            acc.record(partial(1, 0)),
            Progress::Pending { received: 1, expected: 2 }
        ));
        assert_eq!(acc.stalled_routes(), vec![RouteId(1)]);
        assert_eq!(acc.in_flight(), 1);
    }

    #[test]
    fn test_abandon() {
        let acc = ResultAccumulator::new();
        acc.register(ticket(4), 1);
        assert_eq!(acc.abandon(RouteId(4)), Some(ticket(4)));
        assert_eq!(acc.abandon(RouteId(4)), None);
    }
}
