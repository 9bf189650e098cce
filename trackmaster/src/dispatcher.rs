//! Work dispatcher: pending routes in, chunks out to workers.
//!
//! A single dispatcher task takes routes from the pending queue in submission
//! order, splits each one, and hands every chunk to the next worker in
//! round-robin order before taking the next route. Chunks of different routes
//! can still run concurrently because workers progress independently.
//!
//! The pool, the accumulator and the queue are each locked on their own;
//! dispatch never holds two of them at once.

use std::sync::Arc;

use trackreduce::{chunk_size, expected_chunk_count, split_route, Chunk, Route};

use crate::accumulator::{ResultAccumulator, RouteTicket};
use crate::config::FailurePolicy;
use crate::error::{MasterError, Result};
use crate::pool::WorkerPool;
use crate::protocol::ClientMessage;
use crate::queue::RouteReceiver;
use crate::registry::ClientRegistry;

pub struct WorkDispatcher {
    routes: RouteReceiver,
    pool: Arc<WorkerPool>,
    accumulator: Arc<ResultAccumulator>,
    registry: Arc<ClientRegistry>,
    policy: FailurePolicy,
}

impl WorkDispatcher {
    pub fn new(
        routes: RouteReceiver,
        pool: Arc<WorkerPool>,
        accumulator: Arc<ResultAccumulator>,
        registry: Arc<ClientRegistry>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            routes,
            pool,
            accumulator,
            registry,
            policy,
        }
    }

    /// Dispatch routes until every queue producer is gone.
    pub async fn run(mut self) {
        log::info!("[Dispatcher] Waiting for routes");
        while let Some(route) = self.routes.recv().await {
            let (route_id, client_id) = (route.id, route.client_id);
            match self.dispatch(route).await {
                Ok(_) => {}
                // Already reported by whoever dropped the route
                Err(MasterError::RouteAbandoned { reason, .. }) => {
                    log::warn!("[Dispatcher] Route {} abandoned: {}", route_id, reason);
                }
                Err(e) => {
                    log::warn!("[Dispatcher] Route {} not dispatched: {}", route_id, e);
                    self.registry.deliver(
                        client_id,
                        ClientMessage::RouteFailed {
                            route_id,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        log::info!("[Dispatcher] Route queue closed, stopping");
    }

    /// Split one route and assign all of its chunks. Returns the chunk count.
    pub async fn dispatch(&self, route: Route) -> Result<usize> {
        let workers = self.wait_for_workers().await?;
        let n = chunk_size(route.waypoints.len(), workers)?;
        let chunks = split_route(&route, n)?;
        let total = chunks.len();
        debug_assert_eq!(total, expected_chunk_count(route.waypoints.len(), n));

        self.accumulator.register(
            RouteTicket {
                route_id: route.id,
                client_id: route.client_id,
                user: route.user.clone(),
            },
            total,
        );

        for chunk in chunks {
            if let Err(e) = self.assign(chunk).await {
                self.accumulator.abandon(route.id);
                return Err(e);
            }
        }

        log::info!(
            "[Dispatcher] Finished chunking route {}: {} waypoints, {} chunks of {} over {} workers",
            route.id,
            route.waypoints.len(),
            total,
            n,
            workers
        );
        Ok(total)
    }

    async fn wait_for_workers(&self) -> Result<usize> {
        let limit = self.policy.worker_wait();
        self.pool
            .wait_for_workers(limit)
            .await
            .ok_or(MasterError::WorkerUnavailable {
                waited: limit.unwrap_or_default(),
            })
    }

    /// Give a chunk to the next worker in rotation. A worker whose connection
    /// closed before the chunk could be handed over is dropped from the pool
    /// and the chunk goes to the next one; nothing already delivered is re-sent.
    async fn assign(&self, mut chunk: Chunk) -> Result<()> {
        loop {
            let Some(worker) = self.pool.next() else {
                self.wait_for_workers().await?;
                continue;
            };

            if !self
                .accumulator
                .assigned(chunk.route_id, chunk.index, worker.id())
            {
                return Err(MasterError::RouteAbandoned {
                    route_id: chunk.route_id,
                    reason: "route dropped while dispatching".to_string(),
                });
            }

            let index = chunk.index;
            match worker.assign(chunk) {
                Ok(()) => {
                    log::debug!("[Dispatcher] Chunk {} -> {}", index, worker.id());
                    return Ok(());
                }
                Err(returned) => {
                    log::warn!(
                        "[Dispatcher] {} closed before chunk {} was handed over",
                        worker.id(),
                        index
                    );
                    self.pool.remove(worker.id());
                    chunk = returned;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Progress;
    use crate::pool::{WorkerHandle, WorkerId};
    use crate::queue::route_queue;
    use chrono::TimeZone;
    use tokio::sync::mpsc;
    use trackreduce::{map_chunk, reduce, ClientId, HaversineCalculator, RouteId, Waypoint};

    fn route(id: u64, count: usize) -> Route {
        let start = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let waypoints = (0..count)
            .map(|i| {
                Waypoint::new(
                    51.5 + i as f64 * 0.001,
                    -0.12,
                    10.0,
                    start + chrono::Duration::seconds(i as i64 * 30),
                )
            })
            .collect();
        Route::new(RouteId(id), ClientId(1), "alice", waypoints).unwrap()
    }

    struct Fixture {
        pool: Arc<WorkerPool>,
        accumulator: Arc<ResultAccumulator>,
        registry: Arc<ClientRegistry>,
        outboxes: Vec<mpsc::UnboundedReceiver<Chunk>>,
    }

    fn fixture(workers: u64) -> Fixture {
        let pool = Arc::new(WorkerPool::new());
        let mut outboxes = Vec::new();
        for id in 1..=workers {
            let (tx, rx) = mpsc::unbounded_channel();
            pool.insert(WorkerHandle::new(WorkerId(id), tx));
            outboxes.push(rx);
        }
        Fixture {
            pool,
            accumulator: Arc::new(ResultAccumulator::new()),
            registry: Arc::new(ClientRegistry::new()),
            outboxes,
        }
    }

    fn dispatcher(f: &Fixture, wait_secs: Option<u64>) -> (WorkDispatcher, crate::queue::RouteQueue) {
        let (queue, receiver) = route_queue();
        let policy = FailurePolicy {
            worker_wait_secs: wait_secs,
            ..FailurePolicy::default()
        };
        let d = WorkDispatcher::new(
            receiver,
            Arc::clone(&f.pool),
            Arc::clone(&f.accumulator),
            Arc::clone(&f.registry),
            policy,
        );
        (d, queue)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Chunk>) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_chunks_alternate_between_workers() {
        let mut f = fixture(2);
        let (d, _queue) = dispatcher(&f, Some(1));

        assert_eq!(d.dispatch(route(1, 5)).await.unwrap(), 3);

        let first = drain(&mut f.outboxes[0]);
        let second = drain(&mut f.outboxes[1]);
        assert_eq!(
            first.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(
            second.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(second[0].waypoints.len(), 3);
        assert_eq!(f.accumulator.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_round_robin_fair_across_routes() {
        let mut f = fixture(3);
        let (d, _queue) = dispatcher(&f, Some(1));

        // 6 waypoints over 3 workers: n = 2, 3 chunks per route
        d.dispatch(route(1, 6)).await.unwrap();
        d.dispatch(route(2, 6)).await.unwrap();

        for outbox in f.outboxes.iter_mut() {
            assert_eq!(drain(outbox).len(), 2);
        }
    }

    #[tokio::test]
    async fn test_dispatched_chunks_reduce_to_whole_route() {
        let mut f = fixture(2);
        let (d, _queue) = dispatcher(&f, Some(1));
        let route = route(3, 11);
        d.dispatch(route.clone()).await.unwrap();

        let calc = HaversineCalculator::default();
        let mut chunks: Vec<Chunk> = f.outboxes.iter_mut().flat_map(drain).collect();
        // deliver results in reverse order
        chunks.sort_by_key(|c| std::cmp::Reverse(c.index));

        let mut completed = None;
        for chunk in &chunks {
            if let Progress::Complete(done) = f.accumulator.record(map_chunk(chunk, &calc)) {
                completed = Some(done);
            }
        }
        let done = completed.expect("route completes once all chunks report");
        let stats = reduce(route.id, &done.partials).unwrap();

        let whole = map_chunk(
            &Chunk {
                route_id: route.id,
                client_id: route.client_id,
                index: 0,
                waypoints: route.waypoints.clone(),
            },
            &calc,
        );
        assert!((stats.distance - whole.stats.distance).abs() < 1e-9);
        assert_eq!(stats.time, whole.stats.time);
    }

    #[tokio::test]
    async fn test_empty_pool_reports_worker_unavailable() {
        let f = fixture(0);
        let (d, queue) = dispatcher(&f, Some(0));
        let (client_id, mut outbox) = f.registry.register();

        let mut r = route(4, 5);
        r.client_id = client_id;
        queue.push(r).unwrap();
        drop(queue);
        d.run().await;

        match outbox.recv().await {
            Some(ClientMessage::RouteFailed { route_id, reason }) => {
                assert_eq!(route_id, RouteId(4));
                assert!(reason.contains("No worker available"));
            }
            other => panic!("expected RouteFailed, got {:?}", other),
        }
        assert_eq!(f.accumulator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_worker_skipped() {
        let mut f = fixture(2);
        // worker 1's connection is gone
        let closed = f.outboxes.remove(0);
        drop(closed);
        let (d, _queue) = dispatcher(&f, Some(1));

        assert_eq!(d.dispatch(route(5, 5)).await.unwrap(), 3);
        assert_eq!(f.pool.len(), 1);
        assert_eq!(drain(&mut f.outboxes[0]).len(), 3);
    }
}
