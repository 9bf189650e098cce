//! Coordinator: client and worker listeners, and result delivery.
//!
//! One task accepts client connections, one accepts worker connections, and
//! one runs the dispatcher. Every connection gets its own reader task and a
//! writer task fed by a channel, so a slow peer never blocks the others.
//!
//! Results are delivered in this order once a route is fully reduced:
//! route statistics, the user's updated totals, then the all-users snapshot.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trackreduce::{
    reduce, Chunk, ClientId, JsonTrackParser, PartialResult, Route, RouteId, Segment,
    TrackParser,
};

use crate::accumulator::{CompletedRoute, Progress, ResultAccumulator};
use crate::config::{MasterConfig, WorkerConfig};
use crate::dispatcher::WorkDispatcher;
use crate::error::{MasterError, Result};
use crate::pool::{WorkerHandle, WorkerId, WorkerIds, WorkerPool};
use crate::protocol::{
    write_message, ClientMessage, ClientRequest, MessageReader, WorkerRequest, WorkerResponse,
};
use crate::queue::{route_queue, RouteQueue, RouteReceiver};
use crate::registry::ClientRegistry;
use crate::users::UserStatsStore;
use crate::worker;

// ============================================================================
// Shared state
// ============================================================================

/// State shared by every connection task.
pub struct Coordinator {
    config: MasterConfig,
    segments: Vec<Segment>,
    parser: Box<dyn TrackParser>,
    queue: RouteQueue,
    pool: Arc<WorkerPool>,
    accumulator: Arc<ResultAccumulator>,
    registry: Arc<ClientRegistry>,
    users: UserStatsStore,
    worker_ids: WorkerIds,
    route_ids: AtomicU64,
}

impl Coordinator {
    fn new(config: MasterConfig, segments: Vec<Segment>) -> (Arc<Self>, WorkDispatcher) {
        let (queue, receiver) = route_queue();
        let coordinator = Arc::new(Self {
            config,
            segments,
            parser: Box::new(JsonTrackParser),
            queue,
            pool: Arc::new(WorkerPool::new()),
            accumulator: Arc::new(ResultAccumulator::new()),
            registry: Arc::new(ClientRegistry::new()),
            users: UserStatsStore::new(),
            worker_ids: WorkerIds::default(),
            route_ids: AtomicU64::new(0),
        });
        let dispatcher = coordinator.dispatcher(receiver);
        (coordinator, dispatcher)
    }

    fn dispatcher(&self, receiver: RouteReceiver) -> WorkDispatcher {
        WorkDispatcher::new(
            receiver,
            Arc::clone(&self.pool),
            Arc::clone(&self.accumulator),
            Arc::clone(&self.registry),
            self.config.failure.clone(),
        )
    }

    pub fn users(&self) -> &UserStatsStore {
        &self.users
    }

    pub fn accumulator(&self) -> &ResultAccumulator {
        &self.accumulator
    }

    /// Routes waiting for the dispatcher.
    pub fn pending_routes(&self) -> usize {
        self.queue.pending()
    }

    /// Routes that lost a chunk to a disconnected worker and will never complete.
    pub fn stalled_routes(&self) -> Vec<RouteId> {
        self.accumulator.stalled_routes()
    }

    fn next_route_id(&self) -> RouteId {
        RouteId(self.route_ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Parse a submitted track and queue it as a new route.
    ///
    /// `Accepted` goes into the client's outbox before the route is queued,
    /// so it always precedes the route's results.
    fn submit(&self, client_id: ClientId, file_name: String, contents: &str) {
        let route = match self.build_route(client_id, contents) {
            Ok(route) => route,
            Err(e) => {
                log::warn!("[Master] Rejected {} from client {}: {}", file_name, client_id, e);
                self.registry.deliver(
                    client_id,
                    ClientMessage::Rejected {
                        file_name,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        let route_id = route.id;
        log::info!(
            "[Master] Client {} submitted {} as route {} ({} waypoints, user {})",
            client_id,
            file_name,
            route_id,
            route.waypoints.len(),
            route.user
        );
        self.registry
            .deliver(client_id, ClientMessage::Accepted { file_name, route_id });

        if let Err(e) = self.queue.push(route) {
            log::error!("[Master] {}", e);
            self.registry.deliver(
                client_id,
                ClientMessage::RouteFailed {
                    route_id,
                    reason: e.to_string(),
                },
            );
        }
    }

    fn build_route(&self, client_id: ClientId, contents: &str) -> Result<Route> {
        let track = self.parser.parse(contents)?;
        let route = Route::new(self.next_route_id(), client_id, track.user, track.waypoints)?;
        Ok(route)
    }

    /// Record one worker result and deliver the route if it is now complete.
    fn on_partial(&self, worker: WorkerId, partial: PartialResult) {
        let (route_id, chunk_index) = (partial.route_id, partial.chunk_index);
        match self.accumulator.record(partial) {
            Progress::Pending { received, expected } => {
                log::debug!(
                    "[Master] Route {}: {}/{} chunks in ({} sent chunk {})",
                    route_id,
                    received,
                    expected,
                    worker,
                    chunk_index
                );
            }
            Progress::Complete(done) => self.complete(done),
            Progress::Duplicate => {
                log::warn!(
                    "[Master] Duplicate result for route {} chunk {} from {}",
                    route_id,
                    chunk_index,
                    worker
                );
            }
            Progress::Unknown => {
                log::debug!(
                    "[Master] Dropping result for untracked route {} chunk {}",
                    route_id,
                    chunk_index
                );
            }
        }
    }

    fn complete(&self, done: CompletedRoute) {
        debug_assert!(!done.partials.is_empty(), "completed route without partials");
        let ticket = done.ticket;
        let stats = match reduce(ticket.route_id, &done.partials) {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("[Master] Reduce failed for route {}: {}", ticket.route_id, e);
                self.registry.deliver(
                    ticket.client_id,
                    ClientMessage::RouteFailed {
                        route_id: ticket.route_id,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        let user = self.users.register_route(&ticket.user, &stats);
        let all = self.users.aggregate();
        log::info!("[Master] {} (user {})", stats, ticket.user);

        let delivered = self
            .registry
            .deliver(ticket.client_id, ClientMessage::RouteStats(stats))
            && self
                .registry
                .deliver(ticket.client_id, ClientMessage::UserStats(user))
            && self
                .registry
                .deliver(ticket.client_id, ClientMessage::AllUsers(all));
        if !delivered {
            log::warn!(
                "[Master] Client {} left before route {} was delivered",
                ticket.client_id,
                ticket.route_id
            );
        }
    }

    /// Apply the configured worker-loss policy to routes `worker` was holding.
    fn worker_lost(&self, worker: WorkerId) {
        let policy = self.config.failure.on_worker_loss;
        for lost in self.accumulator.worker_lost(worker, policy) {
            let route_id = lost.ticket.route_id;
            if lost.abandoned {
                log::warn!(
                    "[Master] Route {} abandoned: {} lost chunks {:?}",
                    route_id,
                    worker,
                    lost.lost_chunks
                );
                self.registry.deliver(
                    lost.ticket.client_id,
                    ClientMessage::RouteFailed {
                        route_id,
                        reason: format!(
                            "{} disconnected holding chunks {:?}",
                            worker, lost.lost_chunks
                        ),
                    },
                );
            } else {
                log::warn!(
                    "[Master] Route {} stalled: {} lost chunks {:?}",
                    route_id,
                    worker,
                    lost.lost_chunks
                );
            }
        }
    }
}

// ============================================================================
// Connections
// ============================================================================

async fn handle_client(coordinator: Arc<Coordinator>, stream: TcpStream) -> Result<()> {
    let (client_id, mut outbox) = coordinator.registry.register();
    let (read, mut write) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if let Err(e) = write_message(&mut write, &message).await {
                log::warn!("[Master] Writing to client {} failed: {}", client_id, e);
                break;
            }
        }
    });

    let mut reader = MessageReader::new(read);
    let outcome = loop {
        match reader.next::<ClientRequest>().await {
            Ok(Some(ClientRequest::SubmitTrack {
                file_name,
                contents,
            })) => coordinator.submit(client_id, file_name, &contents),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // Dropping the registry's sender lets the writer flush what is queued and stop
    coordinator.registry.unregister(client_id);
    let _ = writer.await;
    log::info!("[Master] Client {} disconnected", client_id);
    outcome
}

async fn handle_worker(coordinator: Arc<Coordinator>, stream: TcpStream) -> Result<()> {
    let id = coordinator.worker_ids.next();
    let (read, mut write) = stream.into_split();

    write_message(
        &mut write,
        &WorkerRequest::Configure {
            segments: coordinator.segments.clone(),
            tolerance_m: coordinator.config.segment_tolerance_m,
        },
    )
    .await?;

    let (tx, mut chunks) = mpsc::unbounded_channel::<Chunk>();
    let writer = tokio::spawn(async move {
        while let Some(chunk) = chunks.recv().await {
            if let Err(e) = write_message(&mut write, &WorkerRequest::Process(chunk)).await {
                log::warn!("[Master] Writing to {} failed: {}", id, e);
                break;
            }
        }
    });
    coordinator.pool.insert(WorkerHandle::new(id, tx));
    log::info!("[Master] {} connected", id);

    let mut reader = MessageReader::new(read);
    let outcome = loop {
        match reader.next::<WorkerResponse>().await {
            Ok(Some(WorkerResponse::Partial(partial))) => coordinator.on_partial(id, partial),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // Once the writer is gone its channel is closed, so any chunk the
    // dispatcher has not yet handed over goes to another worker instead.
    coordinator.pool.remove(id);
    writer.abort();
    let _ = writer.await;
    coordinator.worker_lost(id);
    log::info!("[Master] {} disconnected", id);
    if coordinator.pool.is_empty() {
        log::warn!("[Master] No workers connected; new routes wait for one to join");
    }
    outcome
}

async fn accept_clients(listener: TcpListener, coordinator: Arc<Coordinator>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::info!("[Master] Client connected from {}", peer);
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(coordinator, stream).await {
                        log::warn!("[Master] Client {} closed with error: {}", peer, e);
                    }
                });
            }
            Err(e) => log::warn!("[Master] Accepting client failed: {}", e),
        }
    }
}

async fn accept_workers(listener: TcpListener, coordinator: Arc<Coordinator>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("[Master] Worker connection from {}", peer);
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    if let Err(e) = handle_worker(coordinator, stream).await {
                        log::warn!("[Master] Worker {} closed with error: {}", peer, e);
                    }
                });
            }
            Err(e) => log::warn!("[Master] Accepting worker failed: {}", e),
        }
    }
}

// ============================================================================
// Startup
// ============================================================================

/// A configured, not yet listening coordinator.
pub struct Master {
    config: MasterConfig,
    segments: Vec<Segment>,
}

impl Master {
    /// Validate the configuration and load segment definitions.
    pub fn new(config: MasterConfig) -> Result<Self> {
        config.validate()?;
        let segments = match &config.segment_dir {
            Some(dir) => load_segments(dir, &JsonTrackParser)?,
            None => Vec::new(),
        };
        Ok(Self { config, segments })
    }

    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments;
        self
    }

    /// Bind both listeners, start the dispatcher and any in-process workers.
    pub async fn bind(self) -> Result<RunningMaster> {
        let client_listener = TcpListener::bind(self.config.client_addr).await?;
        let worker_listener = TcpListener::bind(self.config.worker_addr).await?;
        let client_addr = client_listener.local_addr()?;
        let worker_addr = worker_listener.local_addr()?;
        let local_workers = self.config.worker_pool_size;

        let (coordinator, dispatcher) = Coordinator::new(self.config, self.segments);
        let tasks = vec![
            tokio::spawn(dispatcher.run()),
            tokio::spawn(accept_clients(client_listener, Arc::clone(&coordinator))),
            tokio::spawn(accept_workers(worker_listener, Arc::clone(&coordinator))),
        ];

        let worker_config = WorkerConfig {
            master_addr: worker_addr,
        };
        // Not in `tasks`: a local worker ending is a lost connection.
        let workers = (0..local_workers)
            .map(|n| {
                let config = worker_config.clone();
                tokio::spawn(async move {
                    match worker::run(config).await {
                        Ok(()) => log::warn!("[Master] Local worker {} disconnected", n),
                        Err(e) => log::error!("[Master] Local worker {} stopped: {}", n, e),
                    }
                })
            })
            .collect();

        log::info!(
            "[Master] Listening for clients on {}, workers on {} ({} local workers)",
            client_addr,
            worker_addr,
            local_workers
        );
        Ok(RunningMaster {
            client_addr,
            worker_addr,
            coordinator,
            tasks,
            workers,
        })
    }
}

/// Load every track file in `dir` as a segment keyed by its file stem.
pub fn load_segments(dir: &Path, parser: &dyn TrackParser) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for path in crate::client::list_tracks(dir)? {
        let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let contents = std::fs::read_to_string(&path)?;
        let track = parser.parse(&contents).map_err(|e| {
            MasterError::Config(format!("segment {}: {}", path.display(), e))
        })?;
        segments.push(track.into_segment(key));
    }
    log::info!("[Master] Loaded {} segments from {}", segments.len(), dir.display());
    Ok(segments)
}

/// A listening coordinator.
pub struct RunningMaster {
    client_addr: SocketAddr,
    worker_addr: SocketAddr,
    coordinator: Arc<Coordinator>,
    /// Dispatcher and accept loops
    tasks: Vec<JoinHandle<()>>,
    /// In-process workers
    workers: Vec<JoinHandle<()>>,
}

impl RunningMaster {
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn worker_addr(&self) -> SocketAddr {
        self.worker_addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Run until the dispatcher or an accept loop stops. They only stop on
    /// panic, so this returns an error once it returns at all. Local workers
    /// coming and going do not end the wait.
    pub async fn wait(self) -> Result<()> {
        let (ended, _, rest) = futures::future::select_all(self.tasks).await;
        for task in rest.into_iter().chain(self.workers) {
            task.abort();
        }
        Err(match ended {
            Ok(()) => MasterError::Protocol("coordinator task stopped".to_string()),
            Err(e) => MasterError::Protocol(format!("coordinator task failed: {}", e)),
        })
    }

    /// Stop accepting connections and abort background tasks.
    pub fn shutdown(self) {
        for task in self.tasks.into_iter().chain(self.workers) {
            task.abort();
        }
        log::info!("[Master] Shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config() -> MasterConfig {
        MasterConfig {
            client_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            worker_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            worker_pool_size: 0,
            ..MasterConfig::default()
        }
    }

    #[test]
    fn test_load_segments_keyed_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("hill.json")).unwrap();
        write!(
            file,
            r#"{{"user":"seg","waypoints":[
                {{"lat":51.5,"lon":-0.12,"time":"2024-05-01T08:00:00Z"}},
                {{"lat":51.501,"lon":-0.12,"time":"2024-05-01T08:00:30Z"}}]}}"#
        )
        .unwrap();

        let segments = load_segments(dir.path(), &JsonTrackParser).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].key.0, "hill");
        assert_eq!(segments[0].points.len(), 2);
    }

    #[test]
    fn test_bad_segment_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{}").unwrap();
        let config = MasterConfig {
            segment_dir: Some(dir.path().to_path_buf()),
            ..test_config()
        };
        assert!(matches!(Master::new(config), Err(MasterError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_track() {
        let (coordinator, _dispatcher) = Coordinator::new(test_config(), Vec::new());
        let (client_id, mut outbox) = coordinator.registry.register();

        coordinator.submit(client_id, "bad.json".to_string(), "not a track");
        match outbox.recv().await {
            Some(ClientMessage::Rejected { file_name, .. }) => assert_eq!(file_name, "bad.json"),
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert_eq!(coordinator.pending_routes(), 0);
    }

    #[tokio::test]
    async fn test_submit_queues_and_assigns_route_ids() {
        let (coordinator, _dispatcher) = Coordinator::new(test_config(), Vec::new());
        let (client_id, mut outbox) = coordinator.registry.register();
        let track = r#"{"user":"alice","waypoints":[
            {"lat":51.5,"lon":-0.12,"time":"2024-05-01T08:00:00Z"},
            {"lat":51.501,"lon":-0.12,"time":"2024-05-01T08:00:30Z"}]}"#;

        coordinator.submit(client_id, "a.json".to_string(), track);
        coordinator.submit(client_id, "b.json".to_string(), track);

        let mut ids = Vec::new();
        for _ in 0..2 {
            match outbox.recv().await {
                Some(ClientMessage::Accepted { route_id, .. }) => ids.push(route_id),
                other => panic!("expected Accepted, got {:?}", other),
            }
        }
        assert_eq!(ids, vec![RouteId(1), RouteId(2)]);
        assert_eq!(coordinator.pending_routes(), 2);
    }
}
