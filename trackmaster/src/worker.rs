//! Worker runtime: receives chunks, runs Map, returns partial results.
//!
//! A worker processes one chunk at a time in arrival order. The coordinator
//! sends segment definitions once, before the first chunk.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use trackreduce::{map_chunk, HaversineCalculator};

use crate::config::WorkerConfig;
use crate::error::{MasterError, Result};
use crate::protocol::{write_message, MessageReader, WorkerRequest, WorkerResponse};

/// Connect to the coordinator and serve chunks until it closes the connection.
pub async fn run(config: WorkerConfig) -> Result<()> {
    let stream = TcpStream::connect(config.master_addr)
        .await
        .map_err(|e| MasterError::Connection {
            peer: config.master_addr.to_string(),
            message: e.to_string(),
        })?;
    log::info!("[Worker] Connected to {}", config.master_addr);
    serve(stream).await
}

/// Serve one coordinator connection.
pub async fn serve<S>(stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = MessageReader::new(read);
    let mut calculator = Arc::new(HaversineCalculator::default());
    let mut processed = 0u64;

    while let Some(request) = reader.next::<WorkerRequest>().await? {
        match request {
            WorkerRequest::Configure {
                segments,
                tolerance_m,
            } => {
                calculator = Arc::new(HaversineCalculator::new(segments, tolerance_m));
                log::info!(
                    "[Worker] Configured with {} segments, tolerance {} m",
                    calculator.segments().len(),
                    tolerance_m
                );
            }
            WorkerRequest::Process(chunk) => {
                let (route_id, index) = (chunk.route_id, chunk.index);
                let calc = Arc::clone(&calculator);
                let partial = tokio::task::spawn_blocking(move || map_chunk(&chunk, calc.as_ref()))
                    .await
                    .map_err(|e| {
                        MasterError::Protocol(format!(
                            "map of route {} chunk {} failed: {}",
                            route_id, index, e
                        ))
                    })?;
                write_message(&mut write, &WorkerResponse::Partial(partial)).await?;
                processed += 1;
                log::debug!("[Worker] Route {} chunk {} done", route_id, index);
            }
        }
    }

    log::info!("[Worker] Coordinator closed connection after {} chunks", processed);
    Ok(())
}
