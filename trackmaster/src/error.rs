//! Error types for the coordinator, worker and client runtimes.

use std::time::Duration;

use thiserror::Error;
use trackreduce::{RouteId, TrackError};

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to {peer} failed: {message}")]
    Connection { peer: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No worker available after waiting {waited:?}")]
    WorkerUnavailable { waited: Duration },

    #[error("Route {route_id} abandoned: {reason}")]
    RouteAbandoned { route_id: RouteId, reason: String },

    #[error("Track rejected: {0}")]
    Rejected(String),

    #[error("{failed} of {total} track submissions failed")]
    SubmissionsFailed { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, MasterError>;
