//! # Track Master
//!
//! Networked runtime for [`trackreduce`]: a coordinator that accepts GPS track
//! submissions from clients, splits each route into chunks, farms the chunks
//! out round-robin to connected workers, and reduces their partial results
//! into route, per-user and all-users statistics.
//!
//! Components:
//! - [`master`] - client and worker listeners, result delivery
//! - [`dispatcher`] - pending-route queue consumer, chunk assignment
//! - [`worker`] - Map runtime connected to the coordinator
//! - [`client`] - track submission and result collection
//!
//! All peers speak newline-delimited JSON over TCP ([`protocol`]).

pub mod error;
pub use error::{MasterError, Result};

pub mod config;
pub use config::{ClientConfig, FailurePolicy, MasterConfig, WorkerConfig, WorkerLossPolicy};

pub mod protocol;

// Shared coordinator state, each behind its own lock
pub mod accumulator;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod users;

pub mod dispatcher;
pub use dispatcher::WorkDispatcher;

pub mod master;
pub use master::{Coordinator, Master, RunningMaster};

pub mod worker;

pub mod client;
pub use client::{list_tracks, RouteReport, TrackClient};
