//! Unified error handling for the trackreduce library.
//!
//! Every fallible operation in the crate (parsing, chunking, reduction,
//! statistics queries) reports through [`TrackError`].

use std::fmt;

use crate::RouteId;

/// Unified error type for trackreduce operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackError {
    /// Route has too few waypoints to produce any statistics
    InsufficientPoints {
        route_id: RouteId,
        point_count: usize,
        minimum_required: usize,
    },
    /// Route content is structurally unusable (e.g. mixed routes in one reduction)
    InvalidRoute { message: String },
    /// Dispatch parameters cannot produce a chunk plan (e.g. zero workers)
    InvalidConfiguration { message: String },
    /// Track file could not be parsed
    MalformedInput { message: String },
    /// Reduce was called without any partial results
    EmptyReduction { route_id: RouteId },
    /// Averages requested for a user with no registered routes
    NoRoutesRecorded { user: String },
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::InsufficientPoints {
                route_id,
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Route {} has {} waypoints, minimum {} required",
                    route_id, point_count, minimum_required
                )
            }
            TrackError::InvalidRoute { message } => {
                write!(f, "Invalid route: {}", message)
            }
            TrackError::InvalidConfiguration { message } => {
                write!(f, "Invalid configuration: {}", message)
            }
            TrackError::MalformedInput { message } => {
                write!(f, "Malformed track file: {}", message)
            }
            TrackError::EmptyReduction { route_id } => {
                write!(f, "Route {} reduced with no partial results", route_id)
            }
            TrackError::NoRoutesRecorded { user } => {
                write!(f, "No routes recorded for user '{}'", user)
            }
        }
    }
}

impl std::error::Error for TrackError {}

/// Result type alias for trackreduce operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a malformed-input error.
    fn ok_or_malformed(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_malformed(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::MalformedInput {
            message: message.to_string(),
        })
    }
}
