//! # Track Reduce
//!
//! Chunked map/reduce statistics for GPS tracks.
//!
//! This library provides:
//! - Splitting a route into boundary-overlapping chunks for parallel work
//! - Map: per-chunk distance, elevation, time and segment statistics
//! - Reduce: order-independent merge of partial results into a route result
//! - Per-user running totals folded from completed routes
//!
//! ## Features
//!
//! - **`parallel`** - Enable batch Map over many chunks with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use trackreduce::{chunk_size, map_chunk, reduce, split_route};
//! use trackreduce::{ClientId, HaversineCalculator, Route, RouteId, Waypoint};
//!
//! let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let waypoints: Vec<Waypoint> = (0..5)
//!     .map(|i| Waypoint::new(51.5 + i as f64 * 0.001, -0.12, 10.0, start + chrono::Duration::seconds(i * 30)))
//!     .collect();
//!
//! let route = Route::new(RouteId(1), ClientId(1), "alice", waypoints).unwrap();
//! let n = chunk_size(route.waypoints.len(), 2).unwrap();
//! let chunks = split_route(&route, n).unwrap();
//!
//! let calculator = HaversineCalculator::default();
//! let partials: Vec<_> = chunks.iter().map(|c| map_chunk(c, &calculator)).collect();
//! let stats = reduce(route.id, &partials).unwrap();
//! assert!(stats.distance > 0.0);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackError};

// Segment identity and merge-by-key accumulation
pub mod segments;
pub use segments::{SegmentKey, SegmentStats, SegmentTimes};

// Pairwise physical calculation (distance, elevation, time, segment match)
pub mod calculator;
pub use calculator::{HaversineCalculator, PairCalculator, PairDelta, Segment};

// Track file parsing
pub mod parser;
pub use parser::{JsonTrackParser, ParsedTrack, TrackParser};

// Chunk-size policy and boundary-overlapping splitter
pub mod chunking;
pub use chunking::{chunk_size, expected_chunk_count, split_route, ChunkSplitter};

// Per-chunk statistics
pub mod map;
#[cfg(feature = "parallel")]
pub use map::map_chunks_parallel;
pub use map::{map_chunk, map_chunks};

// Per-route merge of partial statistics
pub mod reduce;
pub use reduce::reduce;

// Per-user running totals
pub mod user_stats;
pub use user_stats::{AggregateStatistics, UserStatistics};

/// Minimum number of waypoints a route needs to yield at least one pair.
pub const MIN_ROUTE_POINTS: usize = 2;

// ============================================================================
// Identifiers
// ============================================================================

/// Process-unique identifier of a submitted route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the client connection that submitted a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One GPS sample of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: f64,
    pub timestamp: DateTime<Utc>,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64, elevation: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
            timestamp,
        }
    }

    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// One submitted track, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub client_id: ClientId,
    /// User the track belongs to (from the track file)
    pub user: String,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    /// Create a route, rejecting tracks too short to contain a waypoint pair.
    pub fn new(
        id: RouteId,
        client_id: ClientId,
        user: impl Into<String>,
        waypoints: Vec<Waypoint>,
    ) -> Result<Self> {
        if waypoints.len() < MIN_ROUTE_POINTS {
            return Err(TrackError::InsufficientPoints {
                route_id: id,
                point_count: waypoints.len(),
                minimum_required: MIN_ROUTE_POINTS,
            });
        }
        Ok(Self {
            id,
            client_id,
            user: user.into(),
            waypoints,
        })
    }
}

/// A contiguous sub-sequence of a route's waypoints, the unit of work for one worker.
///
/// The first waypoint of every chunk except the first repeats the last
/// waypoint of the preceding chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub route_id: RouteId,
    pub client_id: ClientId,
    /// Position of this chunk within its route (0-based)
    pub index: u32,
    pub waypoints: Vec<Waypoint>,
}

/// Statistics for a chunk (partial) or a whole route (final).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub route_id: RouteId,
    /// Distance in kilometers
    pub distance: f64,
    /// Average speed in km/h
    pub average_speed: f64,
    /// Elevation gain in meters
    pub elevation_gain: f64,
    /// Elapsed time in seconds
    pub time: f64,
    /// Time spent on each matched segment, ordered by segment key
    pub segments: Vec<SegmentStats>,
}

impl fmt::Display for ActivityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Route {}: {:.3} km, {:.2} km/h avg, {:.1} m gain, {:.0} s",
            self.route_id, self.distance, self.average_speed, self.elevation_gain, self.time
        )?;
        for segment in &self.segments {
            write!(f, "\n  segment {}: {:.0} s", segment.key, segment.time)?;
        }
        Ok(())
    }
}

/// Map output: one chunk's statistics tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    pub client_id: ClientId,
    pub route_id: RouteId,
    pub chunk_index: u32,
    pub stats: ActivityStats,
}
