//! Pairwise physical calculation between consecutive waypoints.
//!
//! Map only needs the per-pair increments; how they are computed sits
//! behind [`PairCalculator`] so workers can swap the implementation.

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

use crate::segments::SegmentKey;
use crate::{GpsPoint, Waypoint};

/// Default radius (meters) within which a waypoint counts as on a segment.
pub const DEFAULT_SEGMENT_TOLERANCE: f64 = 25.0;

/// Increments contributed by one waypoint pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairDelta {
    /// Distance in kilometers
    pub distance: f64,
    /// Elevation gain in meters (never negative)
    pub elevation_gain: f64,
    /// Elapsed time in seconds (never negative)
    pub time: f64,
    /// Segment both waypoints lie on, if any
    pub segment: Option<SegmentKey>,
}

/// Computes the increments between two consecutive waypoints.
pub trait PairCalculator: Send + Sync {
    fn calculate_pair(&self, a: &Waypoint, b: &Waypoint) -> PairDelta;
}

/// A named trail segment described by its polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub key: SegmentKey,
    pub points: Vec<GpsPoint>,
}

impl Segment {
    pub fn new(key: impl Into<SegmentKey>, points: Vec<GpsPoint>) -> Self {
        Self {
            key: key.into(),
            points,
        }
    }

    /// Whether `point` lies within `tolerance` meters of any segment vertex.
    pub fn contains(&self, point: &GpsPoint, tolerance: f64) -> bool {
        self.points
            .iter()
            .any(|p| haversine_distance(p, point) <= tolerance)
    }
}

/// Great-circle distance between two GPS points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let a = Point::new(p1.longitude, p1.latitude);
    let b = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(a, b)
}

/// Haversine distance, positive elevation change, timestamp difference and
/// first-match segment lookup.
#[derive(Debug, Clone)]
pub struct HaversineCalculator {
    segments: Vec<Segment>,
    tolerance: f64,
}

impl Default for HaversineCalculator {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            tolerance: DEFAULT_SEGMENT_TOLERANCE,
        }
    }
}

impl HaversineCalculator {
    pub fn new(segments: Vec<Segment>, tolerance: f64) -> Self {
        Self {
            segments,
            tolerance,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn match_segment(&self, a: &GpsPoint, b: &GpsPoint) -> Option<SegmentKey> {
        self.segments
            .iter()
            .find(|s| s.contains(a, self.tolerance) && s.contains(b, self.tolerance))
            .map(|s| s.key.clone())
    }
}

impl PairCalculator for HaversineCalculator {
    fn calculate_pair(&self, a: &Waypoint, b: &Waypoint) -> PairDelta {
        let (pa, pb) = (a.position(), b.position());
        let elapsed = (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0;

        PairDelta {
            distance: haversine_distance(&pa, &pb) / 1000.0,
            elevation_gain: (b.elevation - a.elevation).max(0.0),
            time: elapsed.max(0.0),
            segment: self.match_segment(&pa, &pb),
        }
    }
}
