//! Track file parsing.
//!
//! Tracks arrive as JSON documents:
//!
//! ```json
//! {
//!   "user": "alice",
//!   "waypoints": [
//!     { "lat": 51.5, "lon": -0.12, "ele": 10.0, "time": "2024-05-01T08:00:00Z" }
//!   ]
//! }
//! ```
//!
//! Elevation is optional and defaults to 0.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::calculator::Segment;
use crate::error::{OptionExt, Result, TrackError};
use crate::segments::SegmentKey;
use crate::{GpsPoint, Waypoint};

/// Output of parsing one track file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrack {
    pub user: String,
    pub waypoints: Vec<Waypoint>,
}

impl ParsedTrack {
    /// Treat the track as a segment definition.
    pub fn into_segment(self, key: impl Into<SegmentKey>) -> Segment {
        Segment::new(key, self.waypoints.iter().map(Waypoint::position).collect())
    }
}

/// Turns raw track file contents into a user and ordered waypoints.
pub trait TrackParser: Send + Sync {
    fn parse(&self, contents: &str) -> Result<ParsedTrack>;
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    user: String,
    waypoints: Vec<RawWaypoint>,
}

#[derive(Debug, Deserialize)]
struct RawWaypoint {
    lat: f64,
    lon: f64,
    #[serde(default)]
    ele: f64,
    time: DateTime<Utc>,
}

/// Parser for the JSON track format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTrackParser;

impl TrackParser for JsonTrackParser {
    fn parse(&self, contents: &str) -> Result<ParsedTrack> {
        let raw: RawTrack =
            serde_json::from_str(contents).map_err(|e| TrackError::MalformedInput {
                message: e.to_string(),
            })?;

        let user = Some(raw.user.trim())
            .filter(|u| !u.is_empty())
            .ok_or_malformed("track has no user")?;

        let mut waypoints = Vec::with_capacity(raw.waypoints.len());
        for (i, wp) in raw.waypoints.into_iter().enumerate() {
            if !GpsPoint::new(wp.lat, wp.lon).is_valid() || !wp.ele.is_finite() {
                return Err(TrackError::MalformedInput {
                    message: format!("waypoint {} has invalid coordinates", i),
                });
            }
            waypoints.push(Waypoint::new(wp.lat, wp.lon, wp.ele, wp.time));
        }

        Ok(ParsedTrack {
            user: user.to_string(),
            waypoints,
        })
    }
}
