//! Per-user running totals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::ActivityStats;

/// Totals for one user, folded from every completed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistics {
    pub user: String,
    /// Total distance in kilometers
    pub total_distance: f64,
    /// Total elevation gain in meters
    pub total_elevation: f64,
    /// Total activity time in seconds
    pub total_time: f64,
    pub routes_recorded: u32,
}

impl UserStatistics {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            total_distance: 0.0,
            total_elevation: 0.0,
            total_time: 0.0,
            routes_recorded: 0,
        }
    }

    /// Fold one completed route into the totals.
    pub fn register_route(&mut self, stats: &ActivityStats) {
        self.total_distance += stats.distance;
        self.total_elevation += stats.elevation_gain;
        self.total_time += stats.time;
        self.routes_recorded += 1;
    }

    pub fn average_distance(&self) -> Result<f64> {
        self.per_route(self.total_distance)
    }

    pub fn average_elevation(&self) -> Result<f64> {
        self.per_route(self.total_elevation)
    }

    pub fn average_time(&self) -> Result<f64> {
        self.per_route(self.total_time)
    }

    fn per_route(&self, total: f64) -> Result<f64> {
        if self.routes_recorded == 0 {
            return Err(TrackError::NoRoutesRecorded {
                user: self.user.clone(),
            });
        }
        Ok(total / f64::from(self.routes_recorded))
    }
}

impl fmt::Display for UserStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} routes, {:.3} km, {:.1} m gain, {:.0} s",
            self.user,
            self.routes_recorded,
            self.total_distance,
            self.total_elevation,
            self.total_time
        )
    }
}

/// Snapshot across every known user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatistics {
    pub user_count: u32,
    pub routes_recorded: u32,
    pub total_distance: f64,
    pub total_elevation: f64,
    pub total_time: f64,
    /// Mean per-user totals (0 when there are no users)
    pub average_distance_per_user: f64,
    pub average_elevation_per_user: f64,
    pub average_time_per_user: f64,
}

impl AggregateStatistics {
    pub fn from_users<'a>(users: impl IntoIterator<Item = &'a UserStatistics>) -> Self {
        let mut aggregate = AggregateStatistics::default();
        for user in users {
            aggregate.user_count += 1;
            aggregate.routes_recorded += user.routes_recorded;
            aggregate.total_distance += user.total_distance;
            aggregate.total_elevation += user.total_elevation;
            aggregate.total_time += user.total_time;
        }
        if aggregate.user_count > 0 {
            let n = f64::from(aggregate.user_count);
            aggregate.average_distance_per_user = aggregate.total_distance / n;
            aggregate.average_elevation_per_user = aggregate.total_elevation / n;
            aggregate.average_time_per_user = aggregate.total_time / n;
        }
        aggregate
    }
}

impl fmt::Display for AggregateStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "All users ({}): {} routes, {:.3} km avg per user, {:.1} m avg gain, {:.0} s avg time",
            self.user_count,
            self.routes_recorded,
            self.average_distance_per_user,
            self.average_elevation_per_user,
            self.average_time_per_user
        )
    }
}
