//! Reduce: merge all partial results of a route into its final statistics.
//!
//! 1. Distance, elevation gain and time are summed.
//! 2. Average speed is the unweighted mean of the partial average speeds.
//! 3. Segment entries are merged by [`SegmentKey`](crate::SegmentKey): unseen
//!    keys are appended as-is, repeated keys only add their time.
//!
//! Floating-point addition is not associative, so partials are folded in
//! chunk-index order regardless of the order they were passed in. The result
//! is therefore bit-identical for every permutation of the input.

use crate::error::{Result, TrackError};
use crate::segments::SegmentTimes;
use crate::{ActivityStats, PartialResult, RouteId};

/// Reduce the partial results of `route_id` into one [`ActivityStats`].
///
/// Fails with [`TrackError::EmptyReduction`] if `partials` is empty, and with
/// [`TrackError::InvalidRoute`] if any partial belongs to another route or a
/// chunk index is reported twice.
pub fn reduce(route_id: RouteId, partials: &[PartialResult]) -> Result<ActivityStats> {
    if partials.is_empty() {
        return Err(TrackError::EmptyReduction { route_id });
    }
    if let Some(stray) = partials.iter().find(|p| p.route_id != route_id) {
        return Err(TrackError::InvalidRoute {
            message: format!(
                "partial for route {} passed to reduction of route {}",
                stray.route_id, route_id
            ),
        });
    }

    let mut ordered: Vec<&PartialResult> = partials.iter().collect();
    ordered.sort_by_key(|p| p.chunk_index);
    if ordered.windows(2).any(|w| w[0].chunk_index == w[1].chunk_index) {
        return Err(TrackError::InvalidRoute {
            message: format!("route {} has duplicate chunk results", route_id),
        });
    }

    let mut distance = 0.0;
    let mut elevation_gain = 0.0;
    let mut time = 0.0;
    let mut speed_sum = 0.0;
    let mut segments = SegmentTimes::new();

    for partial in &ordered {
        let stats = &partial.stats;
        distance += stats.distance;
        elevation_gain += stats.elevation_gain;
        time += stats.time;
        speed_sum += stats.average_speed;

        for segment in &stats.segments {
            segments.merge(segment);
        }
    }

    Ok(ActivityStats {
        route_id,
        distance,
        average_speed: speed_sum / ordered.len() as f64,
        elevation_gain,
        time,
        segments: segments.into_stats(),
    })
}
