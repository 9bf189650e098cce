//! Map: per-chunk statistics.
//!
//! Pure functions over a chunk and a [`PairCalculator`]; no shared state, so
//! independent chunks can be mapped concurrently.

use crate::calculator::PairCalculator;
use crate::segments::SegmentTimes;
use crate::{ActivityStats, Chunk, PartialResult};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Compute the partial statistics of one chunk.
///
/// Sums the increments of every consecutive waypoint pair. Average speed is
/// distance over time in hours, or 0 when no time elapsed. A chunk with
/// fewer than two waypoints yields all-zero statistics.
pub fn map_chunk<C: PairCalculator + ?Sized>(chunk: &Chunk, calculator: &C) -> PartialResult {
    let mut distance = 0.0;
    let mut elevation_gain = 0.0;
    let mut time = 0.0;
    let mut segments = SegmentTimes::new();

    for pair in chunk.waypoints.windows(2) {
        let delta = calculator.calculate_pair(&pair[0], &pair[1]);
        distance += delta.distance;
        elevation_gain += delta.elevation_gain;
        time += delta.time;
        if let Some(key) = &delta.segment {
            segments.add(key, delta.time);
        }
    }

    let average_speed = if time > 0.0 {
        distance / (time / SECONDS_PER_HOUR)
    } else {
        0.0
    };

    PartialResult {
        client_id: chunk.client_id,
        route_id: chunk.route_id,
        chunk_index: chunk.index,
        stats: ActivityStats {
            route_id: chunk.route_id,
            distance,
            average_speed,
            elevation_gain,
            time,
            segments: segments.into_stats(),
        },
    }
}

/// Map a batch of chunks sequentially.
pub fn map_chunks<C: PairCalculator + ?Sized>(chunks: &[Chunk], calculator: &C) -> Vec<PartialResult> {
    chunks.iter().map(|c| map_chunk(c, calculator)).collect()
}

/// Map a batch of chunks in parallel.
#[cfg(feature = "parallel")]
pub fn map_chunks_parallel<C: PairCalculator + ?Sized>(
    chunks: &[Chunk],
    calculator: &C,
) -> Vec<PartialResult> {
    use rayon::prelude::*;

    chunks.par_iter().map(|c| map_chunk(c, calculator)).collect()
}
