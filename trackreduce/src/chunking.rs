//! Chunk-size policy and the boundary-overlapping route splitter.
//!
//! ## Chunk size
//!
//! ```text
//! n = waypoints / workers   if waypoints >= workers
//! n = workers / waypoints   otherwise
//! n = max(n, 1)
//! ```
//!
//! ## Splitting
//!
//! Waypoints are walked in order into a growing buffer. The buffer is closed
//! as a chunk once `n` waypoints have been added to it since the last close
//! (and it holds at least two waypoints), or when the last waypoint is reached.
//! The next buffer is seeded with the last waypoint of the closed chunk, so no
//! pair delta is lost at a seam. For 5 waypoints and `n = 2`:
//!
//! ```text
//! [w0, w1]  [w1, w2, w3]  [w3, w4]
//! ```

use crate::error::{Result, TrackError};
use crate::{Chunk, Route, MIN_ROUTE_POINTS};

/// Number of waypoints per chunk for a route of `waypoint_count` points
/// spread over `worker_count` workers.
pub fn chunk_size(waypoint_count: usize, worker_count: usize) -> Result<usize> {
    if worker_count == 0 {
        return Err(TrackError::InvalidConfiguration {
            message: "cannot size chunks for zero workers".to_string(),
        });
    }
    if waypoint_count == 0 {
        return Err(TrackError::InvalidRoute {
            message: "cannot size chunks for a route with zero waypoints".to_string(),
        });
    }

    let n = if waypoint_count >= worker_count {
        waypoint_count / worker_count
    } else {
        worker_count / waypoint_count
    };
    Ok(n.max(1))
}

/// Number of chunks [`split_route`] produces for `waypoint_count` points and chunk size `n`.
pub fn expected_chunk_count(waypoint_count: usize, n: usize) -> usize {
    if waypoint_count < MIN_ROUTE_POINTS || n == 0 {
        return 0;
    }
    if n == 1 {
        // Every chunk is a single pair.
        waypoint_count - 1
    } else {
        waypoint_count.div_ceil(n)
    }
}

/// Lazily yields the chunks of a route in waypoint order.
pub struct ChunkSplitter<'a> {
    route: &'a Route,
    size: usize,
    cursor: usize,
    index: u32,
}

impl<'a> ChunkSplitter<'a> {
    /// Create a splitter. `size` must be non-zero and the route must hold at
    /// least two waypoints; [`split_route`] checks both.
    pub fn new(route: &'a Route, size: usize) -> Self {
        Self {
            route,
            size,
            cursor: 0,
            index: 0,
        }
    }
}

impl Iterator for ChunkSplitter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let waypoints = &self.route.waypoints;
        if self.cursor >= waypoints.len() || self.size == 0 {
            return None;
        }

        let last = waypoints.len() - 1;
        let mut buffer = Vec::with_capacity(self.size + 1);
        if self.index > 0 {
            // Overlap point: last waypoint of the previous chunk
            buffer.push(waypoints[self.cursor - 1].clone());
        }

        let mut added = 0;
        while self.cursor < waypoints.len() {
            let i = self.cursor;
            buffer.push(waypoints[i].clone());
            added += 1;
            self.cursor += 1;

            let full = added >= self.size && buffer.len() >= MIN_ROUTE_POINTS;
            if full || i == last {
                break;
            }
        }

        let chunk = Chunk {
            route_id: self.route.id,
            client_id: self.route.client_id,
            index: self.index,
            waypoints: buffer,
        };
        self.index += 1;
        Some(chunk)
    }
}

/// Split a route into chunks of size `n` (see module docs).
pub fn split_route(route: &Route, n: usize) -> Result<Vec<Chunk>> {
    if n == 0 {
        return Err(TrackError::InvalidConfiguration {
            message: "chunk size must be at least 1 waypoint".to_string(),
        });
    }
    if route.waypoints.len() < MIN_ROUTE_POINTS {
        return Err(TrackError::InsufficientPoints {
            route_id: route.id,
            point_count: route.waypoints.len(),
            minimum_required: MIN_ROUTE_POINTS,
        });
    }

    let chunks: Vec<Chunk> = ChunkSplitter::new(route, n).collect();
    log::debug!(
        "[Chunking] Route {}: {} waypoints -> {} chunks of size {}",
        route.id,
        route.waypoints.len(),
        chunks.len(),
        n
    );
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::route;

    fn positions(chunk: &Chunk, route: &Route) -> Vec<usize> {
        chunk
            .waypoints
            .iter()
            .map(|w| route.waypoints.iter().position(|r| r == w).unwrap())
            .collect()
    }

    #[test]
    fn test_chunk_size_policy() {
        assert_eq!(chunk_size(5, 2).unwrap(), 2);
        assert_eq!(chunk_size(100, 3).unwrap(), 33);
        assert_eq!(chunk_size(4, 4).unwrap(), 1);
        // More workers than waypoints
        assert_eq!(chunk_size(3, 5).unwrap(), 1);
        assert_eq!(chunk_size(2, 7).unwrap(), 3);
    }

    #[test]
    fn test_chunk_size_rejects_degenerate_input() {
        assert!(matches!(
            chunk_size(10, 0),
            Err(TrackError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            chunk_size(0, 3),
            Err(TrackError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn test_five_waypoints_two_workers() {
        let route = route(5);
        let n = chunk_size(5, 2).unwrap();
        let chunks = split_route(&route, n).unwrap();

        let traced: Vec<Vec<usize>> = chunks.iter().map(|c| positions(c, &route)).collect();
        assert_eq!(traced, vec![vec![0, 1], vec![1, 2, 3], vec![3, 4]]);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_size_one_yields_pairs() {
        let route = route(4);
        let chunks = split_route(&route, 1).unwrap();
        let traced: Vec<Vec<usize>> = chunks.iter().map(|c| positions(c, &route)).collect();
        assert_eq!(traced, vec![vec![0, 1], vec![1, 2], vec![2, 3]]);
    }

    #[test]
    fn test_oversized_chunk_is_whole_route() {
        let route = route(3);
        let chunks = split_route(&route, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].waypoints, route.waypoints);
    }

    #[test]
    fn test_split_rejects_zero_size() {
        assert!(split_route(&route(3), 0).is_err());
    }

    #[test]
    fn test_boundary_invariants_across_sizes() {
        for w in 2..40 {
            let route = route(w);
            for k in 1..10 {
                let n = chunk_size(w, k).unwrap();
                let chunks = split_route(&route, n).unwrap();
                assert_eq!(chunks.len(), expected_chunk_count(w, n), "w={} k={}", w, k);

                let mut seen = vec![0usize; w];
                for chunk in &chunks {
                    assert!(chunk.waypoints.len() >= 2, "w={} k={}", w, k);
                    let idx = positions(chunk, &route);
                    // contiguous and ordered
                    assert!(idx.windows(2).all(|p| p[1] == p[0] + 1));
                    for i in idx {
                        seen[i] += 1;
                    }
                }

                // Seams: last of chunk i == first of chunk i+1
                let mut boundaries = Vec::new();
                for pair in chunks.windows(2) {
                    let end = positions(&pair[0], &route).last().copied().unwrap();
                    let start = positions(&pair[1], &route)[0];
                    assert_eq!(end, start);
                    boundaries.push(end);
                }
                for (i, count) in seen.iter().enumerate() {
                    let expected = if boundaries.contains(&i) { 2 } else { 1 };
                    assert_eq!(*count, expected, "w={} k={} waypoint {}", w, k, i);
                }
            }
        }
    }
}
