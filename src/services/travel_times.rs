//! Expected travel times along a block.
//!
//! Walks stop-path segment traversal times (plus stop dwell times) between
//! two positions on the same block. Partial segments contribute
//! proportionally to the distance covered.

use crate::types::{Block, SpatialMatch, StopPath};

/// Linearized position for ordering comparisons.
fn position(m: &SpatialMatch) -> (usize, usize, usize, f64) {
    (
        m.trip_index,
        m.stop_path_index,
        m.segment_index,
        m.distance_along_segment_m,
    )
}

fn positions_ordered(from: &SpatialMatch, to: &SpatialMatch) -> bool {
    let (ft, fp, fs, fa) = position(from);
    let (tt, tp, ts, ta) = position(to);
    (tt, tp, ts) > (ft, fp, fs) || ((tt, tp, ts) == (ft, fp, fs) && ta > fa)
}

fn segment_time_ms(path: &StopPath, segment: usize) -> f64 {
    path.travel_times
        .segment_times_ms
        .get(segment)
        .copied()
        .unwrap_or(0) as f64
}

/// Time to cover the rest of `path` from (`segment`, `along`).
fn time_to_path_end_ms(path: &StopPath, segment: usize, along_m: f64) -> f64 {
    let mut total = remaining_fraction(path, segment, along_m) * segment_time_ms(path, segment);
    for s in segment + 1..path.segment_count() {
        total += segment_time_ms(path, s);
    }
    total
}

/// Time from the start of `path` to (`segment`, `along`).
fn time_from_path_start_ms(path: &StopPath, segment: usize, along_m: f64) -> f64 {
    let mut total = 0.0;
    for s in 0..segment.min(path.segment_count()) {
        total += segment_time_ms(path, s);
    }
    total + covered_fraction(path, segment, along_m) * segment_time_ms(path, segment)
}

fn covered_fraction(path: &StopPath, segment: usize, along_m: f64) -> f64 {
    let len = path.segment_length_m(segment);
    if len <= f64::EPSILON {
        1.0
    } else {
        (along_m / len).clamp(0.0, 1.0)
    }
}

fn remaining_fraction(path: &StopPath, segment: usize, along_m: f64) -> f64 {
    1.0 - covered_fraction(path, segment, along_m)
}

/// The stop path following (`trip_index`, `stop_path_index`) in block
/// order, crossing into the next trip when the current one ends.
pub fn next_stop_path(
    block: &Block,
    trip_index: usize,
    stop_path_index: usize,
) -> Option<(usize, usize)> {
    let trip = block.trip(trip_index)?;
    if stop_path_index + 1 < trip.stop_paths.len() {
        Some((trip_index, stop_path_index + 1))
    } else if trip_index + 1 < block.trips.len() {
        Some((trip_index + 1, 0))
    } else {
        None
    }
}

/// Expected travel time from `from` to `to` along the block, including
/// dwell at every stop passed on the way. Positions at or behind `from`
/// cost zero (small backward moves absorb GPS jitter).
pub fn expected_travel_ms(block: &Block, from: &SpatialMatch, to: &SpatialMatch) -> i64 {
    if !positions_ordered(from, to) {
        return 0;
    }

    let Some(from_path) = block
        .trip(from.trip_index)
        .and_then(|t| t.stop_path(from.stop_path_index))
    else {
        return 0;
    };
    let Some(to_path) = block
        .trip(to.trip_index)
        .and_then(|t| t.stop_path(to.stop_path_index))
    else {
        return 0;
    };

    if (from.trip_index, from.stop_path_index) == (to.trip_index, to.stop_path_index) {
        let total = time_from_path_start_ms(to_path, to.segment_index, to.distance_along_segment_m)
            - time_from_path_start_ms(from_path, from.segment_index, from.distance_along_segment_m);
        return total.max(0.0).round() as i64;
    }

    let mut total = time_to_path_end_ms(from_path, from.segment_index, from.distance_along_segment_m)
        + from_path.travel_times.stop_dwell_ms as f64;

    let mut cursor = next_stop_path(block, from.trip_index, from.stop_path_index);
    while let Some((trip_i, path_i)) = cursor {
        if (trip_i, path_i) == (to.trip_index, to.stop_path_index) {
            break;
        }
        let Some(path) = block.trip(trip_i).and_then(|t| t.stop_path(path_i)) else {
            break;
        };
        total += path.travel_times.total_travel_ms() as f64 + path.travel_times.stop_dwell_ms as f64;
        cursor = next_stop_path(block, trip_i, path_i);
    }

    total += time_from_path_start_ms(to_path, to.segment_index, to.distance_along_segment_m);
    total.round() as i64
}

/// Expected travel time from `from` to the stop terminating stop path
/// (`trip_index`, `stop_path_index`). Dwell at the target stop itself is
/// not included; callers add it when the scheduled time is a departure.
pub fn travel_to_stop_ms(
    block: &Block,
    from: &SpatialMatch,
    trip_index: usize,
    stop_path_index: usize,
) -> i64 {
    if (trip_index, stop_path_index) < (from.trip_index, from.stop_path_index) {
        return 0;
    }

    let Some(from_path) = block
        .trip(from.trip_index)
        .and_then(|t| t.stop_path(from.stop_path_index))
    else {
        return 0;
    };

    let mut total =
        time_to_path_end_ms(from_path, from.segment_index, from.distance_along_segment_m);
    if (from.trip_index, from.stop_path_index) == (trip_index, stop_path_index) {
        return total.round() as i64;
    }
    total += from_path.travel_times.stop_dwell_ms as f64;

    let mut cursor = next_stop_path(block, from.trip_index, from.stop_path_index);
    while let Some((trip_i, path_i)) = cursor {
        let Some(path) = block.trip(trip_i).and_then(|t| t.stop_path(path_i)) else {
            break;
        };
        total += path.travel_times.total_travel_ms() as f64;
        if (trip_i, path_i) == (trip_index, stop_path_index) {
            break;
        }
        total += path.travel_times.stop_dwell_ms as f64;
        cursor = next_stop_path(block, trip_i, path_i);
    }

    total.round() as i64
}
