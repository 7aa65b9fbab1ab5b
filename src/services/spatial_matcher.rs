//! Spatial matching of AVL fixes to block geometry.
//!
//! Produces every plausible `SpatialMatch` for a fix; temporal
//! disambiguation is the temporal matcher's job. Never fails: an
//! implausible fix simply yields no candidates.

use crate::config::MatchingConfig;
use crate::services::geo::{bearing_deg, heading_delta_deg, project_onto_segment};
use crate::types::{AvlReport, Block, SpatialMatch, StopPath};

/// Candidate positions for a vehicle without a current match: an
/// unconstrained walk over the supplied trips of the block.
pub fn match_unconstrained(
    report: &AvlReport,
    block: &Block,
    trip_indices: &[usize],
    cfg: &MatchingConfig,
) -> Vec<SpatialMatch> {
    let mut matches = Vec::new();

    for &trip_index in trip_indices {
        let Some(trip) = block.trip(trip_index) else {
            continue;
        };
        for (stop_path_index, path) in trip.stop_paths.iter().enumerate() {
            for segment_index in 0..path.segment_count() {
                if let Some(m) =
                    try_segment(report, block, trip_index, stop_path_index, segment_index, path, cfg)
                {
                    matches.push(m);
                }
            }
        }
    }

    matches
}

/// Candidate positions for an already-matched vehicle: walk forward from
/// the previous match up to the configured lookahead, reaching backward
/// only by the jitter tolerance.
pub fn match_from_previous(
    report: &AvlReport,
    block: &Block,
    previous: &SpatialMatch,
    cfg: &MatchingConfig,
) -> Vec<SpatialMatch> {
    let mut matches = Vec::new();

    let Some(previous_offset) = block_offset_m(
        block,
        previous.trip_index,
        previous.stop_path_index,
        previous.segment_index,
        previous.distance_along_segment_m,
    ) else {
        return matches;
    };

    let window_start = previous_offset - cfg.backward_tolerance_m;
    let window_end = previous_offset + cfg.forward_lookahead_m;

    let mut cursor = 0.0;
    for (trip_index, trip) in block.trips.iter().enumerate() {
        for (stop_path_index, path) in trip.stop_paths.iter().enumerate() {
            for segment_index in 0..path.segment_count() {
                let seg_len = path.segment_length_m(segment_index);
                let seg_start = cursor;
                cursor += seg_len;

                if cursor < window_start {
                    continue;
                }
                if seg_start > window_end {
                    return matches;
                }

                if let Some(m) =
                    try_segment(report, block, trip_index, stop_path_index, segment_index, path, cfg)
                {
                    // The projected position itself must stay inside the
                    // walk window, not just touch the segment.
                    let offset = seg_start + m.distance_along_segment_m;
                    if offset >= window_start && offset <= window_end {
                        matches.push(m);
                    }
                }
            }
        }
    }

    matches
}

/// Arc-length offset of a position from the start of the block.
fn block_offset_m(
    block: &Block,
    trip_index: usize,
    stop_path_index: usize,
    segment_index: usize,
    along_m: f64,
) -> Option<f64> {
    let trip = block.trip(trip_index)?;
    let path = trip.stop_path(stop_path_index)?;

    let trips_before: f64 = block
        .trips
        .iter()
        .take(trip_index)
        .map(|t| t.length_m())
        .sum();

    Some(
        trips_before
            + trip.distance_to_stop_path_m(stop_path_index)
            + path.distance_to_segment_start_m(segment_index)
            + along_m,
    )
}

fn try_segment(
    report: &AvlReport,
    block: &Block,
    trip_index: usize,
    stop_path_index: usize,
    segment_index: usize,
    path: &StopPath,
    cfg: &MatchingConfig,
) -> Option<SpatialMatch> {
    let (start, end) = path.segment(segment_index)?;
    let projection = project_onto_segment(&report.location(), &start, &end);

    let radius = if path.is_layover {
        cfg.layover_match_radius_m
    } else {
        cfg.spatial_match_radius_m
    };
    if projection.distance_m > radius {
        return None;
    }

    // Heading gate: flag (not drop) candidates whose segment bearing
    // disagrees with the fix heading. Layovers are exempt, vehicles turn
    // and park there.
    let heading_mismatch = match report.valid_heading() {
        Some(heading) if !path.is_layover => {
            let segment_bearing = bearing_deg(&start, &end);
            heading_delta_deg(heading, segment_bearing) > cfg.heading_tolerance_deg
        }
        _ => false,
    };

    Some(SpatialMatch {
        vehicle_id: report.vehicle_id.clone(),
        block_id: block.id.clone(),
        trip_index,
        stop_path_index,
        segment_index,
        distance_to_segment_m: projection.distance_m,
        distance_along_segment_m: projection.along_m,
        heading_mismatch,
    })
}
