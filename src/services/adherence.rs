//! Real-time schedule adherence.
//!
//! Two related measures:
//! - `generate`: the adherence used for predictions and the sanity check,
//!   anchored to the next scheduled stop (with wait-stop semantics).
//! - `generate_effective_schedule_difference`: how far the fix time sits
//!   from the scheduled time of the vehicle's interpolated position;
//!   defined for every matched vehicle.

use crate::config::MatchingConfig;
use crate::schedule::ScheduleIndex;
use crate::services::travel_times;
use crate::types::{
    resolve_epoch_ms, AdherenceLimits, Block, SpatialMatch, TemporalDifference, Trip,
    VehicleAtStopInfo, VehicleState,
};

/// Current adherence for a predictable vehicle; `None` when the vehicle is
/// not predictable or no upcoming stop carries a scheduled time.
pub fn generate(state: &VehicleState, schedule: &ScheduleIndex) -> Option<TemporalDifference> {
    if !state.predictable {
        return None;
    }
    let m = state.current_match.as_ref()?;
    let report = state.last_report.as_ref()?;
    let block = schedule.block(state.block_id.as_deref()?)?;

    adherence_for_position(report.time, block, &m.spatial, m.at_stop.as_ref())
}

/// Adherence of an arbitrary matched position. Also used to score
/// compare-to-schedule candidates.
pub fn adherence_for_position(
    report_time_ms: i64,
    block: &Block,
    spatial: &SpatialMatch,
    at_stop: Option<&VehicleAtStopInfo>,
) -> Option<TemporalDifference> {
    // At a stop with a scheduled departure: compare directly.
    if let Some(info) = at_stop {
        if let Some(departure_sec) = info.scheduled_time.as_ref().and_then(|t| t.departure_sec) {
            let departure_ms = resolve_epoch_ms(departure_sec, report_time_ms);
            if info.is_wait_stop && report_time_ms < departure_ms {
                // Holding for the scheduled departure: on time by
                // construction.
                return Some(TemporalDifference::zero());
            }
            return Some(TemporalDifference::new(departure_ms - report_time_ms));
        }
    }

    // Otherwise project travel to the next stop with a scheduled time.
    let (trip_index, stop_path_index, schedule_time) =
        next_scheduled_stop(block, spatial.trip_index, spatial.stop_path_index)?;

    let mut expected_ms =
        travel_times::travel_to_stop_ms(block, spatial, trip_index, stop_path_index);

    let target_sec = match schedule_time.arrival_sec {
        Some(arrival) => arrival,
        None => {
            // Departure target: the vehicle also has to sit out the dwell.
            let dwell = block
                .trip(trip_index)
                .and_then(|t| t.stop_path(stop_path_index))
                .map(|p| p.travel_times.stop_dwell_ms)
                .unwrap_or(0);
            expected_ms += dwell as i64;
            schedule_time.departure_sec?
        }
    };

    let target_epoch = resolve_epoch_ms(target_sec, report_time_ms);
    Some(TemporalDifference::new(
        target_epoch - (report_time_ms + expected_ms),
    ))
}

/// First stop at or after the given position whose stop carries a
/// scheduled time.
fn next_scheduled_stop(
    block: &Block,
    trip_index: usize,
    stop_path_index: usize,
) -> Option<(usize, usize, crate::types::ScheduleTime)> {
    let mut cursor = Some((trip_index, stop_path_index));
    while let Some((trip_i, path_i)) = cursor {
        let path = block.trip(trip_i)?.stop_path(path_i)?;
        if let Some(st) = path.schedule_time {
            if st.is_timepoint() {
                return Some((trip_i, path_i, st));
            }
        }
        cursor = travel_times::next_stop_path(block, trip_i, path_i);
    }
    None
}

/// Effective schedule difference: fix time minus the scheduled time of the
/// vehicle's position, interpolated along the trip. Defined for every
/// matched vehicle.
pub fn generate_effective_schedule_difference(
    state: &VehicleState,
    schedule: &ScheduleIndex,
) -> Option<TemporalDifference> {
    let m = state.current_match.as_ref()?;
    let report = state.last_report.as_ref()?;
    let block = schedule.block(state.block_id.as_deref()?)?;
    let trip = block.trip(m.spatial.trip_index)?;

    Some(effective_difference_for(report.time, trip, &m.spatial))
}

/// The three-case effective difference for one matched position.
pub fn effective_difference_for(
    report_time_ms: i64,
    trip: &Trip,
    spatial: &SpatialMatch,
) -> TemporalDifference {
    // Before the trip start or at the first stop: measured against the
    // trip's first scheduled time.
    if spatial.stop_path_index == 0 {
        let start_sec = trip
            .schedule_time(0)
            .and_then(|t| t.time_sec())
            .unwrap_or(trip.start_time_sec);
        return TemporalDifference::new(report_time_ms - resolve_epoch_ms(start_sec, report_time_ms));
    }

    let path_index = spatial.stop_path_index;
    let along_path = spatial.distance_along_stop_path_m(trip);
    let path_len = trip
        .stop_path(path_index)
        .map(|p| p.length_m())
        .unwrap_or(0.0);

    // At (the end of) a scheduled stop: compare directly.
    if along_path >= path_len {
        if let Some(sec) = trip.schedule_time(path_index).and_then(|t| t.time_sec()) {
            return TemporalDifference::new(report_time_ms - resolve_epoch_ms(sec, report_time_ms));
        }
    }

    // Between stops: interpolate the scheduled time linearly by distance
    // between the bounding timepoints.
    let cur_dist = spatial.distance_along_trip_m(trip);
    let (prev_dist, prev_sec) = previous_timepoint(trip, path_index);
    let (next_dist, next_sec) = upcoming_timepoint(trip, path_index);

    let effective_sec = if next_dist > prev_dist {
        let ratio = ((cur_dist - prev_dist) / (next_dist - prev_dist)).clamp(0.0, 1.0);
        prev_sec as f64 + (next_sec as f64 - prev_sec as f64) * ratio
    } else {
        prev_sec as f64
    };

    TemporalDifference::new(
        report_time_ms - resolve_epoch_ms(effective_sec.round() as u32, report_time_ms),
    )
}

/// Nearest timepoint strictly before `path_index`, as (distance along
/// trip, seconds of day). Falls back to the trip start.
fn previous_timepoint(trip: &Trip, path_index: usize) -> (f64, u32) {
    for i in (0..path_index).rev() {
        if let Some(sec) = trip
            .schedule_time(i)
            .and_then(|t| t.departure_sec.or(t.arrival_sec))
        {
            return (trip.distance_to_stop_path_m(i + 1), sec);
        }
    }
    (0.0, trip.start_time_sec)
}

/// Nearest timepoint at or after `path_index`, as (distance along trip,
/// seconds of day). Falls back to the trip end.
fn upcoming_timepoint(trip: &Trip, path_index: usize) -> (f64, u32) {
    for i in path_index..trip.stop_paths.len() {
        if let Some(sec) = trip
            .schedule_time(i)
            .and_then(|t| t.arrival_sec.or(t.departure_sec))
        {
            return (trip.distance_to_stop_path_m(i + 1), sec);
        }
    }
    (trip.length_m(), trip.end_time_sec)
}

/// Sanity bounds for this vehicle. Schedule-based placeholders get
/// proportionally wider bounds.
pub fn adherence_limits(state: &VehicleState, cfg: &MatchingConfig) -> AdherenceLimits {
    let factor = if state.is_sched_based {
        cfg.sched_based_bounds_factor
    } else {
        1.0
    };
    AdherenceLimits {
        max_early_ms: (cfg.max_schedule_adherence_early_ms as f64 * factor) as i64,
        max_late_ms: (cfg.max_schedule_adherence_late_ms as f64 * factor) as i64,
    }
}
