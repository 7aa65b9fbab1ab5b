//! Temporal disambiguation among spatial candidates.
//!
//! A spatial candidate only says "the vehicle could be here"; these
//! routines decide which candidate is consistent with how the vehicle
//! moves through time, either against its own progress (re-match) or
//! against the schedule (assignment match).

use crate::config::MatchingConfig;
use crate::services::adherence;
use crate::services::geo::haversine_distance_m;
use crate::services::travel_times;
use crate::types::{
    AvlReport, Block, SpatialMatch, TemporalDifference, TemporalMatch, VehicleAtStopInfo,
};

/// Stop context for a candidate: set when it lies within the stop radius
/// of the stop terminating its stop path.
pub fn at_stop_info(
    block: &Block,
    spatial: &SpatialMatch,
    cfg: &MatchingConfig,
) -> Option<VehicleAtStopInfo> {
    let trip = block.trip(spatial.trip_index)?;
    let path = trip.stop_path(spatial.stop_path_index)?;

    if spatial.distance_to_stop_m(trip) > cfg.stop_match_radius_m {
        return None;
    }

    Some(VehicleAtStopInfo {
        stop_id: path.stop_id.clone(),
        scheduled_time: path.schedule_time,
        is_wait_stop: path.is_wait_stop,
        at_end_of_block: spatial.is_on_last_stop_path(block),
    })
}

/// Best re-match for an already-predictable vehicle.
///
/// Scores each candidate by how far the expected travel time from the
/// previous match diverges from the really elapsed time; ties fall to the
/// spatially closer candidate.
pub fn best_temporal_match(
    previous: &SpatialMatch,
    elapsed_ms: i64,
    block: &Block,
    candidates: &[SpatialMatch],
    cfg: &MatchingConfig,
) -> Option<TemporalMatch> {
    let mut best: Option<(i64, f64, TemporalMatch)> = None;

    for candidate in candidates {
        let expected_ms = travel_times::expected_travel_ms(block, previous, candidate);
        let difference = TemporalDifference::new(expected_ms - elapsed_ms);
        let score = difference.as_ms().abs();

        let better = match &best {
            None => true,
            Some((best_score, best_dist, _)) => {
                score < *best_score
                    || (score == *best_score && candidate.distance_to_segment_m < *best_dist)
            }
        };
        if better {
            let at_stop = at_stop_info(block, candidate, cfg);
            best = Some((
                score,
                candidate.distance_to_segment_m,
                TemporalMatch {
                    spatial: candidate.clone(),
                    difference,
                    at_stop,
                },
            ));
        }
    }

    best.map(|(_, _, m)| m)
}

/// Best match for an unassigned vehicle, scored by absolute schedule
/// adherence at the candidate. Ties prefer in-trip candidates over
/// pre-trip ones, then the spatially closer candidate.
pub fn best_temporal_match_compared_to_schedule(
    report: &AvlReport,
    block: &Block,
    candidates: &[SpatialMatch],
    cfg: &MatchingConfig,
) -> Option<TemporalMatch> {
    let mut best: Option<(i64, bool, f64, TemporalMatch)> = None;

    for candidate in candidates {
        let Some(trip) = block.trip(candidate.trip_index) else {
            continue;
        };
        let at_stop = at_stop_info(block, candidate, cfg);

        let difference =
            adherence::adherence_for_position(report.time, block, candidate, at_stop.as_ref())
                .unwrap_or_else(|| {
                    adherence::effective_difference_for(report.time, trip, candidate)
                });

        let score = difference.as_ms().abs();
        let pre_trip = candidate.is_at_start_of_trip(trip);

        let better = match &best {
            None => true,
            Some((best_score, best_pre, best_dist, _)) => {
                (score, pre_trip, candidate.distance_to_segment_m)
                    < (*best_score, *best_pre, *best_dist)
            }
        };
        if better {
            best = Some((
                score,
                pre_trip,
                candidate.distance_to_segment_m,
                TemporalMatch {
                    spatial: candidate.clone(),
                    difference,
                    at_stop,
                },
            ));
        }
    }

    best.map(|(_, _, _, m)| m)
}

/// Last resort for assignment matching: the trip whose layover terminal
/// is nearest the fix, within the wide terminal radius. `None` when every
/// terminal is too far.
pub fn match_to_layover_stop_even_if_off_route(
    report: &AvlReport,
    block: &Block,
    trip_indices: &[usize],
    cfg: &MatchingConfig,
) -> Option<usize> {
    let mut best: Option<(f64, usize)> = None;

    for &trip_index in trip_indices {
        let Some(trip) = block.trip(trip_index) else {
            continue;
        };
        let Some(terminal) = trip
            .stop_paths
            .first()
            .and_then(|path| path.stop_location())
        else {
            continue;
        };

        let distance = haversine_distance_m(&report.location(), &terminal);
        if distance > cfg.wide_terminal_radius_m {
            continue;
        }
        if best.map_or(true, |(best_distance, _)| distance < best_distance) {
            best = Some((distance, trip_index));
        }
    }

    best.map(|(_, trip_index)| trip_index)
}

/// Synthetic match at the start of a trip, used for layover fallback
/// matching and schedule-based placeholders.
pub fn trip_start_match(
    vehicle_id: &str,
    block: &Block,
    trip_index: usize,
    distance_to_terminal_m: f64,
) -> TemporalMatch {
    let at_stop = block
        .trip(trip_index)
        .and_then(|t| t.stop_paths.first())
        .map(|path| VehicleAtStopInfo {
            stop_id: path.stop_id.clone(),
            scheduled_time: path.schedule_time,
            is_wait_stop: path.is_wait_stop,
            at_end_of_block: false,
        });

    TemporalMatch {
        spatial: SpatialMatch {
            vehicle_id: vehicle_id.to_string(),
            block_id: block.id.clone(),
            trip_index,
            stop_path_index: 0,
            segment_index: 0,
            distance_to_segment_m: distance_to_terminal_m,
            distance_along_segment_m: 0.0,
            heading_mismatch: false,
        },
        difference: TemporalDifference::zero(),
        at_stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssignmentType, Location, ScheduleTime, StopPath, TravelTimes, Trip};

    const MIDNIGHT_MS: i64 = 1_700_000_000_000 - (1_700_000_000_000 % 86_400_000);

    fn hms(h: u32, m: u32) -> u32 {
        h * 3600 + m * 60
    }

    fn at_ms(sec: u32) -> i64 {
        MIDNIGHT_MS + i64::from(sec) * 1000
    }

    fn path(
        stop_id: &str,
        lengths: Vec<f64>,
        times_ms: Vec<u64>,
        departure: Option<u32>,
        layover: bool,
    ) -> StopPath {
        StopPath {
            stop_id: stop_id.to_string(),
            stop_name: None,
            points: vec![Location::new(50.0, 14.0); lengths.len() + 1],
            is_wait_stop: layover,
            is_layover: layover,
            schedule_time: departure.map(|s| ScheduleTime {
                arrival_sec: Some(s),
                departure_sec: Some(s),
            }),
            travel_times: TravelTimes {
                segment_times_ms: times_ms,
                stop_dwell_ms: 0,
            },
            segment_lengths_m: lengths,
        }
    }

    /// Two-trip block; each running path is 1000 m / 600 s.
    fn block() -> Block {
        Block {
            id: "b1".to_string(),
            service_id: "svc".to_string(),
            start_time_sec: hms(8, 0),
            end_time_sec: hms(9, 0),
            exclusive: true,
            trips: vec![
                Trip {
                    id: "t1".to_string(),
                    route_id: "r1".to_string(),
                    headsign: None,
                    start_time_sec: hms(8, 0),
                    end_time_sec: hms(8, 20),
                    stop_paths: vec![
                        path("A", vec![0.0], vec![0], Some(hms(8, 0)), true),
                        path("B", vec![1000.0], vec![600_000], Some(hms(8, 10)), false),
                        path("C", vec![1000.0], vec![600_000], Some(hms(8, 20)), false),
                    ],
                },
                Trip {
                    id: "t2".to_string(),
                    route_id: "r1".to_string(),
                    headsign: None,
                    start_time_sec: hms(8, 30),
                    end_time_sec: hms(8, 50),
                    stop_paths: vec![
                        path("C", vec![0.0], vec![0], Some(hms(8, 30)), true),
                        path("A", vec![2000.0], vec![1200_000], Some(hms(8, 50)), false),
                    ],
                },
            ],
        }
    }

    fn candidate(trip: usize, stop_path: usize, along: f64, dist: f64) -> SpatialMatch {
        SpatialMatch {
            vehicle_id: "v1".to_string(),
            block_id: "b1".to_string(),
            trip_index: trip,
            stop_path_index: stop_path,
            segment_index: 0,
            distance_to_segment_m: dist,
            distance_along_segment_m: along,
            heading_mismatch: false,
        }
    }

    fn report_at(sec: u32) -> AvlReport {
        AvlReport {
            vehicle_id: "v1".to_string(),
            time: at_ms(sec),
            lat: 50.0,
            lon: 14.0,
            heading: None,
            speed: None,
            assignment_id: None,
            assignment_type: AssignmentType::None,
        }
    }

    #[test]
    fn test_best_temporal_match_prefers_consistent_progress() {
        let b = block();
        let cfg = MatchingConfig::default();
        let previous = candidate(0, 1, 0.0, 0.0);

        // 300 s elapsed. A candidate 500 m on (expected 300 s) beats one
        // 900 m on (expected 540 s).
        let candidates = vec![candidate(0, 1, 900.0, 3.0), candidate(0, 1, 500.0, 3.0)];
        let best = best_temporal_match(&previous, 300_000, &b, &candidates, &cfg).unwrap();

        assert_eq!(best.spatial.distance_along_segment_m, 500.0);
        assert_eq!(best.difference.as_ms(), 0);
    }

    #[test]
    fn test_best_temporal_match_tie_breaks_on_spatial_distance() {
        let b = block();
        let cfg = MatchingConfig::default();
        let previous = candidate(0, 1, 500.0, 0.0);

        // Identical positions, different perpendicular distances.
        let candidates = vec![candidate(0, 1, 800.0, 12.0), candidate(0, 1, 800.0, 4.0)];
        let best = best_temporal_match(&previous, 180_000, &b, &candidates, &cfg).unwrap();

        assert_eq!(best.spatial.distance_to_segment_m, 4.0);
    }

    #[test]
    fn test_best_temporal_match_empty_candidates() {
        let b = block();
        let cfg = MatchingConfig::default();
        let previous = candidate(0, 1, 0.0, 0.0);
        assert!(best_temporal_match(&previous, 60_000, &b, &[], &cfg).is_none());
    }

    #[test]
    fn test_compared_to_schedule_picks_lowest_adherence() {
        let b = block();
        let cfg = MatchingConfig::default();

        // 08:05, 500 m along the path to B (scheduled 08:10): the
        // remaining 500 m take 300 s, dead on schedule. The candidate on
        // the path to C would be ~10 minutes early.
        let report = report_at(hms(8, 5));
        let candidates = vec![candidate(0, 2, 500.0, 3.0), candidate(0, 1, 500.0, 3.0)];

        let best =
            best_temporal_match_compared_to_schedule(&report, &b, &candidates, &cfg).unwrap();
        assert_eq!(best.spatial.stop_path_index, 1);
        assert_eq!(best.difference.as_ms(), 0);
    }

    #[test]
    fn test_compared_to_schedule_prefers_in_trip_over_pre_trip() {
        let b = block();
        let cfg = MatchingConfig::default();

        // 08:20 at stop C's location: either the end of trip 1 (at C,
        // scheduled 08:20, in-trip) or the start of trip 2 (layover at C,
        // pre-trip). Both score well; in-trip must win the tie.
        let report = report_at(hms(8, 20));
        let in_trip = candidate(0, 2, 1000.0, 2.0);
        let pre_trip = candidate(1, 0, 0.0, 2.0);

        let best = best_temporal_match_compared_to_schedule(
            &report,
            &b,
            &[pre_trip.clone(), in_trip.clone()],
            &cfg,
        )
        .unwrap();
        assert_eq!(best.spatial.trip_index, 0);
        assert_eq!(best.spatial.stop_path_index, 2);
    }

    #[test]
    fn test_at_stop_info_set_within_radius() {
        let b = block();
        let cfg = MatchingConfig::default();

        // 990 m along a 1000 m path: 10 m from stop B.
        let near = candidate(0, 1, 990.0, 2.0);
        let info = at_stop_info(&b, &near, &cfg).unwrap();
        assert_eq!(info.stop_id, "B");
        assert!(!info.is_wait_stop);
        assert!(!info.at_end_of_block);

        // 500 m from the stop: no stop context.
        let far = candidate(0, 1, 500.0, 2.0);
        assert!(at_stop_info(&b, &far, &cfg).is_none());
    }

    #[test]
    fn test_at_stop_info_flags_end_of_block() {
        let b = block();
        let cfg = MatchingConfig::default();

        let last = candidate(1, 1, 2000.0, 2.0);
        let info = at_stop_info(&b, &last, &cfg).unwrap();
        assert!(info.at_end_of_block);
    }

    #[test]
    fn test_layover_matcher_picks_nearest_terminal() {
        let mut b = block();
        // Put trip terminals at distinct locations: A at 50.0/14.0, C at
        // 50.01/14.0 (~1112 m north).
        b.trips[0].stop_paths[0].points = vec![Location::new(50.0, 14.0); 2];
        b.trips[1].stop_paths[0].points = vec![Location::new(50.01, 14.0); 2];

        let mut cfg = MatchingConfig::default();
        cfg.wide_terminal_radius_m = 1_500.0;

        // Fix ~220 m north of A: nearest terminal is trip 1's.
        let mut report = report_at(hms(8, 0));
        report.lat = 50.002;
        let trip = match_to_layover_stop_even_if_off_route(&report, &b, &[0, 1], &cfg);
        assert_eq!(trip, Some(0));

        // Fix near C.
        report.lat = 50.0095;
        let trip = match_to_layover_stop_even_if_off_route(&report, &b, &[0, 1], &cfg);
        assert_eq!(trip, Some(1));
    }

    #[test]
    fn test_layover_matcher_respects_radius() {
        let b = block();
        let mut cfg = MatchingConfig::default();
        cfg.wide_terminal_radius_m = 500.0;

        // ~1112 m from every terminal (all at 50.0/14.0 in the base
        // fixture): nothing within the radius.
        let mut report = report_at(hms(8, 0));
        report.lat = 50.01;
        let trip = match_to_layover_stop_even_if_off_route(&report, &b, &[0, 1], &cfg);
        assert!(trip.is_none());
    }

    #[test]
    fn test_trip_start_match_is_wait_stop_zero_difference() {
        let b = block();
        let m = trip_start_match("v1", &b, 1, 42.0);

        assert_eq!(m.spatial.trip_index, 1);
        assert_eq!(m.spatial.stop_path_index, 0);
        assert_eq!(m.difference, TemporalDifference::zero());
        let info = m.at_stop.unwrap();
        assert!(info.is_wait_stop);
        assert!(!info.at_end_of_block);
    }
}
