//! Match types: where a vehicle sits on a block, and how its timing
//! compares to the schedule.

use serde::{Deserialize, Serialize};

use crate::types::schedule::{Block, ScheduleTime, Trip};

/// A plausible position of a vehicle along a block, produced by the
/// spatial matcher. Indices reference the block arena; distances are
/// meters and never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialMatch {
    pub vehicle_id: String,
    pub block_id: String,
    pub trip_index: usize,
    pub stop_path_index: usize,
    pub segment_index: usize,
    /// Perpendicular distance from the fix to the matched segment.
    pub distance_to_segment_m: f64,
    /// Projection along the matched segment, clamped to its length.
    pub distance_along_segment_m: f64,
    /// Set when the AVL heading disagrees with the segment bearing beyond
    /// tolerance (and the position is not a layover). The orchestrator may
    /// reject such candidates.
    #[serde(default)]
    pub heading_mismatch: bool,
}

impl SpatialMatch {
    /// Distance from the start of the current stop path, meters.
    pub fn distance_along_stop_path_m(&self, trip: &Trip) -> f64 {
        match trip.stop_path(self.stop_path_index) {
            Some(path) => {
                path.distance_to_segment_start_m(self.segment_index) + self.distance_along_segment_m
            }
            None => 0.0,
        }
    }

    /// Distance from the start of the current trip, meters.
    pub fn distance_along_trip_m(&self, trip: &Trip) -> f64 {
        trip.distance_to_stop_path_m(self.stop_path_index) + self.distance_along_stop_path_m(trip)
    }

    /// At (or before) the very start of the trip: first stop path, no
    /// distance covered yet.
    pub fn is_at_start_of_trip(&self, trip: &Trip) -> bool {
        self.stop_path_index == 0 && self.distance_along_stop_path_m(trip) <= f64::EPSILON
    }

    /// Remaining distance to the stop terminating the current stop path.
    pub fn distance_to_stop_m(&self, trip: &Trip) -> f64 {
        match trip.stop_path(self.stop_path_index) {
            Some(path) => (path.length_m() - self.distance_along_stop_path_m(trip)).max(0.0),
            None => 0.0,
        }
    }

    /// On the final stop path of the final trip of the block.
    pub fn is_on_last_stop_path(&self, block: &Block) -> bool {
        self.trip_index == block.last_trip_index()
            && block
                .trip(self.trip_index)
                .is_some_and(|t| self.stop_path_index == t.last_stop_path_index())
    }
}

/// Bounds for the adherence sanity check. Derived from configuration and
/// the vehicle context (schedule-based placeholders get wider bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdherenceLimits {
    pub max_early_ms: i64,
    pub max_late_ms: i64,
}

/// Signed schedule offset in milliseconds. Positive means early
/// (scheduled later than actual), negative means late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TemporalDifference(pub i64);

impl TemporalDifference {
    pub fn new(ms: i64) -> Self {
        Self(ms)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn as_ms(&self) -> i64 {
        self.0
    }

    pub fn is_early(&self) -> bool {
        self.0 > 0
    }

    pub fn is_late(&self) -> bool {
        self.0 < 0
    }

    pub fn within_bounds(&self, limits: &AdherenceLimits) -> bool {
        self.0 <= limits.max_early_ms && -self.0 <= limits.max_late_ms
    }
}

/// Details of a spatial match that lies within the stop radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleAtStopInfo {
    pub stop_id: String,
    /// May be absent for non-timepoint stops.
    pub scheduled_time: Option<ScheduleTime>,
    pub is_wait_stop: bool,
    pub at_end_of_block: bool,
}

/// The resolved match: a spatial position plus its temporal score and,
/// when applicable, stop context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalMatch {
    pub spatial: SpatialMatch,
    pub difference: TemporalDifference,
    pub at_stop: Option<VehicleAtStopInfo>,
}

impl TemporalMatch {
    pub fn at_end_of_block(&self) -> bool {
        self.at_stop.as_ref().is_some_and(|s| s.at_end_of_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geo::Location;
    use crate::types::schedule::{StopPath, TravelTimes};

    fn trip_with_two_paths() -> Trip {
        let path = |stop: &str, lengths: Vec<f64>| {
            let points = vec![Location::new(50.0, 14.0); lengths.len() + 1];
            StopPath {
                stop_id: stop.to_string(),
                stop_name: None,
                points,
                is_wait_stop: false,
                is_layover: false,
                schedule_time: None,
                travel_times: TravelTimes::default(),
                segment_lengths_m: lengths,
            }
        };
        Trip {
            id: "t".to_string(),
            route_id: "r".to_string(),
            headsign: None,
            start_time_sec: 0,
            end_time_sec: 3600,
            stop_paths: vec![path("a", vec![300.0, 200.0]), path("b", vec![500.0])],
        }
    }

    fn spatial(stop_path_index: usize, segment_index: usize, along: f64) -> SpatialMatch {
        SpatialMatch {
            vehicle_id: "v".to_string(),
            block_id: "b".to_string(),
            trip_index: 0,
            stop_path_index,
            segment_index,
            distance_to_segment_m: 5.0,
            distance_along_segment_m: along,
            heading_mismatch: false,
        }
    }

    #[test]
    fn test_distance_along_stop_path_and_trip() {
        let trip = trip_with_two_paths();

        let m = spatial(0, 1, 50.0);
        assert!((m.distance_along_stop_path_m(&trip) - 350.0).abs() < 1e-9);
        assert!((m.distance_along_trip_m(&trip) - 350.0).abs() < 1e-9);

        let m = spatial(1, 0, 100.0);
        assert!((m.distance_along_stop_path_m(&trip) - 100.0).abs() < 1e-9);
        // Second path starts after the 500 m of the first.
        assert!((m.distance_along_trip_m(&trip) - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_to_stop() {
        let trip = trip_with_two_paths();
        let m = spatial(0, 1, 50.0);
        assert!((m.distance_to_stop_m(&trip) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_at_start_of_trip() {
        let trip = trip_with_two_paths();
        assert!(spatial(0, 0, 0.0).is_at_start_of_trip(&trip));
        assert!(!spatial(0, 0, 10.0).is_at_start_of_trip(&trip));
        assert!(!spatial(1, 0, 0.0).is_at_start_of_trip(&trip));
    }

    #[test]
    fn test_temporal_difference_signs() {
        let early = TemporalDifference::new(60_000);
        assert!(early.is_early());
        assert!(!early.is_late());

        let late = TemporalDifference::new(-180_000);
        assert!(late.is_late());
        assert!(!late.is_early());

        assert!(!TemporalDifference::zero().is_early());
        assert!(!TemporalDifference::zero().is_late());
    }

    #[test]
    fn test_within_bounds() {
        let limits = AdherenceLimits {
            max_early_ms: 900_000,
            max_late_ms: 5_400_000,
        };

        assert!(TemporalDifference::new(900_000).within_bounds(&limits));
        assert!(!TemporalDifference::new(900_001).within_bounds(&limits));
        assert!(TemporalDifference::new(-5_400_000).within_bounds(&limits));
        assert!(!TemporalDifference::new(-5_400_001).within_bounds(&limits));
        assert!(TemporalDifference::zero().within_bounds(&limits));
    }
}
