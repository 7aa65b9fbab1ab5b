//! Static schedule data: blocks, trips, stop paths, scheduled times.
//!
//! Blocks and trips are immutable for the whole service day and shared
//! behind an `Arc`. Matches reference them by `(block_id, trip_index,
//! stop_path_index)` tuples, never by owning pointers.

use serde::{Deserialize, Serialize};

use crate::types::geo::Location;

pub const MS_PER_DAY: i64 = 86_400_000;

/// Scheduled arrival/departure at a stop, as seconds into the service day.
/// Non-timepoint stops carry neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTime {
    pub arrival_sec: Option<u32>,
    pub departure_sec: Option<u32>,
}

impl ScheduleTime {
    /// Preferred representative time: departure when present, else arrival.
    pub fn time_sec(&self) -> Option<u32> {
        self.departure_sec.or(self.arrival_sec)
    }

    pub fn is_timepoint(&self) -> bool {
        self.arrival_sec.is_some() || self.departure_sec.is_some()
    }
}

/// Expected traversal times for one stop path: one entry per geometry
/// segment, plus the dwell at the stop terminating the path. All in ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TravelTimes {
    pub segment_times_ms: Vec<u64>,
    #[serde(default)]
    pub stop_dwell_ms: u64,
}

impl TravelTimes {
    pub fn total_travel_ms(&self) -> u64 {
        self.segment_times_ms.iter().sum()
    }
}

/// The path from the previous stop (or the trip start) to one scheduled
/// stop: a polyline, the stop's scheduled time, and expected travel times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPath {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    /// Polyline from the previous stop to this stop. At least two points;
    /// a zero-length path (layover at the same location) repeats the point.
    pub points: Vec<Location>,
    /// Vehicle is expected to hold here until its scheduled departure.
    #[serde(default)]
    pub is_wait_stop: bool,
    /// Terminal/layover location: widens the spatial match radius and
    /// disables the heading gate.
    #[serde(default)]
    pub is_layover: bool,
    #[serde(default)]
    pub schedule_time: Option<ScheduleTime>,
    #[serde(default)]
    pub travel_times: TravelTimes,
    /// Per-segment lengths in meters, computed once at load time.
    #[serde(skip)]
    pub segment_lengths_m: Vec<f64>,
}

impl StopPath {
    pub fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    pub fn segment(&self, index: usize) -> Option<(Location, Location)> {
        if index + 1 < self.points.len() {
            Some((self.points[index], self.points[index + 1]))
        } else {
            None
        }
    }

    pub fn segment_length_m(&self, index: usize) -> f64 {
        self.segment_lengths_m.get(index).copied().unwrap_or(0.0)
    }

    pub fn length_m(&self) -> f64 {
        self.segment_lengths_m.iter().sum()
    }

    /// Distance from the start of the path to the start of `segment_index`.
    pub fn distance_to_segment_start_m(&self, segment_index: usize) -> f64 {
        self.segment_lengths_m
            .iter()
            .take(segment_index)
            .sum()
    }

    /// Location of the stop this path leads to (last point of the polyline).
    pub fn stop_location(&self) -> Option<Location> {
        self.points.last().copied()
    }
}

/// One directional service run: an ordered list of stop paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    #[serde(default)]
    pub headsign: Option<String>,
    /// Scheduled trip start/end, seconds into the service day.
    pub start_time_sec: u32,
    pub end_time_sec: u32,
    pub stop_paths: Vec<StopPath>,
}

impl Trip {
    pub fn stop_path(&self, index: usize) -> Option<&StopPath> {
        self.stop_paths.get(index)
    }

    /// Scheduled time of the stop terminating stop path `index`.
    pub fn schedule_time(&self, index: usize) -> Option<&ScheduleTime> {
        self.stop_paths.get(index)?.schedule_time.as_ref()
    }

    pub fn last_stop_path_index(&self) -> usize {
        self.stop_paths.len().saturating_sub(1)
    }

    pub fn length_m(&self) -> f64 {
        self.stop_paths.iter().map(|p| p.length_m()).sum()
    }

    /// Distance from the start of the trip to the start of stop path `index`.
    pub fn distance_to_stop_path_m(&self, index: usize) -> f64 {
        self.stop_paths.iter().take(index).map(|p| p.length_m()).sum()
    }
}

/// A full-day vehicle duty: an ordered sequence of trips under one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub service_id: String,
    /// Block span, seconds into the service day. `end_time_sec` may exceed
    /// 86400 for duties crossing midnight.
    pub start_time_sec: u32,
    pub end_time_sec: u32,
    /// At most one predictable vehicle may hold this block at a time.
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    pub trips: Vec<Trip>,
}

fn default_exclusive() -> bool {
    true
}

impl Block {
    pub fn should_be_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn trip(&self, index: usize) -> Option<&Trip> {
        self.trips.get(index)
    }

    pub fn last_trip_index(&self) -> usize {
        self.trips.len().saturating_sub(1)
    }

    pub fn serves_route(&self, route_id: &str) -> bool {
        self.trips.iter().any(|t| t.route_id == route_id)
    }

    /// Block is active around `time_ms`: within its scheduled span, widened
    /// by the given margins, on the service day nearest the report.
    pub fn is_active(&self, time_ms: i64, early_margin_sec: u32, late_margin_sec: u32) -> bool {
        let start = resolve_epoch_ms(self.start_time_sec, time_ms) - i64::from(early_margin_sec) * 1000;
        let end = resolve_epoch_ms(self.end_time_sec, time_ms) + i64::from(late_margin_sec) * 1000;
        start <= time_ms && time_ms <= end
    }

    /// Trips whose scheduled window, widened by the margins, covers
    /// `time_ms`. When the report falls into a gap (early at the first
    /// terminal, between trips at a layover), the trip whose start is
    /// nearest the report is returned as the single candidate.
    pub fn trips_active_at(
        &self,
        time_ms: i64,
        early_margin_sec: u32,
        late_margin_sec: u32,
    ) -> Vec<usize> {
        let mut active: Vec<usize> = (0..self.trips.len())
            .filter(|&i| {
                let trip = &self.trips[i];
                let start =
                    resolve_epoch_ms(trip.start_time_sec, time_ms) - i64::from(early_margin_sec) * 1000;
                let end =
                    resolve_epoch_ms(trip.end_time_sec, time_ms) + i64::from(late_margin_sec) * 1000;
                start <= time_ms && time_ms <= end
            })
            .collect();

        if active.is_empty() && !self.trips.is_empty() {
            let nearest = (0..self.trips.len())
                .min_by_key(|&i| {
                    (resolve_epoch_ms(self.trips[i].start_time_sec, time_ms) - time_ms).abs()
                })
                .unwrap_or(0);
            active.push(nearest);
        }
        active
    }
}

/// Resolve a seconds-into-service-day value to epoch milliseconds, snapping
/// to the calendar day closest to `reference_ms`. Handles late-night trips
/// crossing midnight: the wall-clock day is not assumed to be the service
/// day.
pub fn resolve_epoch_ms(seconds_of_day: u32, reference_ms: i64) -> i64 {
    let midnight = reference_ms.div_euclid(MS_PER_DAY) * MS_PER_DAY;
    let offset = i64::from(seconds_of_day) * 1000;

    [-1i64, 0, 1]
        .iter()
        .map(|d| midnight + d * MS_PER_DAY + offset)
        .min_by_key(|candidate| (candidate - reference_ms).abs())
        .unwrap_or(midnight + offset)
}
