//! Static schedule store.
//!
//! Holds the immutable day-scoped block/trip arena shared by the whole
//! pipeline. Matches address into it by `(block_id, trip_index,
//! stop_path_index)`; the arena itself is behind an `Arc` and never
//! mutated after loading.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::geo::haversine_distance_m;
use crate::types::{Block, Trip};

/// Hours after midnight still attributed to the previous service day, so
/// late-night duties keep their service active past the date change.
const SERVICE_DAY_CUTOVER_HOURS: i64 = 6;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("failed to read schedule file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse schedule file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("inconsistent schedule data: {0}")]
    Inconsistent(String),
}

/// A service calendar entry: which weekdays the service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    /// Weekdays the service is active, 0 = Monday .. 6 = Sunday.
    /// Empty means every day.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
}

impl Service {
    pub fn active_on(&self, weekday: u8) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&weekday)
    }
}

/// On-disk schedule format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleFile {
    #[serde(default)]
    services: Vec<Service>,
    blocks: Vec<Block>,
}

/// Read-only index over blocks, trips, and services.
#[derive(Debug, Default)]
pub struct ScheduleIndex {
    blocks: HashMap<String, Block>,
    services: HashMap<String, Service>,
    block_by_trip: HashMap<String, String>,
}

impl ScheduleIndex {
    /// Build the index from already-loaded data, computing derived
    /// geometry (segment lengths) and validating consistency.
    pub fn new(services: Vec<Service>, mut blocks: Vec<Block>) -> Result<Self, ScheduleError> {
        let mut block_by_trip = HashMap::new();

        for block in &mut blocks {
            if block.trips.is_empty() {
                return Err(ScheduleError::Inconsistent(format!(
                    "block {} has no trips",
                    block.id
                )));
            }
            for trip in &mut block.trips {
                if trip.stop_paths.is_empty() {
                    return Err(ScheduleError::Inconsistent(format!(
                        "trip {} has no stop paths",
                        trip.id
                    )));
                }
                for path in &mut trip.stop_paths {
                    if path.points.len() < 2 {
                        return Err(ScheduleError::Inconsistent(format!(
                            "trip {} stop path to {} has fewer than two points",
                            trip.id, path.stop_id
                        )));
                    }
                    path.segment_lengths_m = path
                        .points
                        .windows(2)
                        .map(|pair| haversine_distance_m(&pair[0], &pair[1]))
                        .collect();

                    let segments = path.segment_lengths_m.len();
                    if path.travel_times.segment_times_ms.len() != segments {
                        return Err(ScheduleError::Inconsistent(format!(
                            "trip {} stop path to {} has {} segments but {} travel times",
                            trip.id,
                            path.stop_id,
                            segments,
                            path.travel_times.segment_times_ms.len()
                        )));
                    }
                }
                block_by_trip.insert(trip.id.clone(), block.id.clone());
            }
        }

        let blocks = blocks.into_iter().map(|b| (b.id.clone(), b)).collect();
        let services = services.into_iter().map(|s| (s.id.clone(), s)).collect();

        Ok(Self {
            blocks,
            services,
            block_by_trip,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScheduleError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: ScheduleFile = serde_json::from_str(&raw)?;
        let index = Self::new(file.services, file.blocks)?;
        info!(
            blocks = index.blocks.len(),
            services = index.services.len(),
            "Loaded schedule"
        );
        Ok(index)
    }

    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.get(block_id)
    }

    pub fn block_for_trip(&self, trip_id: &str) -> Option<&Block> {
        self.block_by_trip
            .get(trip_id)
            .and_then(|id| self.blocks.get(id))
    }

    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.block_for_trip(trip_id)?
            .trips
            .iter()
            .find(|t| t.id == trip_id)
    }

    /// Location of a stop, taken from the first stop path serving it.
    pub fn stop_location(&self, stop_id: &str) -> Option<crate::types::Location> {
        self.blocks
            .values()
            .flat_map(|b| &b.trips)
            .flat_map(|t| &t.stop_paths)
            .find(|p| p.stop_id == stop_id)
            .and_then(|p| p.stop_location())
    }

    /// Service ids active around `time_ms`. Both the calendar day of the
    /// report and the previous day (within the cutover window) count, so
    /// duties crossing midnight stay active.
    pub fn service_ids_active_at(&self, time_ms: i64) -> Vec<&str> {
        let mut days = Vec::with_capacity(2);
        if let Some(day) = weekday_of(time_ms) {
            days.push(day);
        }
        if let Some(previous) = weekday_of(time_ms - SERVICE_DAY_CUTOVER_HOURS * 3_600_000) {
            if !days.contains(&previous) {
                days.push(previous);
            }
        }

        self.services
            .values()
            .filter(|s| days.iter().any(|&d| s.active_on(d)))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// The block with this id, provided its service is active at the
    /// report time. Blocks under unknown services are treated as always
    /// active.
    pub fn active_block(&self, block_id: &str, time_ms: i64) -> Option<&Block> {
        let block = self.blocks.get(block_id)?;
        if self.service_active(&block.service_id, time_ms) {
            Some(block)
        } else {
            None
        }
    }

    /// Blocks of one active service serving `route_id`.
    pub fn blocks_for_route(&self, service_id: &str, route_id: &str) -> Vec<&Block> {
        self.blocks
            .values()
            .filter(|b| b.service_id == service_id && b.serves_route(route_id))
            .collect()
    }

    /// Blocks serving `route_id` across every service active at the
    /// report time (weekday + school services etc. union their blocks).
    pub fn active_blocks_for_route(&self, route_id: &str, time_ms: i64) -> Vec<&Block> {
        let services = self.service_ids_active_at(time_ms);
        let mut blocks: Vec<&Block> = services
            .iter()
            .flat_map(|sid| self.blocks_for_route(sid, route_id))
            .collect();
        blocks.sort_by(|a, b| a.id.cmp(&b.id));
        blocks.dedup_by(|a, b| a.id == b.id);
        blocks
    }

    fn service_active(&self, service_id: &str, time_ms: i64) -> bool {
        match self.services.get(service_id) {
            Some(_) => self
                .service_ids_active_at(time_ms)
                .iter()
                .any(|id| *id == service_id),
            // Schedules without calendars run every day.
            None => true,
        }
    }
}

fn weekday_of(time_ms: i64) -> Option<u8> {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(time_ms)?;
    Some(dt.weekday().num_days_from_monday() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Location, ScheduleTime, StopPath, TravelTimes};

    fn stop_path(stop_id: &str, points: Vec<Location>, departure_sec: Option<u32>) -> StopPath {
        let segments = points.len() - 1;
        StopPath {
            stop_id: stop_id.to_string(),
            stop_name: None,
            points,
            is_wait_stop: false,
            is_layover: false,
            schedule_time: departure_sec.map(|s| ScheduleTime {
                arrival_sec: Some(s),
                departure_sec: Some(s),
            }),
            travel_times: TravelTimes {
                segment_times_ms: vec![60_000; segments],
                stop_dwell_ms: 0,
            },
            segment_lengths_m: vec![],
        }
    }

    fn simple_block(id: &str, service_id: &str, route_id: &str) -> Block {
        Block {
            id: id.to_string(),
            service_id: service_id.to_string(),
            start_time_sec: 8 * 3600,
            end_time_sec: 9 * 3600,
            exclusive: true,
            trips: vec![Trip {
                id: format!("{id}-t1"),
                route_id: route_id.to_string(),
                headsign: None,
                start_time_sec: 8 * 3600,
                end_time_sec: 9 * 3600,
                stop_paths: vec![
                    stop_path(
                        "s1",
                        vec![Location::new(50.0, 14.0), Location::new(50.0, 14.0)],
                        Some(8 * 3600),
                    ),
                    stop_path(
                        "s2",
                        vec![Location::new(50.0, 14.0), Location::new(50.01, 14.0)],
                        Some(9 * 3600),
                    ),
                ],
            }],
        }
    }

    fn index() -> ScheduleIndex {
        ScheduleIndex::new(
            vec![
                Service {
                    id: "weekday".to_string(),
                    days_of_week: vec![0, 1, 2, 3, 4],
                },
                Service {
                    id: "school".to_string(),
                    days_of_week: vec![0, 1, 2, 3, 4],
                },
                Service {
                    id: "sunday".to_string(),
                    days_of_week: vec![6],
                },
            ],
            vec![
                simple_block("b1", "weekday", "r1"),
                simple_block("b2", "school", "r1"),
                simple_block("b3", "sunday", "r1"),
                simple_block("b4", "weekday", "r2"),
            ],
        )
        .unwrap()
    }

    // 2023-11-13 was a Monday.
    const MONDAY_NOON_MS: i64 = 1_699_873_200_000;
    // 2023-11-19 was a Sunday.
    const SUNDAY_NOON_MS: i64 = 1_700_391_600_000;

    #[test]
    fn test_segment_lengths_computed_on_load() {
        let idx = index();
        let block = idx.block("b1").unwrap();
        let path = &block.trips[0].stop_paths[1];
        // 0.01 deg of latitude is ~1112 m.
        assert!((path.length_m() - 1112.0).abs() < 5.0);
    }

    #[test]
    fn test_service_ids_for_weekday_and_sunday() {
        let idx = index();

        let mut monday = idx.service_ids_active_at(MONDAY_NOON_MS);
        monday.sort_unstable();
        assert_eq!(monday, vec!["school", "weekday"]);

        let sunday = idx.service_ids_active_at(SUNDAY_NOON_MS);
        assert_eq!(sunday, vec!["sunday"]);
    }

    #[test]
    fn test_after_midnight_keeps_previous_service_day() {
        let idx = index();
        // Saturday 01:00 still lists weekday services via the cutover
        // window (Friday night duties are still out).
        let saturday_1am = 1_700_269_200_000;
        let services = idx.service_ids_active_at(saturday_1am);
        assert!(services.contains(&"weekday"));
        // By Saturday noon the weekday services are gone.
        let saturday_noon = saturday_1am + 11 * 3_600_000;
        assert!(!idx.service_ids_active_at(saturday_noon).contains(&"weekday"));
    }

    #[test]
    fn test_active_block_respects_service_day() {
        let idx = index();
        assert!(idx.active_block("b1", MONDAY_NOON_MS).is_some());
        assert!(idx.active_block("b1", SUNDAY_NOON_MS).is_none());
        assert!(idx.active_block("b3", SUNDAY_NOON_MS).is_some());
        assert!(idx.active_block("nope", MONDAY_NOON_MS).is_none());
    }

    #[test]
    fn test_active_blocks_for_route_unions_services() {
        let idx = index();
        let blocks = idx.active_blocks_for_route("r1", MONDAY_NOON_MS);
        let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
        // Weekday and school services both contribute; sunday does not.
        assert_eq!(ids, vec!["b1", "b2"]);

        let r2 = idx.active_blocks_for_route("r2", MONDAY_NOON_MS);
        assert_eq!(r2.len(), 1);
        assert_eq!(r2[0].id, "b4");
    }

    #[test]
    fn test_block_for_trip() {
        let idx = index();
        assert_eq!(idx.block_for_trip("b2-t1").unwrap().id, "b2");
        assert!(idx.block_for_trip("missing").is_none());
        assert_eq!(idx.trip("b2-t1").unwrap().id, "b2-t1");
    }

    #[test]
    fn test_stop_location_lookup() {
        let idx = index();
        let s2 = idx.stop_location("s2").unwrap();
        assert!((s2.lat - 50.01).abs() < 1e-9);
        assert!(idx.stop_location("missing").is_none());
    }

    #[test]
    fn test_new_rejects_inconsistent_travel_times() {
        let mut block = simple_block("b1", "weekday", "r1");
        block.trips[0].stop_paths[1]
            .travel_times
            .segment_times_ms
            .push(1);

        let err = ScheduleIndex::new(vec![], vec![block]).unwrap_err();
        assert!(matches!(err, ScheduleError::Inconsistent(_)));
    }

    #[test]
    fn test_new_rejects_single_point_path() {
        let mut block = simple_block("b1", "weekday", "r1");
        block.trips[0].stop_paths[0].points.truncate(1);

        let err = ScheduleIndex::new(vec![], vec![block]).unwrap_err();
        assert!(matches!(err, ScheduleError::Inconsistent(_)));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "headway-schedule-{}.json",
            std::process::id()
        ));
        let json = serde_json::json!({
            "services": [{"id": "weekday", "daysOfWeek": [0, 1, 2, 3, 4]}],
            "blocks": [{
                "id": "b1",
                "serviceId": "weekday",
                "startTimeSec": 28800,
                "endTimeSec": 32400,
                "trips": [{
                    "id": "t1",
                    "routeId": "r1",
                    "startTimeSec": 28800,
                    "endTimeSec": 32400,
                    "stopPaths": [{
                        "stopId": "s1",
                        "points": [
                            {"lat": 50.0, "lon": 14.0},
                            {"lat": 50.01, "lon": 14.0}
                        ],
                        "scheduleTime": {"arrivalSec": 28800, "departureSec": 28900},
                        "travelTimes": {"segmentTimesMs": [60000], "stopDwellMs": 5000}
                    }]
                }]
            }]
        });
        std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();

        let idx = ScheduleIndex::from_json_file(&path).unwrap();
        let block = idx.block("b1").unwrap();
        // Exclusivity defaults to true when the file omits it.
        assert!(block.should_be_exclusive());
        let path_to_s1 = &block.trips[0].stop_paths[0];
        assert_eq!(path_to_s1.travel_times.stop_dwell_ms, 5000);
        assert!(path_to_s1.length_m() > 1_000.0);
        assert!(!path_to_s1.is_wait_stop);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unknown_service_runs_every_day() {
        let idx =
            ScheduleIndex::new(vec![], vec![simple_block("b1", "uncalendared", "r1")]).unwrap();
        assert!(idx.active_block("b1", MONDAY_NOON_MS).is_some());
        assert!(idx.active_block("b1", SUNDAY_NOON_MS).is_some());
    }
}
