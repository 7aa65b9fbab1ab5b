//! Configuration management

use std::str::FromStr;

use anyhow::{Context, Result};

use crate::defaults;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Subject carrying inbound AVL reports
    pub avl_subject: String,

    /// Subject vehicle events are published to
    pub events_subject: String,

    /// Path to the static schedule file
    pub schedule_path: String,

    /// Directory for the daily AVL archive (disabled when unset)
    pub archive_dir: Option<String>,

    /// Blocks that get a schedule-based prediction placeholder until a
    /// real vehicle takes them over
    pub sched_based_blocks: Vec<String>,

    /// Number of parallel feed workers
    pub worker_count: usize,

    /// Matching thresholds, snapshotted per AVL report
    pub matching: MatchingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let avl_subject =
            std::env::var("AVL_SUBJECT").unwrap_or_else(|_| "headway.avl.reports".to_string());

        let events_subject = std::env::var("EVENTS_SUBJECT")
            .unwrap_or_else(|_| "headway.vehicle.events".to_string());

        let schedule_path = std::env::var("SCHEDULE_PATH").context("SCHEDULE_PATH must be set")?;

        let archive_dir = std::env::var("ARCHIVE_DIR").ok();

        let sched_based_blocks = std::env::var("SCHED_BASED_BLOCKS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let worker_count = env_or("WORKER_COUNT", defaults::DEFAULT_WORKER_COUNT);

        Ok(Self {
            nats_url,
            avl_subject,
            events_subject,
            schedule_path,
            archive_dir,
            sched_based_blocks,
            worker_count,
            matching: MatchingConfig::from_env(),
        })
    }
}

/// Thresholds steering the matchers, the adherence sanity check, and the
/// stale-vehicle sweep. Cheap to clone; the orchestrator reads a snapshot
/// per AVL report.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub spatial_match_radius_m: f64,
    pub layover_match_radius_m: f64,
    pub wide_terminal_radius_m: f64,
    pub stop_match_radius_m: f64,
    pub heading_tolerance_deg: f64,
    pub forward_lookahead_m: f64,
    pub backward_tolerance_m: f64,
    pub terminal_distance_for_route_matching_m: f64,
    pub max_bad_matches_in_a_row: u32,
    pub allowable_late_at_terminal_ms: i64,
    pub max_schedule_adherence_early_ms: i64,
    pub max_schedule_adherence_late_ms: i64,
    pub sched_based_bounds_factor: f64,
    pub trip_active_early_sec: u32,
    pub trip_active_late_sec: u32,
    pub only_need_arrival_departures: bool,
    pub max_stale_ms: i64,
    pub timeout_sweep_interval_ms: i64,
    pub assignment_cooldown_ms: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            spatial_match_radius_m: defaults::DEFAULT_SPATIAL_MATCH_RADIUS_M,
            layover_match_radius_m: defaults::DEFAULT_LAYOVER_MATCH_RADIUS_M,
            wide_terminal_radius_m: defaults::DEFAULT_WIDE_TERMINAL_RADIUS_M,
            stop_match_radius_m: defaults::DEFAULT_STOP_MATCH_RADIUS_M,
            heading_tolerance_deg: defaults::DEFAULT_HEADING_TOLERANCE_DEG,
            forward_lookahead_m: defaults::DEFAULT_FORWARD_LOOKAHEAD_M,
            backward_tolerance_m: defaults::DEFAULT_BACKWARD_TOLERANCE_M,
            terminal_distance_for_route_matching_m:
                defaults::DEFAULT_TERMINAL_DISTANCE_FOR_ROUTE_MATCHING_M,
            max_bad_matches_in_a_row: defaults::DEFAULT_MAX_BAD_MATCHES_IN_A_ROW,
            allowable_late_at_terminal_ms: defaults::DEFAULT_ALLOWABLE_LATE_AT_TERMINAL_MS,
            max_schedule_adherence_early_ms: defaults::DEFAULT_MAX_SCHEDULE_ADHERENCE_EARLY_MS,
            max_schedule_adherence_late_ms: defaults::DEFAULT_MAX_SCHEDULE_ADHERENCE_LATE_MS,
            sched_based_bounds_factor: defaults::DEFAULT_SCHED_BASED_BOUNDS_FACTOR,
            trip_active_early_sec: defaults::DEFAULT_TRIP_ACTIVE_EARLY_SEC,
            trip_active_late_sec: defaults::DEFAULT_TRIP_ACTIVE_LATE_SEC,
            only_need_arrival_departures: false,
            max_stale_ms: defaults::DEFAULT_MAX_STALE_MS,
            timeout_sweep_interval_ms: defaults::DEFAULT_TIMEOUT_SWEEP_INTERVAL_MS,
            assignment_cooldown_ms: defaults::DEFAULT_ASSIGNMENT_COOLDOWN_MS,
        }
    }
}

impl MatchingConfig {
    /// Environment overrides on top of the built-in defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            spatial_match_radius_m: env_or("SPATIAL_MATCH_RADIUS_M", d.spatial_match_radius_m),
            layover_match_radius_m: env_or("LAYOVER_MATCH_RADIUS_M", d.layover_match_radius_m),
            wide_terminal_radius_m: env_or("WIDE_TERMINAL_RADIUS_M", d.wide_terminal_radius_m),
            stop_match_radius_m: env_or("STOP_MATCH_RADIUS_M", d.stop_match_radius_m),
            heading_tolerance_deg: env_or("HEADING_TOLERANCE_DEG", d.heading_tolerance_deg),
            forward_lookahead_m: env_or("FORWARD_LOOKAHEAD_M", d.forward_lookahead_m),
            backward_tolerance_m: env_or("BACKWARD_TOLERANCE_M", d.backward_tolerance_m),
            terminal_distance_for_route_matching_m: env_or(
                "TERMINAL_DISTANCE_FOR_ROUTE_MATCHING_M",
                d.terminal_distance_for_route_matching_m,
            ),
            max_bad_matches_in_a_row: env_or(
                "MAX_BAD_MATCHES_IN_A_ROW",
                d.max_bad_matches_in_a_row,
            ),
            allowable_late_at_terminal_ms: env_or(
                "ALLOWABLE_LATE_AT_TERMINAL_MS",
                d.allowable_late_at_terminal_ms,
            ),
            max_schedule_adherence_early_ms: env_or(
                "MAX_SCHEDULE_ADHERENCE_EARLY_MS",
                d.max_schedule_adherence_early_ms,
            ),
            max_schedule_adherence_late_ms: env_or(
                "MAX_SCHEDULE_ADHERENCE_LATE_MS",
                d.max_schedule_adherence_late_ms,
            ),
            sched_based_bounds_factor: env_or(
                "SCHED_BASED_BOUNDS_FACTOR",
                d.sched_based_bounds_factor,
            ),
            trip_active_early_sec: env_or("TRIP_ACTIVE_EARLY_SEC", d.trip_active_early_sec),
            trip_active_late_sec: env_or("TRIP_ACTIVE_LATE_SEC", d.trip_active_late_sec),
            only_need_arrival_departures: env_or(
                "ONLY_NEED_ARRIVAL_DEPARTURES",
                d.only_need_arrival_departures,
            ),
            max_stale_ms: env_or("MAX_STALE_MS", d.max_stale_ms),
            timeout_sweep_interval_ms: env_or(
                "TIMEOUT_SWEEP_INTERVAL_MS",
                d.timeout_sweep_interval_ms,
            ),
            assignment_cooldown_ms: env_or("ASSIGNMENT_COOLDOWN_MS", d.assignment_cooldown_ms),
        }
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The process environment is shared; serialize the tests that touch it.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_matching_config_defaults() {
        let cfg = MatchingConfig::default();
        assert_eq!(cfg.spatial_match_radius_m, 60.0);
        assert_eq!(cfg.max_bad_matches_in_a_row, 3);
        assert!(!cfg.only_need_arrival_departures);
    }

    #[test]
    fn test_env_override_applies() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SPATIAL_MATCH_RADIUS_M", "85.5");
        let cfg = MatchingConfig::from_env();
        assert_eq!(cfg.spatial_match_radius_m, 85.5);
        std::env::remove_var("SPATIAL_MATCH_RADIUS_M");
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MAX_BAD_MATCHES_IN_A_ROW", "plenty");
        let cfg = MatchingConfig::from_env();
        assert_eq!(cfg.max_bad_matches_in_a_row, 3);
        std::env::remove_var("MAX_BAD_MATCHES_IN_A_ROW");
    }

    #[test]
    fn test_config_requires_schedule_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("SCHEDULE_PATH");
        assert!(Config::from_env().is_err());

        std::env::set_var("SCHEDULE_PATH", "/tmp/schedule.json");
        let config = Config::from_env().unwrap();
        assert_eq!(config.schedule_path, "/tmp/schedule.json");
        assert_eq!(config.avl_subject, "headway.avl.reports");
        assert!(config.sched_based_blocks.is_empty());
        std::env::remove_var("SCHEDULE_PATH");
    }

    #[test]
    fn test_sched_based_blocks_parsed_from_csv_list() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SCHEDULE_PATH", "/tmp/schedule.json");
        std::env::set_var("SCHED_BASED_BLOCKS", "b1, b7,,b9");
        let config = Config::from_env().unwrap();
        assert_eq!(config.sched_based_blocks, vec!["b1", "b7", "b9"]);
        std::env::remove_var("SCHED_BASED_BLOCKS");
        std::env::remove_var("SCHEDULE_PATH");
    }
}
