//! Default matching thresholds. Every value can be overridden through the
//! environment; see `config.rs`.

/// Perpendicular distance gate for matching a fix to a segment.
pub const DEFAULT_SPATIAL_MATCH_RADIUS_M: f64 = 60.0;

/// Widened gate at terminals and layovers, where vehicles park off the
/// path geometry.
pub const DEFAULT_LAYOVER_MATCH_RADIUS_M: f64 = 200.0;

/// Last-resort radius for matching a vehicle to a layover terminal even
/// when it is off route.
pub const DEFAULT_WIDE_TERMINAL_RADIUS_M: f64 = 1_000.0;

/// A match within this distance of a stop counts as "at the stop".
pub const DEFAULT_STOP_MATCH_RADIUS_M: f64 = 40.0;

/// Reject candidates whose segment bearing disagrees with the AVL heading
/// by more than this (outside layovers).
pub const DEFAULT_HEADING_TOLERANCE_DEG: f64 = 60.0;

/// How far ahead of the previous match the re-match walk extends.
pub const DEFAULT_FORWARD_LOOKAHEAD_M: f64 = 3_000.0;

/// How far behind the previous match the walk may reach, absorbing GPS
/// jitter.
pub const DEFAULT_BACKWARD_TOLERANCE_M: f64 = 150.0;

/// Route-assignment matching requires the vehicle at least this far from
/// a terminal (clearly in progress on a trip).
pub const DEFAULT_TERMINAL_DISTANCE_FOR_ROUTE_MATCHING_M: f64 = 250.0;

/// Consecutive failed re-matches tolerated before the vehicle becomes
/// unpredictable.
pub const DEFAULT_MAX_BAD_MATCHES_IN_A_ROW: u32 = 3;

/// Sitting at a wait stop this long past the scheduled departure logs a
/// NOT_LEAVING_TERMINAL event.
pub const DEFAULT_ALLOWABLE_LATE_AT_TERMINAL_MS: i64 = 4 * 60 * 1000;

/// Adherence sanity bounds.
pub const DEFAULT_MAX_SCHEDULE_ADHERENCE_EARLY_MS: i64 = 15 * 60 * 1000;
pub const DEFAULT_MAX_SCHEDULE_ADHERENCE_LATE_MS: i64 = 90 * 60 * 1000;

/// Schedule-based placeholder vehicles get this much wider sanity bounds.
pub const DEFAULT_SCHED_BASED_BOUNDS_FACTOR: f64 = 2.0;

/// Margins for deciding which trips of a block are currently active.
pub const DEFAULT_TRIP_ACTIVE_EARLY_SEC: u32 = 20 * 60;
pub const DEFAULT_TRIP_ACTIVE_LATE_SEC: u32 = 90 * 60;

/// A vehicle silent for longer than this is swept unpredictable.
pub const DEFAULT_MAX_STALE_MS: i64 = 15 * 60 * 1000;

/// Minimum spacing between stale-vehicle sweeps.
pub const DEFAULT_TIMEOUT_SWEEP_INTERVAL_MS: i64 = 30 * 1000;

/// After COULD_NOT_MATCH, skip re-acquiring the same assignment for this
/// long.
pub const DEFAULT_ASSIGNMENT_COOLDOWN_MS: i64 = 5 * 60 * 1000;

/// Parallel feed workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;
