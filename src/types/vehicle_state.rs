//! Per-vehicle mutable state. Mutated only under the vehicle's lock in the
//! state store; everything published outward is a value-copy snapshot.

use serde::{Deserialize, Serialize};

use crate::types::avl::AvlReport;
use crate::types::matches::{TemporalDifference, TemporalMatch};

/// How the current block assignment was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentMethod {
    AvlFeedBlock,
    AvlFeedRoute,
    AvlFeedTrip,
    ScheduleBased,
}

/// Why a block assignment was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnassignReason {
    CouldNotMatch,
    AssignmentTerminated,
    AssignmentGrabbed,
    Timeout,
}

/// An assignment that recently ended abnormally. While fresh, the vehicle
/// skips re-acquiring the same assignment id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemAssignment {
    pub assignment_id: String,
    pub at_ms: i64,
}

/// The per-vehicle record driven by the AVL processor.
///
/// Invariants:
/// - `predictable` implies both `current_match` and `block_id` are set.
/// - Clearing the match forces `predictable = false`.
/// - `bad_match_count` resets on any successful match.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle_id: String,
    pub last_report: Option<AvlReport>,
    pub current_match: Option<TemporalMatch>,
    pub block_id: Option<String>,
    pub assignment_id: Option<String>,
    pub assignment_method: Option<AssignmentMethod>,
    pub unassign_reason: Option<UnassignReason>,
    pub predictable: bool,
    pub bad_match_count: u32,
    pub sched_adherence: Option<TemporalDifference>,
    /// Placeholder vehicle generating schedule-based predictions. Holds a
    /// block only until a real vehicle grabs it.
    pub is_sched_based: bool,
    pub problem_assignment: Option<ProblemAssignment>,
    /// NOT_LEAVING_TERMINAL already reported for the current wait stop.
    pub late_at_terminal_reported: bool,
}

impl VehicleState {
    pub fn new(vehicle_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            last_report: None,
            current_match: None,
            block_id: None,
            assignment_id: None,
            assignment_method: None,
            unassign_reason: None,
            predictable: false,
            bad_match_count: 0,
            sched_adherence: None,
            is_sched_based: false,
            problem_assignment: None,
            late_at_terminal_reported: false,
        }
    }

    /// A schedule-based prediction placeholder holding `block_id`, matched
    /// synthetically to the start of the block's first active trip.
    pub fn schedule_based(
        vehicle_id: impl Into<String>,
        block_id: impl Into<String>,
        start_match: TemporalMatch,
    ) -> Self {
        let block_id = block_id.into();
        let mut state = Self::new(vehicle_id);
        state.is_sched_based = true;
        state.assign(
            block_id.clone(),
            block_id,
            AssignmentMethod::ScheduleBased,
            start_match,
        );
        state
    }

    /// Store a successful match. Resets the bad-match counter.
    pub fn set_match(&mut self, m: TemporalMatch) {
        self.current_match = Some(m);
        self.bad_match_count = 0;
    }

    /// Drop the match. A vehicle without a match is never predictable.
    pub fn clear_match(&mut self) {
        self.current_match = None;
        self.sched_adherence = None;
        self.predictable = false;
    }

    /// Take ownership of a block after a successful assignment match.
    pub fn assign(
        &mut self,
        block_id: impl Into<String>,
        assignment_id: impl Into<String>,
        method: AssignmentMethod,
        m: TemporalMatch,
    ) {
        self.block_id = Some(block_id.into());
        self.assignment_id = Some(assignment_id.into());
        self.assignment_method = Some(method);
        self.unassign_reason = None;
        self.set_match(m);
        self.predictable = true;
        self.late_at_terminal_reported = false;
    }

    /// Clear the block assignment and become unpredictable. The state
    /// object itself is retained in the store.
    pub fn unassign(&mut self, reason: UnassignReason) {
        if reason == UnassignReason::CouldNotMatch {
            if let (Some(assignment_id), Some(report)) = (&self.assignment_id, &self.last_report) {
                self.problem_assignment = Some(ProblemAssignment {
                    assignment_id: assignment_id.clone(),
                    at_ms: report.time,
                });
            }
        }
        self.block_id = None;
        self.assignment_id = None;
        self.assignment_method = None;
        self.unassign_reason = Some(reason);
        self.clear_match();
        self.bad_match_count = 0;
        self.late_at_terminal_reported = false;
    }

    pub fn record_bad_match(&mut self) -> u32 {
        self.bad_match_count += 1;
        self.bad_match_count
    }

    /// The report carries an assignment different from the current one.
    pub fn has_new_assignment(&self, report: &AvlReport) -> bool {
        report.has_valid_assignment() && report.assignment_id != self.assignment_id
    }

    /// The report's assignment recently ended with COULD_NOT_MATCH and the
    /// cooldown has not elapsed yet.
    pub fn previous_assignment_problematic(&self, report: &AvlReport, cooldown_ms: i64) -> bool {
        match (&self.problem_assignment, &report.assignment_id) {
            (Some(problem), Some(id)) => {
                problem.assignment_id == *id && report.time - problem.at_ms <= cooldown_ms
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            vehicle_id: self.vehicle_id.clone(),
            time: self.last_report.as_ref().map(|r| r.time).unwrap_or(0),
            lat: self.last_report.as_ref().map(|r| r.lat),
            lon: self.last_report.as_ref().map(|r| r.lon),
            predictable: self.predictable,
            block_id: self.block_id.clone(),
            trip_index: self.current_match.as_ref().map(|m| m.spatial.trip_index),
            stop_path_index: self
                .current_match
                .as_ref()
                .map(|m| m.spatial.stop_path_index),
            adherence_ms: self.sched_adherence.map(|d| d.as_ms()),
            is_sched_based: self.is_sched_based,
        }
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        if self.predictable {
            assert!(self.current_match.is_some(), "predictable without a match");
            assert!(self.block_id.is_some(), "predictable without a block");
        }
    }
}

/// Value copy published to the outward vehicle cache. Readers need no
/// synchronization with the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSnapshot {
    pub vehicle_id: String,
    pub time: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub predictable: bool,
    pub block_id: Option<String>,
    pub trip_index: Option<usize>,
    pub stop_path_index: Option<usize>,
    pub adherence_ms: Option<i64>,
    pub is_sched_based: bool,
}
