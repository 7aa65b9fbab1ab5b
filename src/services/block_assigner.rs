//! Resolution of AVL assignment hints to schedule entities.

use tracing::debug;

use crate::schedule::ScheduleIndex;
use crate::types::{AssignmentType, AvlReport};

/// What an AVL assignment hint resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentResolution {
    /// A concrete block to match against.
    Block(String),
    /// A route: the orchestrator enumerates its active blocks.
    Route(String),
}

/// Resolve the assignment hint on a report against the services active at
/// the report time. `None` when the report carries no usable assignment
/// or the referenced entity is not active.
pub fn resolve(report: &AvlReport, schedule: &ScheduleIndex) -> Option<AssignmentResolution> {
    let assignment_id = report.assignment_id.as_deref()?;
    if assignment_id.is_empty() {
        return None;
    }

    match report.assignment_type {
        AssignmentType::Block => match schedule.active_block(assignment_id, report.time) {
            Some(block) => Some(AssignmentResolution::Block(block.id.clone())),
            None => {
                debug!(
                    vehicle_id = %report.vehicle_id,
                    block_id = %assignment_id,
                    "Block assignment not active at report time"
                );
                None
            }
        },
        AssignmentType::Trip => match schedule.block_for_trip(assignment_id) {
            Some(block) if schedule.active_block(&block.id, report.time).is_some() => {
                Some(AssignmentResolution::Block(block.id.clone()))
            }
            _ => {
                debug!(
                    vehicle_id = %report.vehicle_id,
                    trip_id = %assignment_id,
                    "Trip assignment does not resolve to an active block"
                );
                None
            }
        },
        AssignmentType::Route => Some(AssignmentResolution::Route(assignment_id.to_string())),
        AssignmentType::None => None,
    }
}
