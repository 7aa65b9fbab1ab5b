//! Vehicle events emitted by the orchestrator and handed to the event sink.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::avl::AvlReport;
use crate::types::matches::TemporalMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleEventKind {
    Predictable,
    NoMatch,
    EndOfBlock,
    NotLeavingTerminal,
    AssignmentGrabbed,
    AssignmentTerminated,
    Timeout,
}

/// What happened to a vehicle, with enough context for downstream
/// consumers. Delivery is at-least-once; receivers deduplicate on
/// `(vehicle_id, time, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleEvent {
    pub id: Uuid,
    pub vehicle_id: String,
    /// Time of the AVL report that triggered the event, epoch ms.
    pub time: i64,
    pub lat: f64,
    pub lon: f64,
    pub kind: VehicleEventKind,
    pub description: String,
    pub predictable: bool,
    pub became_unpredictable: bool,
    pub block_id: Option<String>,
    pub trip_index: Option<usize>,
    pub supervisor: Option<String>,
}

impl VehicleEvent {
    pub fn new(
        report: &AvlReport,
        current_match: Option<&TemporalMatch>,
        kind: VehicleEventKind,
        description: impl Into<String>,
        predictable: bool,
        became_unpredictable: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_id: report.vehicle_id.clone(),
            time: report.time,
            lat: report.lat,
            lon: report.lon,
            kind,
            description: description.into(),
            predictable,
            became_unpredictable,
            block_id: current_match.map(|m| m.spatial.block_id.clone()),
            trip_index: current_match.map(|m| m.spatial.trip_index),
            supervisor: None,
        }
    }
}
