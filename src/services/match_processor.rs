//! Downstream match consumer boundary.
//!
//! Prediction generation and arrival/departure inference live outside the
//! core; the orchestrator hands every successful match across this seam.

use tracing::debug;

use crate::types::VehicleState;

pub trait MatchProcessor: Send + Sync {
    /// Consume the results of a completed match: generate predictions,
    /// infer arrivals/departures, and so on.
    fn generate_results_of_match(&self, state: &VehicleState);

    /// Processor name for logging
    fn name(&self) -> &str;
}

/// Default processor when no prediction stack is wired in.
#[derive(Default)]
pub struct NoopMatchProcessor;

impl MatchProcessor for NoopMatchProcessor {
    fn generate_results_of_match(&self, state: &VehicleState) {
        debug!(
            vehicle_id = %state.vehicle_id,
            block_id = ?state.block_id,
            "Match results ready (no downstream processor configured)"
        );
    }

    fn name(&self) -> &str {
        "NoopMatchProcessor"
    }
}

/// Counts invocations; used in tests to assert the orchestrator delegates
/// after every successful match.
#[cfg(test)]
#[derive(Default)]
pub struct CountingMatchProcessor {
    calls: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl CountingMatchProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[cfg(test)]
impl MatchProcessor for CountingMatchProcessor {
    fn generate_results_of_match(&self, state: &VehicleState) {
        self.calls.lock().push(state.vehicle_id.clone());
    }

    fn name(&self) -> &str {
        "CountingMatchProcessor"
    }
}
