//! Stale-vehicle sweep.
//!
//! Runs at AVL-report cadence (rate-limited by an interval) and marks
//! vehicles unpredictable when their last fix is older than the staleness
//! bound. State objects are retained; only the assignment is cleared.

use parking_lot::Mutex;
use tracing::info;

use crate::services::event_sink::EventSink;
use crate::services::vehicle_cache::VehicleDataCache;
use crate::services::vehicle_store::VehicleStateStore;
use crate::types::{UnassignReason, VehicleEvent, VehicleEventKind};

pub struct TimeoutSweeper {
    interval_ms: i64,
    last_sweep_ms: Mutex<i64>,
}

impl TimeoutSweeper {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            last_sweep_ms: Mutex::new(0),
        }
    }

    /// Sweep if the interval elapsed. Returns the ids of vehicles marked
    /// unpredictable. Must be called without holding any vehicle lock.
    pub fn maybe_sweep(
        &self,
        now_ms: i64,
        max_stale_ms: i64,
        store: &VehicleStateStore,
        cache: &VehicleDataCache,
        events: &dyn EventSink,
    ) -> Vec<String> {
        {
            let mut last = self.last_sweep_ms.lock();
            if now_ms - *last < self.interval_ms {
                return Vec::new();
            }
            *last = now_ms;
        }
        self.sweep(now_ms, max_stale_ms, store, cache, events)
    }

    /// Unconditional sweep.
    pub fn sweep(
        &self,
        now_ms: i64,
        max_stale_ms: i64,
        store: &VehicleStateStore,
        cache: &VehicleDataCache,
        events: &dyn EventSink,
    ) -> Vec<String> {
        let mut timed_out = Vec::new();

        for vehicle_id in store.vehicle_ids() {
            let Some(entry) = store.get(&vehicle_id) else {
                continue;
            };
            let mut state = entry.lock();

            if !state.predictable {
                continue;
            }
            let Some(last_report) = state.last_report.clone() else {
                // Schedule-based placeholders have no AVL and never go
                // stale.
                continue;
            };
            if now_ms - last_report.time <= max_stale_ms {
                continue;
            }

            let stale_for_ms = now_ms - last_report.time;
            events.publish(VehicleEvent::new(
                &last_report,
                state.current_match.as_ref(),
                VehicleEventKind::Timeout,
                format!("no AVL report for {} s", stale_for_ms / 1000),
                false,
                true,
            ));
            state.unassign(UnassignReason::Timeout);
            cache.update_vehicle(state.snapshot());
            timed_out.push(vehicle_id);
        }

        if !timed_out.is_empty() {
            info!(count = timed_out.len(), "Marked stale vehicles unpredictable");
        }
        timed_out
    }
}
