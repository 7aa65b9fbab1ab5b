//! Per-vehicle state store.
//!
//! Each vehicle owns a `Mutex<VehicleState>`; the lock is held for the
//! whole per-report pipeline, which serializes same-vehicle reports while
//! different vehicles proceed in parallel.
//!
//! Lock discipline: while holding one vehicle's lock, another vehicle's
//! lock may only be acquired when its `vehicle_id` orders strictly after
//! the held one. Displacements that would violate the order are deferred
//! through the queue here and drained once no vehicle lock is held.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::types::VehicleState;

pub type VehicleEntry = Arc<Mutex<VehicleState>>;

/// A displacement that could not be applied inline because of the lock
/// ordering; applied by the processor after the sweep's own lock is
/// released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDisplacement {
    pub vehicle_id: String,
    pub block_id: String,
    pub grabbed_by: String,
    /// Time of the AVL report whose processing grabbed the block.
    pub grabbed_at_ms: i64,
}

#[derive(Default)]
pub struct VehicleStateStore {
    vehicles: RwLock<HashMap<String, VehicleEntry>>,
    deferred: Mutex<VecDeque<PendingDisplacement>>,
}

impl VehicleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state entry for a vehicle, created on first sighting. The
    /// state object persists until explicit eviction.
    pub fn entry(&self, vehicle_id: &str) -> VehicleEntry {
        if let Some(entry) = self.vehicles.read().get(vehicle_id) {
            return entry.clone();
        }
        self.vehicles
            .write()
            .entry(vehicle_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VehicleState::new(vehicle_id))))
            .clone()
    }

    pub fn get(&self, vehicle_id: &str) -> Option<VehicleEntry> {
        self.vehicles.read().get(vehicle_id).cloned()
    }

    /// Insert a prepared state (schedule-based placeholders), replacing
    /// any existing entry for the vehicle.
    pub fn insert(&self, state: VehicleState) -> VehicleEntry {
        let entry = Arc::new(Mutex::new(state));
        let vehicle_id = entry.lock().vehicle_id.clone();
        self.vehicles.write().insert(vehicle_id, entry.clone());
        entry
    }

    /// Explicitly evict a vehicle. Idle vehicles are merely swept
    /// unpredictable, never evicted implicitly.
    pub fn evict(&self, vehicle_id: &str) -> bool {
        self.vehicles.write().remove(vehicle_id).is_some()
    }

    pub fn vehicle_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.vehicles.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn defer_displacement(&self, displacement: PendingDisplacement) {
        self.deferred.lock().push_back(displacement);
    }

    pub fn drain_displacements(&self) -> Vec<PendingDisplacement> {
        self.deferred.lock().drain(..).collect()
    }
}
