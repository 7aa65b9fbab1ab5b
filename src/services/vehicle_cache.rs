//! Outward-facing vehicle cache.
//!
//! Thread-safe store of the latest snapshot per vehicle, plus a
//! block-to-vehicles index. Snapshots are value copies, so readers never
//! synchronize with the orchestrator.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::types::VehicleSnapshot;

#[derive(Default)]
struct CacheInner {
    by_vehicle: HashMap<String, VehicleSnapshot>,
    by_block: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub struct VehicleDataCache {
    inner: RwLock<CacheInner>,
}

impl VehicleDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the latest snapshot for a vehicle, keeping the block index
    /// consistent with the snapshot's assignment.
    pub fn update_vehicle(&self, snapshot: VehicleSnapshot) {
        let mut inner = self.inner.write();

        let previous_block = inner
            .by_vehicle
            .get(&snapshot.vehicle_id)
            .and_then(|s| s.block_id.clone());

        if previous_block != snapshot.block_id {
            if let Some(old_block) = previous_block {
                let now_empty = match inner.by_block.get_mut(&old_block) {
                    Some(members) => {
                        members.remove(&snapshot.vehicle_id);
                        members.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    inner.by_block.remove(&old_block);
                }
            }
        }
        if let Some(block_id) = &snapshot.block_id {
            inner
                .by_block
                .entry(block_id.clone())
                .or_default()
                .insert(snapshot.vehicle_id.clone());
        }

        inner
            .by_vehicle
            .insert(snapshot.vehicle_id.clone(), snapshot);
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Option<VehicleSnapshot> {
        self.inner.read().by_vehicle.get(vehicle_id).cloned()
    }

    /// Vehicle ids currently assigned to a block, in id order.
    pub fn vehicles_for_block(&self, block_id: &str) -> Vec<String> {
        self.inner
            .read()
            .by_block
            .get(block_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_vehicles(&self) -> Vec<VehicleSnapshot> {
        let mut snapshots: Vec<VehicleSnapshot> =
            self.inner.read().by_vehicle.values().cloned().collect();
        snapshots.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        snapshots
    }
}
