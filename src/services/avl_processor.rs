//! AVL processor: the per-report state machine executive.
//!
//! Holds the long-lived collaborators (schedule arena, state store,
//! outward cache, event sink, match consumer) behind shared references
//! and drives every AVL report through match / adherence / publication
//! under the vehicle's lock.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::schedule::ScheduleIndex;
use crate::services::adherence;
use crate::services::avl_archiver::AvlArchiver;
use crate::services::block_assigner::{self, AssignmentResolution};
use crate::services::event_sink::EventSink;
use crate::services::geo::haversine_distance_m;
use crate::services::match_processor::MatchProcessor;
use crate::services::spatial_matcher;
use crate::services::temporal_matcher;
use crate::services::timeout::TimeoutSweeper;
use crate::services::vehicle_cache::VehicleDataCache;
use crate::services::vehicle_store::{PendingDisplacement, VehicleStateStore};
use crate::types::{
    resolve_epoch_ms, AssignmentMethod, AssignmentType, AvlReport, Block, SpatialMatch,
    TemporalMatch, UnassignReason, VehicleEvent, VehicleEventKind, VehicleState,
};

pub struct AvlProcessor {
    schedule: Arc<ScheduleIndex>,
    store: Arc<VehicleStateStore>,
    cache: Arc<VehicleDataCache>,
    events: Arc<dyn EventSink>,
    match_processor: Arc<dyn MatchProcessor>,
    archiver: Option<AvlArchiver>,
    sweeper: TimeoutSweeper,
    config: MatchingConfig,
}

impl AvlProcessor {
    pub fn new(
        schedule: Arc<ScheduleIndex>,
        store: Arc<VehicleStateStore>,
        cache: Arc<VehicleDataCache>,
        events: Arc<dyn EventSink>,
        match_processor: Arc<dyn MatchProcessor>,
        archiver: Option<AvlArchiver>,
        config: MatchingConfig,
    ) -> Self {
        let sweeper = TimeoutSweeper::new(config.timeout_sweep_interval_ms);
        Self {
            schedule,
            store,
            cache,
            events,
            match_processor,
            archiver,
            sweeper,
            config,
        }
    }

    pub fn store(&self) -> &Arc<VehicleStateStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<VehicleDataCache> {
        &self.cache
    }

    /// Process one AVL report end to end: archive, stale sweep, matching
    /// under the vehicle lock, deferred displacements, cache publication.
    pub fn process_report(&self, report: AvlReport) {
        if let Err(reason) = report.validate() {
            warn!(vehicle_id = %report.vehicle_id, %reason, "Rejecting AVL report");
            return;
        }

        if !self.config.only_need_arrival_departures {
            if let Some(archiver) = &self.archiver {
                archiver.archive(&report);
            }
        }

        self.sweeper.maybe_sweep(
            report.time,
            self.config.max_stale_ms,
            &self.store,
            &self.cache,
            self.events.as_ref(),
        );

        let entry = self.store.entry(&report.vehicle_id);
        let snapshot = {
            let mut state = entry.lock();
            let previous_report = state.last_report.replace(report.clone());
            self.low_level_process_avl_report(&mut state, &report, previous_report.as_ref(), false);
            state.snapshot()
        };

        // Exclusivity displacements that could not honor the lock order
        // run here, with no vehicle lock held, and before the grabbing
        // vehicle reaches the outward cache.
        self.apply_deferred_displacements();

        self.cache.update_vehicle(snapshot);
    }

    /// The state machine core. `recursive` marks the single re-entry
    /// allowed after end-of-block handling.
    fn low_level_process_avl_report(
        &self,
        state: &mut VehicleState,
        report: &AvlReport,
        previous_report: Option<&AvlReport>,
        recursive: bool,
    ) {
        let has_new_assignment = state.has_new_assignment(report);
        // An assignment change reported while the vehicle runs the final
        // stop path of its block is deferred: the block finishes through
        // end-of-block handling, which then re-enters with the new
        // assignment.
        let finishing_block = self.on_last_stop_path(state);
        let problematic = state
            .previous_assignment_problematic(report, self.config.assignment_cooldown_ms);

        let match_already_predictable =
            state.predictable && (!has_new_assignment || finishing_block);
        let match_to_new_assignment = report.has_valid_assignment()
            && (!state.predictable || (has_new_assignment && !finishing_block))
            && !problematic;

        if match_already_predictable {
            self.match_predictable_vehicle(state, report, previous_report);
        } else if match_to_new_assignment {
            self.match_vehicle_to_new_assignment(state, report, false);
        } else {
            if problematic {
                info!(
                    vehicle_id = %state.vehicle_id,
                    assignment_id = ?report.assignment_id,
                    "Skipping re-assignment, previous attempt failed recently"
                );
            }
            if state.current_match.is_some() {
                state.clear_match();
            }
        }

        if state.predictable && state.current_match.is_some() {
            self.process_results_of_match(state, report, previous_report, recursive);
        }
    }

    /// Branch (a): re-match a vehicle that already has a block.
    fn match_predictable_vehicle(
        &self,
        state: &mut VehicleState,
        report: &AvlReport,
        previous_report: Option<&AvlReport>,
    ) {
        debug_assert!(
            state.predictable,
            "re-match called on a non-predictable vehicle"
        );
        let Some(previous_match) = state.current_match.clone() else {
            error!(
                vehicle_id = %state.vehicle_id,
                "Predictable vehicle without a match, dropping assignment"
            );
            state.unassign(UnassignReason::CouldNotMatch);
            return;
        };
        let Some(block) = self.schedule.block(&previous_match.spatial.block_id) else {
            error!(
                vehicle_id = %state.vehicle_id,
                block_id = %previous_match.spatial.block_id,
                "Matched block missing from schedule, dropping assignment"
            );
            state.unassign(UnassignReason::CouldNotMatch);
            return;
        };

        let candidates: Vec<SpatialMatch> =
            spatial_matcher::match_from_previous(report, block, &previous_match.spatial, &self.config)
                .into_iter()
                .filter(|c| !c.heading_mismatch)
                .collect();

        let elapsed_ms = previous_report
            .map(|prev| report.time - prev.time)
            .unwrap_or(0);

        match temporal_matcher::best_temporal_match(
            &previous_match.spatial,
            elapsed_ms,
            block,
            &candidates,
            &self.config,
        ) {
            Some(new_match) => {
                state.set_match(new_match);
            }
            None => {
                let bad_matches = state.record_bad_match();
                if bad_matches > self.config.max_bad_matches_in_a_row {
                    self.events.publish(VehicleEvent::new(
                        report,
                        state.current_match.as_ref(),
                        VehicleEventKind::NoMatch,
                        format!("{bad_matches} consecutive reports without a usable match"),
                        false,
                        true,
                    ));
                    state.unassign(UnassignReason::CouldNotMatch);
                } else {
                    // Transient drop-out: keep the previous match.
                    debug!(
                        vehicle_id = %state.vehicle_id,
                        bad_matches,
                        limit = self.config.max_bad_matches_in_a_row,
                        "No usable match, retaining previous one"
                    );
                }
            }
        }
    }

    /// Branch (b): acquire the assignment carried by the report. With
    /// `forced` set (adherence recovery), a report without an assignment
    /// falls back to the block the vehicle already held.
    fn match_vehicle_to_new_assignment(
        &self,
        state: &mut VehicleState,
        report: &AvlReport,
        forced: bool,
    ) {
        if state.predictable {
            self.events.publish(VehicleEvent::new(
                report,
                state.current_match.as_ref(),
                VehicleEventKind::AssignmentTerminated,
                "assignment replaced by the one on the AVL report",
                false,
                true,
            ));
            state.unassign(UnassignReason::AssignmentTerminated);
        }

        let resolution = block_assigner::resolve(report, &self.schedule).or_else(|| {
            if forced {
                state.block_id.clone().map(AssignmentResolution::Block)
            } else {
                None
            }
        });
        let Some(resolution) = resolution else {
            debug!(vehicle_id = %state.vehicle_id, "No usable assignment to match");
            return;
        };

        let matched = match &resolution {
            AssignmentResolution::Block(block_id) => self
                .schedule
                .block(block_id)
                .and_then(|block| self.match_to_block(report, block))
                .map(|m| (block_id.clone(), m)),
            AssignmentResolution::Route(route_id) => self.match_to_route(report, route_id),
        };

        let Some((block_id, new_match)) = matched else {
            debug!(
                vehicle_id = %state.vehicle_id,
                assignment = ?resolution,
                "Could not match vehicle to assignment"
            );
            return;
        };

        let assignment_id = report
            .assignment_id
            .clone()
            .unwrap_or_else(|| block_id.clone());
        let method = match report.assignment_type {
            AssignmentType::Route => AssignmentMethod::AvlFeedRoute,
            AssignmentType::Trip => AssignmentMethod::AvlFeedTrip,
            _ => AssignmentMethod::AvlFeedBlock,
        };
        state.assign(block_id.clone(), assignment_id, method, new_match);

        self.events.publish(VehicleEvent::new(
            report,
            state.current_match.as_ref(),
            VehicleEventKind::Predictable,
            "vehicle matched to assignment",
            true,
            false,
        ));

        self.grab_exclusive_block(state, report, &block_id);
    }

    /// Candidates over the currently active trips of one block, with the
    /// layover fallback for vehicles waiting off the path geometry.
    fn match_to_block(&self, report: &AvlReport, block: &Block) -> Option<TemporalMatch> {
        if !block.is_active(
            report.time,
            self.config.trip_active_early_sec,
            self.config.trip_active_late_sec,
        ) {
            debug!(
                vehicle_id = %report.vehicle_id,
                block_id = %block.id,
                "Block not active around the report time"
            );
            return None;
        }

        let trips = block.trips_active_at(
            report.time,
            self.config.trip_active_early_sec,
            self.config.trip_active_late_sec,
        );

        let candidates: Vec<SpatialMatch> =
            spatial_matcher::match_unconstrained(report, block, &trips, &self.config)
                .into_iter()
                .filter(|c| !c.heading_mismatch)
                .collect();

        if let Some(m) = temporal_matcher::best_temporal_match_compared_to_schedule(
            report,
            block,
            &candidates,
            &self.config,
        ) {
            return Some(m);
        }

        // Last resort: the vehicle may sit at a terminal away from the
        // path geometry. Synthesize a match at the trip start.
        let trip_index = temporal_matcher::match_to_layover_stop_even_if_off_route(
            report,
            block,
            &trips,
            &self.config,
        )?;
        let distance_m = block
            .trip(trip_index)
            .and_then(|t| t.stop_paths.first())
            .and_then(|p| p.stop_location())
            .map(|terminal| haversine_distance_m(&report.location(), &terminal))
            .unwrap_or(0.0);

        Some(temporal_matcher::trip_start_match(
            &report.vehicle_id,
            block,
            trip_index,
            distance_m,
        ))
    }

    /// Route assignment: union the active blocks of the route and keep
    /// only candidates clearly in progress on a trip.
    fn match_to_route(&self, report: &AvlReport, route_id: &str) -> Option<(String, TemporalMatch)> {
        let mut best: Option<(String, TemporalMatch)> = None;

        for block in self.schedule.active_blocks_for_route(route_id, report.time) {
            if !block.is_active(
                report.time,
                self.config.trip_active_early_sec,
                self.config.trip_active_late_sec,
            ) {
                continue;
            }
            let trips = block.trips_active_at(
                report.time,
                self.config.trip_active_early_sec,
                self.config.trip_active_late_sec,
            );

            let candidates: Vec<SpatialMatch> =
                spatial_matcher::match_unconstrained(report, block, &trips, &self.config)
                    .into_iter()
                    .filter(|c| !c.heading_mismatch)
                    .filter(|c| self.clearly_in_progress(block, c))
                    .collect();

            if let Some(m) = temporal_matcher::best_temporal_match_compared_to_schedule(
                report,
                block,
                &candidates,
                &self.config,
            ) {
                let better = best
                    .as_ref()
                    .map(|(_, current)| {
                        m.difference.as_ms().abs() < current.difference.as_ms().abs()
                    })
                    .unwrap_or(true);
                if better {
                    best = Some((block.id.clone(), m));
                }
            }
        }

        best
    }

    /// Far enough from both trip terminals for route matching.
    fn clearly_in_progress(&self, block: &Block, candidate: &SpatialMatch) -> bool {
        let Some(trip) = block.trip(candidate.trip_index) else {
            return false;
        };
        if trip
            .stop_path(candidate.stop_path_index)
            .map(|p| p.is_layover)
            .unwrap_or(true)
        {
            return false;
        }
        let along = candidate.distance_along_trip_m(trip);
        let minimum = self.config.terminal_distance_for_route_matching_m;
        along >= minimum && (trip.length_m() - along) >= minimum
    }

    /// Exclusivity sweep: displace every other holder of the block when
    /// the block is exclusive or the holder is a schedule-based
    /// placeholder. Foreign locks are only taken in `vehicle_id` order;
    /// out-of-order displacements are deferred.
    fn grab_exclusive_block(&self, state: &VehicleState, report: &AvlReport, block_id: &str) {
        let exclusive = self
            .schedule
            .block(block_id)
            .map(Block::should_be_exclusive)
            .unwrap_or(true);

        for other_id in self.cache.vehicles_for_block(block_id) {
            if other_id == state.vehicle_id {
                continue;
            }
            if other_id.as_str() > state.vehicle_id.as_str() {
                let Some(entry) = self.store.get(&other_id) else {
                    continue;
                };
                let mut other = entry.lock();
                self.displace_holder(&mut other, block_id, &state.vehicle_id, exclusive, report.time);
            } else {
                // Acquiring this lock while holding ours would invert the
                // id order; hand the displacement to the queue instead.
                self.store.defer_displacement(PendingDisplacement {
                    vehicle_id: other_id,
                    block_id: block_id.to_string(),
                    grabbed_by: state.vehicle_id.clone(),
                    grabbed_at_ms: report.time,
                });
            }
        }
    }

    fn apply_deferred_displacements(&self) {
        for pending in self.store.drain_displacements() {
            let Some(entry) = self.store.get(&pending.vehicle_id) else {
                continue;
            };
            let exclusive = self
                .schedule
                .block(&pending.block_id)
                .map(Block::should_be_exclusive)
                .unwrap_or(true);
            let mut other = entry.lock();
            self.displace_holder(
                &mut other,
                &pending.block_id,
                &pending.grabbed_by,
                exclusive,
                pending.grabbed_at_ms,
            );
        }
    }

    /// `make_unpredictable_and_grab_assignment` on one foreign vehicle.
    fn displace_holder(
        &self,
        other: &mut VehicleState,
        block_id: &str,
        grabbed_by: &str,
        exclusive: bool,
        time_ms: i64,
    ) {
        if !other.predictable || other.block_id.as_deref() != Some(block_id) {
            return;
        }
        if !exclusive && !other.is_sched_based {
            return;
        }

        self.events.publish(VehicleEvent {
            id: Uuid::new_v4(),
            vehicle_id: other.vehicle_id.clone(),
            time: other.last_report.as_ref().map(|r| r.time).unwrap_or(time_ms),
            lat: other.last_report.as_ref().map(|r| r.lat).unwrap_or(0.0),
            lon: other.last_report.as_ref().map(|r| r.lon).unwrap_or(0.0),
            kind: VehicleEventKind::AssignmentGrabbed,
            description: format!("block {block_id} grabbed by vehicle {grabbed_by}"),
            predictable: false,
            became_unpredictable: true,
            block_id: Some(block_id.to_string()),
            trip_index: other.current_match.as_ref().map(|m| m.spatial.trip_index),
            supervisor: None,
        });
        info!(
            vehicle_id = %other.vehicle_id,
            block_id,
            grabbed_by,
            "Displaced vehicle from exclusive block"
        );
        other.unassign(UnassignReason::AssignmentGrabbed);
        self.cache.update_vehicle(other.snapshot());
    }

    /// Branch (c): adherence, sanity recovery, downstream results,
    /// end-of-block handling.
    fn process_results_of_match(
        &self,
        state: &mut VehicleState,
        report: &AvlReport,
        previous_report: Option<&AvlReport>,
        recursive: bool,
    ) {
        state.sched_adherence = adherence::generate(state, &self.schedule);
        if let Some(effective) = adherence::generate_effective_schedule_difference(state, &self.schedule)
        {
            debug!(
                vehicle_id = %state.vehicle_id,
                effective_ms = effective.as_ms(),
                adherence_ms = ?state.sched_adherence.map(|d| d.as_ms()),
                "Schedule position"
            );
        }
        self.check_not_leaving_terminal(state, report);

        if let Some(difference) = state.sched_adherence {
            let limits = adherence::adherence_limits(state, &self.config);
            if !difference.within_bounds(&limits) {
                let direction = if difference.is_early() {
                    "early"
                } else if difference.is_late() {
                    "late"
                } else {
                    "on time"
                };
                self.events.publish(VehicleEvent::new(
                    report,
                    state.current_match.as_ref(),
                    VehicleEventKind::NoMatch,
                    format!(
                        "schedule adherence {} ms ({direction}) outside sanity bounds",
                        difference.as_ms()
                    ),
                    false,
                    true,
                ));
                state.clear_match();

                // One forced reassignment attempt, then give up.
                self.match_vehicle_to_new_assignment(state, report, true);
                if !state.predictable {
                    state.unassign(UnassignReason::CouldNotMatch);
                    return;
                }
                state.sched_adherence = adherence::generate(state, &self.schedule);
                if let Some(recovered) = state.sched_adherence {
                    let limits = adherence::adherence_limits(state, &self.config);
                    if !recovered.within_bounds(&limits) {
                        self.events.publish(VehicleEvent::new(
                            report,
                            state.current_match.as_ref(),
                            VehicleEventKind::NoMatch,
                            "schedule adherence still outside bounds after re-match",
                            false,
                            true,
                        ));
                        state.unassign(UnassignReason::CouldNotMatch);
                        return;
                    }
                }
            }
        }

        self.match_processor.generate_results_of_match(state);

        let at_end_of_block = state
            .current_match
            .as_ref()
            .is_some_and(TemporalMatch::at_end_of_block);
        if at_end_of_block {
            self.events.publish(VehicleEvent::new(
                report,
                state.current_match.as_ref(),
                VehicleEventKind::EndOfBlock,
                "vehicle reached the end of its block",
                false,
                true,
            ));
            state.unassign(UnassignReason::AssignmentTerminated);

            if recursive {
                error!(
                    vehicle_id = %state.vehicle_id,
                    "End-of-block recursion guard triggered, not re-entering"
                );
                return;
            }
            // Exactly one re-entry, typically picking up the next
            // assignment carried on the same report.
            self.low_level_process_avl_report(state, report, previous_report, true);
        }
    }

    fn check_not_leaving_terminal(&self, state: &mut VehicleState, report: &AvlReport) {
        let at_wait_stop_departure = state.current_match.as_ref().and_then(|m| {
            m.at_stop
                .as_ref()
                .filter(|info| info.is_wait_stop)
                .and_then(|info| info.scheduled_time.as_ref()?.departure_sec)
        });

        let Some(departure_sec) = at_wait_stop_departure else {
            state.late_at_terminal_reported = false;
            return;
        };

        let departure_ms = resolve_epoch_ms(departure_sec, report.time);
        if report.time > departure_ms + self.config.allowable_late_at_terminal_ms {
            if !state.late_at_terminal_reported {
                self.events.publish(VehicleEvent::new(
                    report,
                    state.current_match.as_ref(),
                    VehicleEventKind::NotLeavingTerminal,
                    format!(
                        "still at wait stop {} ms past scheduled departure",
                        report.time - departure_ms
                    ),
                    true,
                    false,
                ));
                state.late_at_terminal_reported = true;
            }
        }
    }

    fn on_last_stop_path(&self, state: &VehicleState) -> bool {
        state
            .current_match
            .as_ref()
            .and_then(|m| {
                self.schedule
                    .block(&m.spatial.block_id)
                    .map(|block| m.spatial.is_on_last_stop_path(block))
            })
            .unwrap_or(false)
    }

    /// Create a schedule-based prediction placeholder holding a block.
    /// Displaced by any real vehicle acquiring the block.
    pub fn create_schedule_based_vehicle(&self, vehicle_id: &str, block_id: &str) -> bool {
        let Some(block) = self.schedule.block(block_id) else {
            warn!(block_id, "Cannot create schedule-based vehicle, unknown block");
            return false;
        };
        let start_match = temporal_matcher::trip_start_match(vehicle_id, block, 0, 0.0);
        let state = VehicleState::schedule_based(vehicle_id, block_id, start_match);
        let snapshot = state.snapshot();
        self.store.insert(state);
        self.cache.update_vehicle(snapshot);
        true
    }
}
