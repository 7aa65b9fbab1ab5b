//! AVL feed consumption.
//!
//! Reports arrive as JSON on a NATS subject and are fanned out to a
//! sharded worker pool: every report for one vehicle lands on the same
//! worker, preserving per-vehicle feed order end to end. Cross-vehicle
//! parallelism comes from the shards; same-vehicle serialization is
//! additionally guaranteed by the per-vehicle lock in the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::avl_processor::AvlProcessor;
use crate::types::AvlReport;

pub async fn handle_avl_feed(
    mut subscriber: async_nats::Subscriber,
    processor: Arc<AvlProcessor>,
    worker_count: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    let worker_count = worker_count.max(1);
    let mut senders = Vec::with_capacity(worker_count);
    let mut workers = Vec::with_capacity(worker_count);

    for worker_index in 0..worker_count {
        let (tx, mut rx) = mpsc::channel::<AvlReport>(1024);
        senders.push(tx);

        let processor = Arc::clone(&processor);
        workers.push(tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                processor.process_report(report);
            }
            debug!(worker_index, "AVL worker stopped");
        }));
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping AVL feed");
                break;
            }
            message = subscriber.next() => {
                let Some(message) = message else {
                    warn!("AVL subscription closed");
                    break;
                };
                let report: AvlReport = match serde_json::from_slice(&message.payload) {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse AVL report, skipping");
                        continue;
                    }
                };

                let shard = shard_for(&report.vehicle_id, worker_count);
                if senders[shard].send(report).await.is_err() {
                    error!(shard, "AVL worker gone, stopping feed");
                    break;
                }
            }
        }
    }

    // Closing the channels lets the workers drain and exit.
    drop(senders);
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

/// Stable vehicle-to-worker assignment.
fn shard_for(vehicle_id: &str, worker_count: usize) -> usize {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    vehicle_id.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count
}

/// Drive archived reports through the pipeline in feed order.
///
/// `speed` scales the gaps between report timestamps (2.0 = twice as
/// fast); zero replays as fast as possible. Single-threaded on purpose:
/// replaying a feed in order reproduces the per-vehicle terminal state.
pub async fn replay_reports(
    processor: Arc<AvlProcessor>,
    reports: Vec<AvlReport>,
    speed: f64,
) -> usize {
    let mut previous_time: Option<i64> = None;
    let mut processed = 0;

    for report in reports {
        if speed > 0.0 {
            if let Some(previous) = previous_time {
                let gap_ms = ((report.time - previous).max(0) as f64 / speed) as u64;
                if gap_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(gap_ms.min(60_000))).await;
                }
            }
            previous_time = Some(report.time);
        }
        processor.process_report(report);
        processed += 1;
    }

    info!(processed, "Replay finished");
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchingConfig;
    use crate::schedule::ScheduleIndex;
    use crate::services::event_sink::CollectingEventSink;
    use crate::services::match_processor::NoopMatchProcessor;
    use crate::services::vehicle_cache::VehicleDataCache;
    use crate::services::vehicle_store::VehicleStateStore;
    use crate::types::{
        AssignmentType, Block, Location, ScheduleTime, StopPath, TravelTimes, Trip,
    };

    fn processor() -> Arc<AvlProcessor> {
        let block = Block {
            id: "b1".to_string(),
            service_id: "daily".to_string(),
            start_time_sec: 0,
            end_time_sec: 86_399,
            exclusive: true,
            trips: vec![Trip {
                id: "t1".to_string(),
                route_id: "r1".to_string(),
                headsign: None,
                start_time_sec: 0,
                end_time_sec: 86_399,
                stop_paths: vec![StopPath {
                    stop_id: "s1".to_string(),
                    stop_name: None,
                    points: vec![Location::new(50.0, 14.0), Location::new(50.009, 14.0)],
                    is_wait_stop: false,
                    is_layover: false,
                    schedule_time: Some(ScheduleTime {
                        arrival_sec: Some(43_200),
                        departure_sec: Some(43_200),
                    }),
                    travel_times: TravelTimes {
                        segment_times_ms: vec![600_000],
                        stop_dwell_ms: 0,
                    },
                    segment_lengths_m: vec![],
                }],
            }],
        };
        let schedule = Arc::new(ScheduleIndex::new(vec![], vec![block]).unwrap());
        Arc::new(AvlProcessor::new(
            schedule,
            Arc::new(VehicleStateStore::new()),
            Arc::new(VehicleDataCache::new()),
            Arc::new(CollectingEventSink::new()),
            Arc::new(NoopMatchProcessor),
            None,
            MatchingConfig::default(),
        ))
    }

    #[test]
    fn test_replay_drives_reports_in_order() {
        let processor = processor();
        let reports = vec![
            AvlReport {
                vehicle_id: "v1".to_string(),
                time: 1_700_000_000_000,
                lat: 50.0,
                lon: 14.0,
                heading: None,
                speed: None,
                assignment_id: Some("b1".to_string()),
                assignment_type: AssignmentType::Block,
            },
            AvlReport {
                vehicle_id: "v2".to_string(),
                time: 1_700_000_030_000,
                lat: 50.004,
                lon: 14.0,
                heading: None,
                speed: None,
                assignment_id: None,
                assignment_type: AssignmentType::None,
            },
        ];

        let processed =
            tokio_test::block_on(replay_reports(processor.clone(), reports, 0.0));
        assert_eq!(processed, 2);
        assert!(processor.store().get("v1").is_some());
        assert!(processor.store().get("v2").is_some());
    }

    #[test]
    fn test_shard_is_stable_and_in_range() {
        for workers in [1, 2, 4, 7] {
            for id in ["v1", "1701", "bus-42", ""] {
                let shard = shard_for(id, workers);
                assert!(shard < workers);
                assert_eq!(shard, shard_for(id, workers));
            }
        }
    }

    #[test]
    fn test_shards_spread_vehicles() {
        let workers = 4;
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            seen.insert(shard_for(&format!("vehicle-{i}"), workers));
        }
        // With 64 vehicles all four shards should be in use.
        assert_eq!(seen.len(), workers);
    }
}
