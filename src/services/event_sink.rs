//! Vehicle event publication.
//!
//! The pipeline treats event delivery as fire-and-forget: `publish` never
//! blocks matching and never fails the report. The NATS sink forwards
//! through a background task; at-least-once delivery is acceptable, the
//! receiver deduplicates on `(vehicle_id, time, kind)`.

use async_nats::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::types::VehicleEvent;

pub trait EventSink: Send + Sync {
    /// Hand an event off for delivery. Failures are logged, never
    /// propagated into the pipeline.
    fn publish(&self, event: VehicleEvent);

    /// Sink name for logging
    fn name(&self) -> &str;
}

/// Log-only sink used when no event transport is configured.
#[derive(Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: VehicleEvent) {
        info!(
            vehicle_id = %event.vehicle_id,
            kind = ?event.kind,
            description = %event.description,
            "Vehicle event"
        );
    }

    fn name(&self) -> &str {
        "LogEventSink"
    }
}

/// Publishes events as JSON to a NATS subject via a background forwarder
/// task, so the per-vehicle pipeline never waits on the wire.
pub struct NatsEventSink {
    tx: mpsc::UnboundedSender<VehicleEvent>,
}

impl NatsEventSink {
    pub fn new(client: Client, subject: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<VehicleEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let payload = match serde_json::to_vec(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize vehicle event");
                        continue;
                    }
                };
                if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                    warn!(
                        vehicle_id = %event.vehicle_id,
                        kind = ?event.kind,
                        error = %e,
                        "Failed to publish vehicle event"
                    );
                }
            }
            debug!("Event forwarder stopped");
        });

        Self { tx }
    }
}

impl EventSink for NatsEventSink {
    fn publish(&self, event: VehicleEvent) {
        if self.tx.send(event).is_err() {
            warn!("Event forwarder gone, dropping vehicle event");
        }
    }

    fn name(&self) -> &str {
        "NatsEventSink"
    }
}

/// In-memory sink collecting everything it is given, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct CollectingEventSink {
    events: parking_lot::Mutex<Vec<VehicleEvent>>,
}

#[cfg(test)]
impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VehicleEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<crate::types::VehicleEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
impl EventSink for CollectingEventSink {
    fn publish(&self, event: VehicleEvent) {
        self.events.lock().push(event);
    }

    fn name(&self) -> &str {
        "CollectingEventSink"
    }
}
