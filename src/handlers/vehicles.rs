//! Vehicle query handlers.
//!
//! Request/reply access to the outward vehicle cache: list all vehicles,
//! fetch one, enumerate the holders of a block, and explicitly evict a
//! retired vehicle from the state store.

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use tracing::error;
use uuid::Uuid;

use crate::services::avl_processor::AvlProcessor;
use crate::types::{
    EmptyPayload, ErrorResponse, EvictVehicleRequest, Request, SuccessResponse, VehicleGetRequest,
    VehicleListResponse, VehiclesByBlockRequest,
};

async fn reply<T: serde::Serialize>(client: &Client, subject: async_nats::Subject, response: &T) {
    match serde_json::to_vec(response) {
        Ok(payload) => {
            let _ = client.publish(subject, payload.into()).await;
        }
        Err(e) => error!(error = %e, "Failed to serialize vehicle reply"),
    }
}

/// Handle vehicles.list requests
pub async fn handle_list(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    processor: Arc<AvlProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply_to) = msg.reply else {
            continue;
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse vehicles list request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply(&client, reply_to, &error).await;
                continue;
            }
        };

        let items = processor.cache().all_vehicles();
        let total = items.len();
        let success = SuccessResponse::new(request.id, VehicleListResponse { items, total });
        reply(&client, reply_to, &success).await;
    }

    Ok(())
}

/// Handle vehicles.get requests
pub async fn handle_get(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    processor: Arc<AvlProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply_to) = msg.reply else {
            continue;
        };

        let request: Request<VehicleGetRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse vehicle get request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply(&client, reply_to, &error).await;
                continue;
            }
        };

        match processor.cache().vehicle(&request.payload.vehicle_id) {
            Some(snapshot) => {
                let success = SuccessResponse::new(request.id, snapshot);
                reply(&client, reply_to, &success).await;
            }
            None => {
                let error = ErrorResponse::new(
                    request.id,
                    "NOT_FOUND",
                    format!("no vehicle {}", request.payload.vehicle_id),
                );
                reply(&client, reply_to, &error).await;
            }
        }
    }

    Ok(())
}

/// Handle vehicles.by_block requests
pub async fn handle_by_block(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    processor: Arc<AvlProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply_to) = msg.reply else {
            continue;
        };

        let request: Request<VehiclesByBlockRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse vehicles by-block request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply(&client, reply_to, &error).await;
                continue;
            }
        };

        let vehicle_ids = processor
            .cache()
            .vehicles_for_block(&request.payload.block_id);
        let success = SuccessResponse::new(request.id, vehicle_ids);
        reply(&client, reply_to, &success).await;
    }

    Ok(())
}

/// Handle vehicles.evict requests
pub async fn handle_evict(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    processor: Arc<AvlProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply_to) = msg.reply else {
            continue;
        };

        let request: Request<EvictVehicleRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse vehicle evict request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply(&client, reply_to, &error).await;
                continue;
            }
        };

        let evicted = processor.store().evict(&request.payload.vehicle_id);
        let success = SuccessResponse::new(request.id, evicted);
        reply(&client, reply_to, &success).await;
    }

    Ok(())
}
