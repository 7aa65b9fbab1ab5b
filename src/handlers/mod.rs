//! NATS message handlers

pub mod avl;
pub mod vehicles;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::services::avl_processor::AvlProcessor;

/// Subscribe to all subjects and run the feed until shutdown. Vehicle
/// query handlers run as background tasks; the AVL feed runs in the
/// calling task and returns on shutdown.
pub async fn start_handlers(
    client: Client,
    processor: Arc<AvlProcessor>,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Starting message handlers...");

    let avl_sub = client.subscribe(config.avl_subject.clone()).await?;
    let vehicles_list_sub = client.subscribe("headway.vehicles.list").await?;
    let vehicles_get_sub = client.subscribe("headway.vehicles.get").await?;
    let vehicles_by_block_sub = client.subscribe("headway.vehicles.by_block").await?;
    let vehicles_evict_sub = client.subscribe("headway.vehicles.evict").await?;

    info!(avl_subject = %config.avl_subject, "Subscribed to NATS subjects");

    let client_list = client.clone();
    let processor_list = Arc::clone(&processor);
    tokio::spawn(async move {
        if let Err(e) = vehicles::handle_list(client_list, vehicles_list_sub, processor_list).await {
            error!("Vehicles list handler error: {}", e);
        }
    });

    let client_get = client.clone();
    let processor_get = Arc::clone(&processor);
    tokio::spawn(async move {
        if let Err(e) = vehicles::handle_get(client_get, vehicles_get_sub, processor_get).await {
            error!("Vehicles get handler error: {}", e);
        }
    });

    let client_by_block = client.clone();
    let processor_by_block = Arc::clone(&processor);
    tokio::spawn(async move {
        if let Err(e) =
            vehicles::handle_by_block(client_by_block, vehicles_by_block_sub, processor_by_block)
                .await
        {
            error!("Vehicles by-block handler error: {}", e);
        }
    });

    let client_evict = client.clone();
    let processor_evict = Arc::clone(&processor);
    tokio::spawn(async move {
        if let Err(e) = vehicles::handle_evict(client_evict, vehicles_evict_sub, processor_evict).await
        {
            error!("Vehicles evict handler error: {}", e);
        }
    });

    avl::handle_avl_feed(avl_sub, processor, config.worker_count, shutdown).await
}
