//! Headway Worker - AVL processing core for transit fleet tracking
//!
//! Consumes AVL reports from NATS, matches vehicles to their scheduled
//! blocks, computes schedule adherence, and publishes vehicle events.

mod cli;
mod config;
mod defaults;
mod handlers;
mod schedule;
mod services;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::services::avl_archiver::{self, AvlArchiver};
use crate::services::avl_processor::AvlProcessor;
use crate::services::event_sink::{EventSink, LogEventSink, NatsEventSink};
use crate::services::match_processor::NoopMatchProcessor;
use crate::services::vehicle_cache::VehicleDataCache;
use crate::services::vehicle_store::VehicleStateStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    dotenvy::dotenv().ok();

    let config = config::Config::from_env()?;

    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,headway_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    info!("Starting Headway Worker...");

    let schedule = Arc::new(schedule::ScheduleIndex::from_json_file(&config.schedule_path)?);

    match cli.command {
        Some(cli::Command::Replay { file, speed }) => replay(config, schedule, file, speed).await,
        Some(cli::Command::Serve) | None => serve(config, schedule).await,
    }
}

async fn serve(config: config::Config, schedule: Arc<schedule::ScheduleIndex>) -> Result<()> {
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let events: Arc<dyn EventSink> = Arc::new(NatsEventSink::new(
        nats_client.clone(),
        config.events_subject.clone(),
    ));
    let processor = Arc::new(build_processor(&config, schedule, events));

    for block_id in &config.sched_based_blocks {
        processor.create_schedule_based_vehicle(&format!("sched-{block_id}"), block_id);
    }

    let shutdown = CancellationToken::new();
    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown_on_signal.cancel();
        }
    });

    if let Err(e) = handlers::start_handlers(nats_client, processor, &config, shutdown).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn replay(
    config: config::Config,
    schedule: Arc<schedule::ScheduleIndex>,
    file: String,
    speed: f64,
) -> Result<()> {
    // Replay keeps events local: matching results go to the log, not to
    // the live event subject.
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let processor = Arc::new(build_processor(&config, schedule, events));

    let reports = avl_archiver::read_replay_file(&file)?;
    info!(count = reports.len(), file, "Replaying archived AVL reports");

    handlers::avl::replay_reports(processor.clone(), reports, speed).await;

    let snapshots = processor.cache().all_vehicles();
    let predictable = snapshots.iter().filter(|s| s.predictable).count();
    info!(
        vehicles = processor.store().vehicle_ids().len(),
        predictable,
        "Replay summary"
    );
    Ok(())
}

fn build_processor(
    config: &config::Config,
    schedule: Arc<schedule::ScheduleIndex>,
    events: Arc<dyn EventSink>,
) -> AvlProcessor {
    info!("Event sink initialized: {}", events.name());

    let match_processor: Arc<dyn services::match_processor::MatchProcessor> =
        Arc::new(NoopMatchProcessor);
    info!("Match processor initialized: {}", match_processor.name());

    let archiver = config.archive_dir.as_ref().map(AvlArchiver::new);

    AvlProcessor::new(
        schedule,
        Arc::new(VehicleStateStore::new()),
        Arc::new(VehicleDataCache::new()),
        events,
        match_processor,
        archiver,
        config.matching.clone(),
    )
}
