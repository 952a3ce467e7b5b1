//! Ingestion Service - Video Metadata Mirror
//!
//! Port: 8085
//! SLA: 99.5% availability

use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tube_mirror_core::{
    load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, ServiceConfig, VideoApiConfig,
};
use tube_mirror_ingestion::api::{configure_routes, AppState};
use tube_mirror_ingestion::{
    ApiKeys, BatchUpsertWriter, ChannelSelector, IngestOrchestrator, IngestPipeline, IngestRequest,
    PaginatedFetcher, PostgresRepository, QuotaTracker, VideoBrowser, YouTubeClient,
};

/// Interval between scheduled background sync runs
const SYNC_INTERVAL: Duration = Duration::from_secs(6 * 3600);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    load_dotenv();

    let service_config = ServiceConfig::from_env().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(service_config.log_level.clone())),
        )
        .json()
        .init();

    let db_config = DatabaseConfig::from_env()
        .and_then(|c| c.validate().map(|_| c))
        .map_err(|e| {
            error!("Database configuration invalid: {}", e);
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
    let api_config = VideoApiConfig::from_env()
        .and_then(|c| c.validate().map(|_| c))
        .map_err(|e| {
            error!("Video API configuration invalid: {}", e);
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;

    let pool = DatabasePool::new(&db_config).await.map_err(|e| {
        error!("Database connection failed: {}", e);
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e)
    })?;

    let repo = Arc::new(PostgresRepository::new(pool.pool().clone()));
    let client = Arc::new(YouTubeClient::new(api_config.base_url.clone()));
    let quota = Arc::new(QuotaTracker::new(repo.clone()));

    let pipeline = Arc::new(IngestPipeline::new(
        ChannelSelector::new(repo.clone()),
        PaginatedFetcher::new(client, quota.clone()),
        BatchUpsertWriter::new(repo.clone()),
        quota,
        repo.clone(),
        ApiKeys {
            primary: api_config.api_key.clone(),
            fallback: api_config.fallback_api_key.clone(),
        },
    ));

    let orchestrator = Arc::new(IngestOrchestrator::new(
        pipeline,
        api_config.alternate_ingest_url.clone(),
        api_config.primary_ingest_url.clone(),
    ));
    let browser = Arc::new(VideoBrowser::new(repo));

    spawn_scheduled_sync(orchestrator.clone());

    let state = web::Data::new(AppState::new(orchestrator, browser, pool));
    let bind_addr = (service_config.host.clone(), service_config.port);

    info!(
        "Starting Ingestion Service on {}:{}",
        bind_addr.0, bind_addr.1
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure_routes))
        .bind(bind_addr)?
        .run()
        .await
}

/// Background sync of all active channels on a fixed interval.
///
/// The first tick fires after a full interval; startup never blocks on
/// a sync run.
fn spawn_scheduled_sync(orchestrator: Arc<IngestOrchestrator>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SYNC_INTERVAL);
        interval.tick().await;

        loop {
            interval.tick().await;
            info!("Scheduled sync starting");
            match orchestrator.ingest(IngestRequest::default()).await {
                Ok(report) => info!(
                    processed = report.report.processed,
                    new_videos = report.report.new_videos,
                    strategy = %report.strategy,
                    "Scheduled sync finished"
                ),
                Err(e) => error!("Scheduled sync failed: {}", e),
            }
        }
    });
}
