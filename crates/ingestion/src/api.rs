//! HTTP surface for ingestion and browsing

use actix_web::{web, HttpResponse};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tube_mirror_core::DatabasePool;

use crate::browse::VideoBrowser;
use crate::fallback::IngestOrchestrator;
use crate::normalizer::VideoSummary;
use crate::pipeline::IngestRequest;
use crate::IngestionError;

const DEFAULT_BROWSE_LIMIT: i64 = 50;
const MAX_BROWSE_LIMIT: i64 = 200;

/// Shared handler state
pub struct AppState {
    pub orchestrator: Arc<IngestOrchestrator>,
    pub browser: Arc<VideoBrowser>,
    pub pool: DatabasePool,
    /// Operator-triggered ingestion is throttled to one run per minute;
    /// requests inside the window get a 429 without touching the chain.
    pub ingest_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<IngestOrchestrator>,
        browser: Arc<VideoBrowser>,
        pool: DatabasePool,
    ) -> Self {
        Self {
            orchestrator,
            browser,
            pool,
            ingest_limiter: RateLimiter::direct(Quota::per_minute(nonzero!(1u32))),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/ingest", web::post().to(trigger_ingest))
            .route("/videos", web::get().to(list_videos)),
    )
    .route("/health", web::get().to(health_check));
}

async fn trigger_ingest(
    state: web::Data<AppState>,
    request: web::Json<IngestRequest>,
) -> HttpResponse {
    if state.ingest_limiter.check().is_err() {
        return HttpResponse::TooManyRequests().json(json!({
            "error": "Ingestion was triggered recently, try again later"
        }));
    }

    info!(
        channels = ?request.channels,
        force_update = request.force_update,
        bypass = request.bypass_quota_check,
        "Ingest triggered"
    );

    match state.orchestrator.ingest(request.into_inner()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(IngestionError::QuotaExhausted { reset_at }) => {
            HttpResponse::TooManyRequests().json(json!({
                "error": "API quota exhausted",
                "resetAt": reset_at,
            }))
        }
        Err(e) => {
            error!("Ingest request failed: {}", e);
            HttpResponse::BadGateway().json(json!({ "error": e.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrowseResponse {
    videos: Vec<VideoSummary>,
    tier: String,
}

async fn list_videos(state: web::Data<AppState>, query: web::Query<BrowseQuery>) -> HttpResponse {
    let limit = clamp_limit(query.limit);
    let result = state.browser.list(limit).await;

    HttpResponse::Ok().json(BrowseResponse {
        videos: result.videos,
        tier: result.tier,
    })
}

fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_BROWSE_LIMIT)
        .clamp(1, MAX_BROWSE_LIMIT)
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    if state.pool.is_healthy().await {
        HttpResponse::Ok().json(json!({
            "status": "healthy",
            "service": "ingestion",
        }))
    } else {
        HttpResponse::ServiceUnavailable().json(json!({
            "status": "degraded",
            "service": "ingestion",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_limit_clamping() {
        assert_eq!(clamp_limit(None), DEFAULT_BROWSE_LIMIT);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_BROWSE_LIMIT);
    }
}
