//! Degraded-read browse surface
//!
//! Reads for the video listing go through the same ordered-strategy
//! machinery as ingestion: the full query first, a reduced-column query
//! when the full one fails, and finally a built-in sample set so the
//! browse surface stays up even with the store unreachable.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use crate::fallback::{FallbackChain, Strategy};
use crate::normalizer::VideoSummary;
use crate::repository::VideoRepository;
use crate::{IngestionError, Result};

/// Tier name reported when the built-in sample set was served
pub const SAMPLE_TIER: &str = "sample";

/// A browse listing plus the tier that produced it
#[derive(Debug)]
pub struct BrowseResult {
    pub videos: Vec<VideoSummary>,
    pub tier: String,
}

struct FullQuery {
    repo: Arc<dyn VideoRepository>,
    limit: i64,
}

#[async_trait]
impl Strategy<Vec<VideoSummary>> for FullQuery {
    fn name(&self) -> &str {
        "full"
    }

    async fn execute(&self) -> Result<Vec<VideoSummary>> {
        self.repo
            .list_videos(self.limit)
            .await
            .map_err(|e| IngestionError::Database(format!("{e:#}")))
    }
}

struct ReducedQuery {
    repo: Arc<dyn VideoRepository>,
    limit: i64,
}

#[async_trait]
impl Strategy<Vec<VideoSummary>> for ReducedQuery {
    fn name(&self) -> &str {
        "reduced"
    }

    async fn execute(&self) -> Result<Vec<VideoSummary>> {
        self.repo
            .list_videos_reduced(self.limit)
            .await
            .map_err(|e| IngestionError::Database(format!("{e:#}")))
    }
}

struct SampleSet;

#[async_trait]
impl Strategy<Vec<VideoSummary>> for SampleSet {
    fn name(&self) -> &str {
        SAMPLE_TIER
    }

    async fn execute(&self) -> Result<Vec<VideoSummary>> {
        Ok(sample_videos())
    }
}

/// Placeholder listing served when every store read fails
fn sample_videos() -> Vec<VideoSummary> {
    vec![
        VideoSummary {
            video_id: "sample-welcome".to_string(),
            title: "Welcome to TubeMirror".to_string(),
            thumbnail: None,
            channel_name: Some("TubeMirror".to_string()),
            views: 0,
        },
        VideoSummary {
            video_id: "sample-unavailable".to_string(),
            title: "Catalog temporarily unavailable".to_string(),
            thumbnail: None,
            channel_name: Some("TubeMirror".to_string()),
            views: 0,
        },
    ]
}

/// Serves browse listings with tiered degradation
pub struct VideoBrowser {
    repo: Arc<dyn VideoRepository>,
}

impl VideoBrowser {
    pub fn new(repo: Arc<dyn VideoRepository>) -> Self {
        Self { repo }
    }

    /// List videos for browsing, newest first. Never fails: the final
    /// tier is the built-in sample set.
    pub async fn list(&self, limit: i64) -> BrowseResult {
        let chain = FallbackChain::new(vec![
            Box::new(FullQuery {
                repo: self.repo.clone(),
                limit,
            }) as Box<dyn Strategy<Vec<VideoSummary>>>,
            Box::new(ReducedQuery {
                repo: self.repo.clone(),
                limit,
            }),
            Box::new(SampleSet),
        ]);

        match chain.execute().await {
            Ok(outcome) => BrowseResult {
                videos: outcome.value,
                tier: outcome.winner,
            },
            // Unreachable while the sample tier is infallible
            Err(e) => {
                error!("Browse chain failed: {}", e);
                BrowseResult {
                    videos: sample_videos(),
                    tier: SAMPLE_TIER.to_string(),
                }
            }
        }
    }
}
