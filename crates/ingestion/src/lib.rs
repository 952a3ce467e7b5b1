//! TubeMirror Ingestion Pipeline
//!
//! Mirrors third-party video metadata (titles, thumbnails, view counts,
//! upload times) from an external video-hosting API into the local
//! PostgreSQL store. The pipeline operates under a hard shared daily
//! quota budget, pages through per-channel result sets, survives
//! partial failures and quota exhaustion mid-run, and degrades through
//! an ordered list of fallback strategies.

pub mod api;
pub mod browse;
pub mod channels;
pub mod fallback;
pub mod fetcher;
pub mod normalizer;
pub mod pipeline;
pub mod quota;
pub mod repository;
pub mod writer;
pub mod youtube;

// Re-export main types
pub use browse::{BrowseResult, VideoBrowser, SAMPLE_TIER};
pub use channels::ChannelSelector;
pub use fallback::{
    AttemptRecord, DirectStrategy, FallbackChain, FallbackOutcome, IngestOrchestrator,
    OrchestratedReport, RemoteStrategy, Strategy,
};
pub use fetcher::{ChannelPager, PaginatedFetcher, VideoPage};
pub use normalizer::{normalize, VideoRecord, VideoSummary};
pub use pipeline::{
    ApiKeys, ChannelOutcome, ChannelSyncStatus, IngestPipeline, IngestReport, IngestRequest,
};
pub use quota::{QuotaPriority, QuotaStatus, QuotaTracker, API_NAME, UNITS_PER_CALL};
pub use repository::{
    ChannelRef, ChannelRepository, PostgresRepository, QuotaRepository, UpsertOutcome,
    VideoRepository,
};
pub use writer::{BatchUpsertWriter, WriteSummary};
pub use youtube::{ChannelMetadata, PlaylistPage, VideoApi, YouTubeClient};

/// Common error type for the ingestion pipeline
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authoritative stop signal: aborts the remaining source queue.
    #[error("API quota exhausted (resets at {reset_at:?})")]
    QuotaExhausted {
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[error("Channel resolution failed: {0}")]
    ChannelResolution(String),

    #[error("Page fetch failed: {0}")]
    PageFetch(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("All ingestion strategies failed: {0}")]
    AllStrategiesFailed(String),
}

impl IngestionError {
    /// Whether this error must stop the whole run rather than just the
    /// current source.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, IngestionError::QuotaExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;
pub type Error = IngestionError;
