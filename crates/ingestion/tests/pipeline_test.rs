//! End-to-end pipeline tests against in-memory store and API doubles
//!
//! Covers the run-level guarantees: quota gating, per-source failure
//! isolation, quota-wall aborts, upsert idempotence, and the fallback
//! credential switch.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tube_mirror_core::retry::RetryPolicy;
use tube_mirror_ingestion::normalizer::{VideoRecord, VideoSummary};
use tube_mirror_ingestion::repository::{
    ChannelRef, ChannelRepository, QuotaRepository, UpsertOutcome, VideoRepository,
};
use tube_mirror_ingestion::youtube::{ChannelMetadata, PlaylistPage, VideoApi};
use tube_mirror_ingestion::{
    ApiKeys, BatchUpsertWriter, ChannelSelector, ChannelSyncStatus, IngestPipeline, IngestRequest,
    IngestionError, PaginatedFetcher, QuotaStatus, QuotaTracker,
};

/// In-memory store standing in for all three repositories
struct MockStore {
    channels: Vec<ChannelRef>,
    videos: Mutex<HashMap<String, VideoRecord>>,
    quota_remaining: Mutex<Option<i64>>,
    quota_reset_at: Option<DateTime<Utc>>,
    marked_synced: Mutex<Vec<String>>,
    fetch_errors: Mutex<Vec<(String, String)>>,
    refreshed_metadata: Mutex<Vec<(String, String)>>,
}

impl MockStore {
    fn new(channel_ids: &[&str], quota_remaining: Option<i64>) -> Self {
        Self {
            channels: channel_ids.iter().map(|id| ChannelRef::from_id(*id)).collect(),
            videos: Mutex::new(HashMap::new()),
            quota_remaining: Mutex::new(quota_remaining),
            quota_reset_at: None,
            marked_synced: Mutex::new(Vec::new()),
            fetch_errors: Mutex::new(Vec::new()),
            refreshed_metadata: Mutex::new(Vec::new()),
        }
    }

    fn video_count(&self) -> usize {
        self.videos.lock().unwrap().len()
    }

    fn remaining(&self) -> Option<i64> {
        *self.quota_remaining.lock().unwrap()
    }
}

#[async_trait]
impl ChannelRepository for MockStore {
    async fn active_channels(&self) -> anyhow::Result<Vec<ChannelRef>> {
        Ok(self.channels.clone())
    }

    async fn active_channel_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.channels.iter().map(|c| c.channel_id.clone()).collect())
    }

    async fn mark_synced(&self, channel_id: &str) -> anyhow::Result<()> {
        self.marked_synced.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    async fn record_fetch_error(&self, channel_id: &str, message: &str) -> anyhow::Result<()> {
        self.fetch_errors
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message.to_string()));
        Ok(())
    }

    async fn refresh_metadata(
        &self,
        channel_id: &str,
        title: &str,
        _thumbnail_url: Option<&str>,
    ) -> anyhow::Result<()> {
        self.refreshed_metadata
            .lock()
            .unwrap()
            .push((channel_id.to_string(), title.to_string()));
        Ok(())
    }
}

#[async_trait]
impl VideoRepository for MockStore {
    async fn upsert_batch(&self, records: &[VideoRecord]) -> anyhow::Result<Vec<UpsertOutcome>> {
        let mut videos = self.videos.lock().unwrap();
        let mut written = Vec::with_capacity(records.len());
        for record in records {
            let inserted = videos.insert(record.video_id.clone(), record.clone()).is_none();
            written.push(UpsertOutcome {
                video_id: record.video_id.clone(),
                inserted,
            });
        }
        Ok(written)
    }

    async fn list_videos(&self, _limit: i64) -> anyhow::Result<Vec<VideoSummary>> {
        Ok(Vec::new())
    }

    async fn list_videos_reduced(&self, _limit: i64) -> anyhow::Result<Vec<VideoSummary>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl QuotaRepository for MockStore {
    async fn fetch_quota(&self, _api_name: &str) -> anyhow::Result<Option<QuotaStatus>> {
        Ok(self.remaining().map(|remaining| QuotaStatus {
            remaining,
            reset_at: self.quota_reset_at,
        }))
    }

    async fn decrement_quota(&self, _api_name: &str, units: i64) -> anyhow::Result<()> {
        let mut quota = self.quota_remaining.lock().unwrap();
        if let Some(remaining) = quota.as_mut() {
            *remaining -= units;
        }
        Ok(())
    }
}

/// Scripted API double: pages per channel, optional failure modes
struct MockApi {
    /// channel id -> pages of video ids
    pages: HashMap<String, Vec<Vec<String>>>,
    fail_resolution: HashSet<String>,
    /// Page fetches for this channel hit the external quota wall
    quota_wall_channel: Option<String>,
    /// First page index at which the wall applies
    quota_wall_from_page: usize,
    fail_stats: bool,
    resolve_calls: AtomicUsize,
    page_calls: AtomicUsize,
    views: i64,
}

impl MockApi {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            fail_resolution: HashSet::new(),
            quota_wall_channel: None,
            quota_wall_from_page: 0,
            fail_stats: false,
            resolve_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            views: 100,
        }
    }

    fn with_channel(mut self, channel_id: &str, pages: &[&[&str]]) -> Self {
        self.pages.insert(
            channel_id.to_string(),
            pages
                .iter()
                .map(|page| page.iter().map(|s| s.to_string()).collect())
                .collect(),
        );
        self
    }

    fn channel_for_playlist(playlist_id: &str) -> String {
        playlist_id.replacen("UU", "UC", 1)
    }
}

#[async_trait]
impl VideoApi for MockApi {
    async fn resolve_channel(
        &self,
        channel_id: &str,
        _api_key: &str,
    ) -> Result<ChannelMetadata, IngestionError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_resolution.contains(channel_id) {
            return Err(IngestionError::ChannelResolution(format!(
                "Channel {} not found",
                channel_id
            )));
        }
        Ok(ChannelMetadata {
            channel_id: channel_id.to_string(),
            title: format!("Channel {}", channel_id),
            thumbnail_url: None,
            uploads_playlist_id: channel_id.replacen("UC", "UU", 1),
            from_cache: false,
        })
    }

    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        _api_key: &str,
    ) -> Result<PlaylistPage, IngestionError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        let channel_id = Self::channel_for_playlist(playlist_id);
        let index: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        if self.quota_wall_channel.as_deref() == Some(channel_id.as_str())
            && index >= self.quota_wall_from_page
        {
            return Err(IngestionError::QuotaExhausted { reset_at: None });
        }

        let pages = self.pages.get(&channel_id).cloned().unwrap_or_default();
        let ids = pages.get(index).cloned().unwrap_or_default();

        let items = ids
            .iter()
            .map(|id| {
                json!({
                    "snippet": {
                        "title": format!("Video {}", id),
                        "publishedAt": "2026-08-01T12:00:00Z",
                        "resourceId": { "videoId": id }
                    }
                })
            })
            .collect();

        let next_page_token = if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };

        Ok(PlaylistPage {
            items,
            next_page_token,
        })
    }

    async fn fetch_video_stats(
        &self,
        video_ids: &[String],
        _api_key: &str,
    ) -> Result<HashMap<String, Value>, IngestionError> {
        if self.fail_stats {
            return Err(IngestionError::Api("stats endpoint unavailable".into()));
        }
        Ok(video_ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    json!({ "statistics": { "viewCount": self.views.to_string() } }),
                )
            })
            .collect())
    }
}

fn build_pipeline(
    api: Arc<MockApi>,
    store: Arc<MockStore>,
    fallback_key: Option<&str>,
) -> IngestPipeline {
    let quota = Arc::new(QuotaTracker::new(store.clone()));
    IngestPipeline::new(
        ChannelSelector::new(store.clone()),
        PaginatedFetcher::new(api, quota.clone())
            .with_timings(RetryPolicy::new(1, 1, 5, false), Duration::ZERO),
        BatchUpsertWriter::new(store.clone()).with_timings(50, Duration::ZERO),
        quota,
        store,
        ApiKeys {
            primary: "primary-key".to_string(),
            fallback: fallback_key.map(String::from),
        },
    )
}

#[tokio::test]
async fn test_run_blocked_below_normal_priority_floor() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(499)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"]]));
    let pipeline = build_pipeline(api.clone(), store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(!report.success);
    assert_eq!(report.processed, 0);
    assert!(report.results.is_empty());
    assert!(!report.used_fallback_key);
    assert!(report.message.is_some());
    // The gate blocked before any API traffic
    assert_eq!(api.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_force_update_runs_below_normal_floor() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(300)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"]]));
    let pipeline = build_pipeline(api, store.clone(), None);

    let request = IngestRequest {
        force_update: true,
        ..Default::default()
    };
    let report = pipeline.run(&request).await;

    assert!(report.success);
    assert_eq!(report.processed, 1);
    assert_eq!(report.new_videos, 1);
    assert_eq!(report.results[0].status, ChannelSyncStatus::Synced);
}

#[tokio::test]
async fn test_absent_quota_record_proceeds_optimistically() {
    let store = Arc::new(MockStore::new(&["UC_a"], None));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"]]));
    let pipeline = build_pipeline(api, store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;
    assert!(report.success);
    assert_eq!(report.processed, 1);
    assert_eq!(report.quota_remaining, None);
}

#[tokio::test]
async fn test_fallback_credential_unblocks_a_gated_run() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(0)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"]]));
    let pipeline = build_pipeline(api, store.clone(), Some("fallback-key"));

    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(report.success);
    assert!(report.used_fallback_key);
    assert_eq!(report.processed, 1);
    assert_eq!(report.results[0].status, ChannelSyncStatus::Synced);
}

#[tokio::test]
async fn test_one_failed_source_does_not_sink_the_run() {
    let store = Arc::new(MockStore::new(&["UC_a", "UC_b", "UC_c"], Some(10_000)));
    let mut api = MockApi::new()
        .with_channel("UC_a", &[&["a1"]])
        .with_channel("UC_c", &[&["c1", "c2"]]);
    api.fail_resolution.insert("UC_b".to_string());
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(report.success);
    assert_eq!(report.processed, 3);
    assert!(!report.quota_exhausted);

    let statuses: Vec<ChannelSyncStatus> = report.results.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![
            ChannelSyncStatus::Synced,
            ChannelSyncStatus::Failed,
            ChannelSyncStatus::Synced,
        ]
    );

    // The failure was recorded on the channel, not swallowed
    let errors = store.fetch_errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "UC_b");
}

#[tokio::test]
async fn test_quota_wall_aborts_remaining_sources() {
    let store = Arc::new(MockStore::new(&["UC_a", "UC_b", "UC_c"], Some(10_000)));
    let mut api = MockApi::new()
        .with_channel("UC_a", &[&["a1"]])
        .with_channel("UC_c", &[&["c1"]]);
    api.quota_wall_channel = Some("UC_b".to_string());
    let api = Arc::new(api);
    let pipeline = build_pipeline(api.clone(), store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(report.quota_exhausted);
    assert!(!report.success);
    assert_eq!(report.processed, 1);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[1].status, ChannelSyncStatus::Failed);

    // UC_c was never attempted
    assert_eq!(api.resolve_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_quota_wall_surfaces_reset_timestamp() {
    let reset = Utc.with_ymd_and_hms(2026, 9, 1, 7, 0, 0).unwrap();
    let mut store = MockStore::new(&["UC_a"], Some(10_000));
    store.quota_reset_at = Some(reset);
    let store = Arc::new(store);

    let mut api = MockApi::new().with_channel("UC_a", &[&["v1"]]);
    api.quota_wall_channel = Some("UC_a".to_string());
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(report.quota_exhausted);
    assert_eq!(report.quota_reset_at, Some(reset));
}

#[tokio::test]
async fn test_mid_pagination_quota_wall_keeps_channel_stale() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(10_000)));
    let mut api = MockApi::new().with_channel("UC_a", &[&["v1", "v2"], &["v3"]]);
    api.quota_wall_channel = Some("UC_a".to_string());
    api.quota_wall_from_page = 1;
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(report.quota_exhausted);
    // The complete first page was still written
    assert_eq!(store.video_count(), 2);
    // A partial fetch is an interruption, not a sync
    assert!(store.marked_synced.lock().unwrap().is_empty());
    let errors = store.fetch_errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "UC_a");
}

#[tokio::test]
async fn test_failed_stats_lookup_does_not_zero_stored_views() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(10_000)));

    let mut api = MockApi::new().with_channel("UC_a", &[&["v1"]]);
    api.views = 100;
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);
    pipeline.run(&IngestRequest::default()).await;
    assert_eq!(store.videos.lock().unwrap()["v1"].views, 100);

    let mut api = MockApi::new().with_channel("UC_a", &[&["v1"]]);
    api.fail_stats = true;
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);
    let report = pipeline.run(&IngestRequest::default()).await;

    assert!(!report.success);
    assert_eq!(report.results[0].status, ChannelSyncStatus::Failed);
    // The stored view count survived the failed enrichment
    assert_eq!(store.videos.lock().unwrap()["v1"].views, 100);
}

#[tokio::test]
async fn test_reingestion_is_idempotent_on_the_natural_key() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(10_000)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1", "v2"], &["v3"]]));
    let pipeline = build_pipeline(api, store.clone(), None);

    let first = pipeline.run(&IngestRequest::default()).await;
    let second = pipeline.run(&IngestRequest::default()).await;

    assert_eq!(first.processed, 3);
    assert_eq!(first.new_videos, 3);
    assert_eq!(second.processed, 3);
    // Nothing upstream changed, so the second pass created no rows
    assert_eq!(second.new_videos, 0);
    assert_eq!(store.video_count(), 3);
}

#[tokio::test]
async fn test_quota_decreases_by_one_unit_per_call() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(10_000)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"], &["v2"]]));
    let pipeline = build_pipeline(api, store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    // 1 resolve + 2 pages + 2 stats
    assert_eq!(store.remaining(), Some(10_000 - 5));
    assert_eq!(report.quota_remaining, Some(10_000 - 5));
}

#[tokio::test]
async fn test_mid_run_floor_crossing_skips_later_sources() {
    // UC_a costs 3 units (resolve + page + stats), dropping the budget
    // below the normal floor before UC_b's gate check.
    let store = Arc::new(MockStore::new(&["UC_a", "UC_b"], Some(501)));
    let api = Arc::new(
        MockApi::new()
            .with_channel("UC_a", &[&["a1"]])
            .with_channel("UC_b", &[&["b1"]]),
    );
    let pipeline = build_pipeline(api, store.clone(), None);

    let report = pipeline.run(&IngestRequest::default()).await;

    assert_eq!(report.results[0].status, ChannelSyncStatus::Synced);
    assert_eq!(report.results[1].status, ChannelSyncStatus::SkippedQuota);
    assert!(report.results[1].error.is_none());
    assert_eq!(report.processed, 1);
}

#[tokio::test]
async fn test_explicit_channel_scope_is_respected() {
    let store = Arc::new(MockStore::new(&["UC_a", "UC_b"], Some(10_000)));
    let api = Arc::new(
        MockApi::new()
            .with_channel("UC_a", &[&["a1"]])
            .with_channel("UC_b", &[&["b1"]]),
    );
    let pipeline = build_pipeline(api.clone(), store.clone(), None);

    let request = IngestRequest {
        channels: Some(vec!["UC_b".to_string()]),
        ..Default::default()
    };
    let report = pipeline.run(&request).await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].channel_id, "UC_b");
    assert_eq!(api.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_max_channels_per_run_caps_the_queue() {
    let store = Arc::new(MockStore::new(&["UC_a", "UC_b", "UC_c"], Some(10_000)));
    let api = Arc::new(
        MockApi::new()
            .with_channel("UC_a", &[&["a1"]])
            .with_channel("UC_b", &[&["b1"]])
            .with_channel("UC_c", &[&["c1"]]),
    );
    let pipeline = build_pipeline(api.clone(), store.clone(), None);

    let request = IngestRequest {
        max_channels_per_run: Some(2),
        ..Default::default()
    };
    let report = pipeline.run(&request).await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(api.resolve_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_successful_sync_updates_channel_bookkeeping() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(10_000)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"]]));
    let pipeline = build_pipeline(api, store.clone(), None);

    pipeline.run(&IngestRequest::default()).await;

    assert_eq!(*store.marked_synced.lock().unwrap(), vec!["UC_a"]);
    let refreshed = store.refreshed_metadata.lock().unwrap();
    assert_eq!(refreshed[0], ("UC_a".to_string(), "Channel UC_a".to_string()));
}

#[tokio::test]
async fn test_bypass_skips_the_quota_gate() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(0)));
    let api = Arc::new(MockApi::new().with_channel("UC_a", &[&["v1"]]));
    let pipeline = build_pipeline(api, store.clone(), None);

    let request = IngestRequest {
        bypass_quota_check: true,
        ..Default::default()
    };
    let report = pipeline.run(&request).await;

    assert!(report.success);
    assert!(!report.used_fallback_key);
    assert_eq!(report.processed, 1);
}

#[tokio::test]
async fn test_reingestion_refreshes_mutable_fields() {
    let store = Arc::new(MockStore::new(&["UC_a"], Some(10_000)));

    let mut api = MockApi::new().with_channel("UC_a", &[&["v1"]]);
    api.views = 100;
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);
    pipeline.run(&IngestRequest::default()).await;
    assert_eq!(store.videos.lock().unwrap()["v1"].views, 100);

    let mut api = MockApi::new().with_channel("UC_a", &[&["v1"]]);
    api.views = 250;
    let pipeline = build_pipeline(Arc::new(api), store.clone(), None);
    pipeline.run(&IngestRequest::default()).await;
    assert_eq!(store.videos.lock().unwrap()["v1"].views, 250);
    assert_eq!(store.video_count(), 1);
}
