//! Paginated per-channel fetching
//!
//! Walks a channel's uploads collection page by page: resolve the
//! uploads playlist, fetch a page, enrich it with one batched
//! statistics call, yield, advance on the continuation token. A
//! quota-exceeded signal propagates upward untouched so it can stop the
//! whole run; any other page-fetch error is retried with exponential
//! backoff before failing the source alone.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use tube_mirror_core::retry::{retry_with_backoff, RetryPolicy};

use crate::quota::{QuotaTracker, UNITS_PER_CALL};
use crate::youtube::{ChannelMetadata, VideoApi};
use crate::{IngestionError, Result};

/// Delay between consecutive page fetches, respecting external rate limits
const INTER_PAGE_DELAY: Duration = Duration::from_millis(1200);

/// One enriched page: raw playlist items plus the statistics lookup
/// keyed by video ID.
#[derive(Debug)]
pub struct VideoPage {
    pub items: Vec<Value>,
    pub stats: HashMap<String, Value>,
}

impl VideoPage {
    /// Video IDs present in this page's raw items.
    pub fn video_ids(&self) -> Vec<String> {
        extract_video_ids(&self.items)
    }
}

fn extract_video_ids(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| {
            item.get("snippet")
                .and_then(|s| s.get("resourceId"))
                .and_then(|r| r.get("videoId"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .collect()
}

/// Walks the external API's paginated listing for one channel
pub struct PaginatedFetcher {
    api: Arc<dyn VideoApi>,
    quota: Arc<QuotaTracker>,
    retry_policy: RetryPolicy,
    inter_page_delay: Duration,
}

impl PaginatedFetcher {
    pub fn new(api: Arc<dyn VideoApi>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            api,
            quota,
            retry_policy: RetryPolicy::page_fetch(),
            inter_page_delay: INTER_PAGE_DELAY,
        }
    }

    /// Override pacing and retry timings (tests).
    pub fn with_timings(mut self, retry_policy: RetryPolicy, inter_page_delay: Duration) -> Self {
        self.retry_policy = retry_policy;
        self.inter_page_delay = inter_page_delay;
        self
    }

    /// Resolve the channel's uploads collection and open a pager on it.
    ///
    /// Resolution failure terminates the source without spending
    /// pagination quota; a quota-exceeded signal propagates unchanged.
    pub async fn open(
        &self,
        channel_id: &str,
        api_key: &str,
    ) -> Result<(ChannelMetadata, ChannelPager<'_>)> {
        let metadata = self
            .api
            .resolve_channel(channel_id, api_key)
            .await
            .map_err(|e| match e {
                IngestionError::QuotaExhausted { .. } | IngestionError::ChannelResolution(_) => e,
                other => IngestionError::ChannelResolution(other.to_string()),
            })?;

        // A cache-served resolution made no API call and costs nothing.
        if !metadata.from_cache {
            self.quota.spend(UNITS_PER_CALL).await;
        }

        debug!(
            channel_id,
            playlist_id = %metadata.uploads_playlist_id,
            "Resolved uploads playlist"
        );

        let pager = ChannelPager {
            fetcher: self,
            playlist_id: metadata.uploads_playlist_id.clone(),
            api_key: api_key.to_string(),
            next_token: None,
            fetched_any: false,
            done: false,
        };

        Ok((metadata, pager))
    }
}

/// Pull-based pager over one channel's uploads
///
/// `next_page` returns `Ok(Some(page))` until the listing is exhausted
/// (`Ok(None)`); a quota-exceeded signal surfaces as
/// [`IngestionError::QuotaExhausted`], any other terminal failure as
/// [`IngestionError::PageFetch`].
pub struct ChannelPager<'a> {
    fetcher: &'a PaginatedFetcher,
    playlist_id: String,
    api_key: String,
    next_token: Option<String>,
    fetched_any: bool,
    done: bool,
}

impl std::fmt::Debug for ChannelPager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPager")
            .field("playlist_id", &self.playlist_id)
            .field("next_token", &self.next_token)
            .field("fetched_any", &self.fetched_any)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl ChannelPager<'_> {
    pub async fn next_page(&mut self) -> Result<Option<VideoPage>> {
        if self.done {
            return Ok(None);
        }

        // Fixed inter-page delay before every page after the first
        if self.fetched_any {
            sleep(self.fetcher.inter_page_delay).await;
        }

        let api = &self.fetcher.api;
        let token = self.next_token.as_deref();

        let page = retry_with_backoff(
            || api.fetch_playlist_page(&self.playlist_id, token, &self.api_key),
            self.fetcher.retry_policy.clone(),
            |e: &IngestionError| !e.is_quota_exhausted(),
        )
        .await
        .map_err(|e| match e {
            IngestionError::QuotaExhausted { .. } => e,
            other => IngestionError::PageFetch(other.to_string()),
        })?;

        self.fetcher.quota.spend(UNITS_PER_CALL).await;

        let video_ids = extract_video_ids(&page.items);

        // One batched call per page, never one per video. The stats
        // call gets the same retry budget as the page fetch; an upsert
        // without a real lookup would zero stored view counts.
        let stats = if video_ids.is_empty() {
            HashMap::new()
        } else {
            let lookup = retry_with_backoff(
                || api.fetch_video_stats(&video_ids, &self.api_key),
                self.fetcher.retry_policy.clone(),
                |e: &IngestionError| !e.is_quota_exhausted(),
            )
            .await
            .map_err(|e| match e {
                IngestionError::QuotaExhausted { .. } => e,
                other => IngestionError::PageFetch(format!("statistics lookup: {}", other)),
            })?;
            self.fetcher.quota.spend(UNITS_PER_CALL).await;
            lookup
        };

        self.fetched_any = true;
        self.next_token = page.next_page_token;
        if self.next_token.is_none() {
            self.done = true;
        }

        Ok(Some(VideoPage {
            items: page.items,
            stats,
        }))
    }
}
