//! External video-hosting API client (YouTube Data API v3 shape)
//!
//! Consumes three endpoints: channel lookup (uploads collection
//! resolution), paginated playlist listing, and batched video
//! statistics. Quota-exceeded responses are distinguished from other
//! API errors because they must stop the whole run, not just the
//! current source.

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::normalizer::extract_string;
use crate::{IngestionError, Result};

/// Maximum items per playlist page and per batched statistics call
pub const PAGE_SIZE: usize = 50;

/// Resolved channel metadata, including the uploads collection ID
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    pub channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub uploads_playlist_id: String,
    /// Served from the resolution cache, with no API call made.
    pub from_cache: bool,
}

/// One page of playlist items plus the continuation cursor
#[derive(Debug, Clone)]
pub struct PlaylistPage {
    pub items: Vec<Value>,
    pub next_page_token: Option<String>,
}

/// External video API boundary
#[async_trait]
pub trait VideoApi: Send + Sync {
    /// Resolve channel metadata and its uploads collection ID.
    async fn resolve_channel(&self, channel_id: &str, api_key: &str) -> Result<ChannelMetadata>;

    /// Fetch one page of up to [`PAGE_SIZE`] playlist items, using the
    /// opaque continuation token from the previous page when present.
    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        api_key: &str,
    ) -> Result<PlaylistPage>;

    /// One batched statistics call for a page's video IDs, returning a
    /// lookup keyed by video ID.
    async fn fetch_video_stats(
        &self,
        video_ids: &[String],
        api_key: &str,
    ) -> Result<HashMap<String, Value>>;
}

/// reqwest-backed implementation of [`VideoApi`]
pub struct YouTubeClient {
    client: Client,
    base_url: String,
    /// Channel -> uploads playlist is a stable mapping; caching it
    /// saves one metadata call per channel per run.
    channel_cache: Cache<String, ChannelMetadata>,
}

impl YouTubeClient {
    pub fn new(base_url: String) -> Self {
        let channel_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(24 * 3600))
            .build();

        Self {
            client: Client::new(),
            base_url,
            channel_cache,
        }
    }

    /// Issue a GET and classify the response: quota-exceeded signals
    /// become [`IngestionError::QuotaExhausted`], any other non-2xx
    /// becomes a plain API error.
    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_quota_exceeded(&body) {
                return Err(IngestionError::QuotaExhausted { reset_at: None });
            }
            return Err(IngestionError::Api(format!(
                "API returned {}: {}",
                status,
                truncate(&body, 300)
            )));
        }

        Ok(response.json::<Value>().await?)
    }
}

/// The API signals budget exhaustion inside the error body rather than
/// with a dedicated status code.
fn is_quota_exceeded(body: &str) -> bool {
    body.contains("quotaExceeded") || body.contains("dailyLimitExceeded")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl VideoApi for YouTubeClient {
    async fn resolve_channel(&self, channel_id: &str, api_key: &str) -> Result<ChannelMetadata> {
        if let Some(cached) = self.channel_cache.get(channel_id).await {
            return Ok(ChannelMetadata {
                from_cache: true,
                ..cached
            });
        }

        let url = format!(
            "{}/channels?part=contentDetails,snippet&id={}&key={}",
            self.base_url,
            urlencoding::encode(channel_id),
            api_key
        );

        let data = self.get_json(&url).await?;

        let item = data
            .get("items")
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .ok_or_else(|| {
                IngestionError::ChannelResolution(format!("Channel {} not found", channel_id))
            })?;

        let snippet = item.get("snippet").cloned().unwrap_or(Value::Null);

        let uploads_playlist_id = item
            .get("contentDetails")
            .and_then(|cd| cd.get("relatedPlaylists"))
            .and_then(|rp| extract_string(rp, "uploads"))
            .ok_or_else(|| {
                IngestionError::ChannelResolution(format!(
                    "Channel {} has no uploads playlist",
                    channel_id
                ))
            })?;

        let metadata = ChannelMetadata {
            channel_id: channel_id.to_string(),
            title: extract_string(&snippet, "title").unwrap_or_default(),
            thumbnail_url: snippet
                .get("thumbnails")
                .and_then(|t| t.get("high").or_else(|| t.get("default")))
                .and_then(|v| extract_string(v, "url")),
            uploads_playlist_id,
            from_cache: false,
        };

        self.channel_cache
            .insert(channel_id.to_string(), metadata.clone())
            .await;

        Ok(metadata)
    }

    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        api_key: &str,
    ) -> Result<PlaylistPage> {
        let mut url = format!(
            "{}/playlistItems?part=snippet&playlistId={}&maxResults={}&key={}",
            self.base_url,
            urlencoding::encode(playlist_id),
            PAGE_SIZE,
            api_key
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let data = self.get_json(&url).await?;

        let items = data
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(PlaylistPage {
            items,
            next_page_token: extract_string(&data, "nextPageToken"),
        })
    }

    async fn fetch_video_stats(
        &self,
        video_ids: &[String],
        api_key: &str,
    ) -> Result<HashMap<String, Value>> {
        if video_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!(
            "{}/videos?part=statistics,snippet&id={}&key={}",
            self.base_url,
            video_ids.join(","),
            api_key
        );

        let data = self.get_json(&url).await?;

        let mut lookup = HashMap::new();
        if let Some(items) = data.get("items").and_then(|v| v.as_array()) {
            for item in items {
                if let Some(id) = extract_string(item, "id") {
                    lookup.insert(id, item.clone());
                }
            }
        }

        Ok(lookup)
    }
}
