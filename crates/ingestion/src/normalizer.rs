//! Normalization of raw API listing items into canonical video records
//!
//! Normalization is pure and total: a malformed item yields a
//! best-effort record instead of an error, so one bad item never aborts
//! a page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Thumbnail variants in preference order, highest resolution first
const THUMBNAIL_PREFERENCE: [&str; 5] = ["maxres", "standard", "high", "medium", "default"];

/// Canonical video record as persisted in the `videos` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// External video ID, the natural key for upsert
    pub video_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    /// Owning channel's external ID
    pub channel_id: String,
    /// Channel display name, denormalized at ingestion time
    pub channel_name: String,
    pub views: i64,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// Reduced projection of a video row for the browse surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub video_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub channel_name: Option<String>,
    pub views: i64,
}

/// Extract a string field from a JSON value
pub(crate) fn extract_string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Pick the best available thumbnail from a `thumbnails` object,
/// walking the fixed preference ladder.
fn pick_thumbnail(snippet: &Value) -> Option<String> {
    let thumbnails = snippet.get("thumbnails")?;
    THUMBNAIL_PREFERENCE
        .iter()
        .find_map(|variant| thumbnails.get(variant).and_then(|t| extract_string(t, "url")))
}

/// Parse a view count that the API returns as a decimal string.
/// Defaults to 0 on any parse failure.
fn parse_views(stats_item: &Value) -> i64 {
    stats_item
        .get("statistics")
        .and_then(|s| s.get("viewCount"))
        .and_then(|v| match v {
            Value::String(s) => s.parse::<i64>().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        })
        .filter(|views| *views >= 0)
        .unwrap_or(0)
}

/// Normalize one raw playlist item plus its statistics entry into a
/// [`VideoRecord`].
///
/// `stats_lookup` is keyed by video ID and holds the matching item of
/// the batched statistics response for the page. Missing or malformed
/// fields degrade to defaults; this function performs no I/O and never
/// fails.
pub fn normalize(
    raw_item: &Value,
    stats_lookup: &HashMap<String, Value>,
    channel_id: &str,
    channel_title: &str,
) -> VideoRecord {
    let snippet = raw_item.get("snippet").cloned().unwrap_or(Value::Null);

    // Playlist items carry the video ID under snippet.resourceId;
    // a bare video item carries it as a top-level id string.
    let video_id = snippet
        .get("resourceId")
        .and_then(|r| extract_string(r, "videoId"))
        .or_else(|| extract_string(raw_item, "id"))
        .unwrap_or_default();

    let stats_item = stats_lookup.get(&video_id);

    let views = stats_item.map(parse_views).unwrap_or(0);

    let description = stats_item
        .and_then(|item| item.get("snippet"))
        .and_then(|s| extract_string(s, "description"))
        .or_else(|| extract_string(&snippet, "description"))
        .filter(|d| !d.is_empty());

    let uploaded_at = extract_string(&snippet, "publishedAt")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    VideoRecord {
        video_id,
        title: extract_string(&snippet, "title").unwrap_or_default(),
        thumbnail: pick_thumbnail(&snippet),
        channel_id: channel_id.to_string(),
        channel_name: channel_title.to_string(),
        views,
        uploaded_at,
        description,
    }
}
