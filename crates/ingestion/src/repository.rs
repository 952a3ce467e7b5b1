//! Store repositories for channels, videos, and the shared quota row

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::normalizer::{VideoRecord, VideoSummary};
use crate::quota::QuotaStatus;

/// Reference to a syncable channel
#[derive(Debug, Clone)]
pub struct ChannelRef {
    /// External channel ID (natural key)
    pub channel_id: String,
    /// Display title, if already known to the store
    pub title: Option<String>,
    /// Last successful sync, used for staleness ordering
    pub last_fetch: Option<DateTime<Utc>>,
}

impl ChannelRef {
    /// Build a reference from an externally supplied ID; title and
    /// sync state are resolved later.
    pub fn from_id(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            title: None,
            last_fetch: None,
        }
    }
}

/// Channel repository for source selection and sync bookkeeping
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// All non-deleted channels ordered by last sync ascending, nulls
    /// first, so perpetually-unsynced channels are prioritized.
    async fn active_channels(&self) -> Result<Vec<ChannelRef>>;

    /// Reduced-column fallback for the same selection.
    async fn active_channel_ids(&self) -> Result<Vec<String>>;

    /// Record a successful sync: refresh `last_fetch`, clear `fetch_error`.
    async fn mark_synced(&self, channel_id: &str) -> Result<()>;

    /// Record a failed or interrupted sync on the channel without
    /// aborting the run. `last_fetch` is left untouched.
    async fn record_fetch_error(&self, channel_id: &str, message: &str) -> Result<()>;

    /// Refresh the denormalized channel metadata captured at resolve time.
    async fn refresh_metadata(
        &self,
        channel_id: &str,
        title: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<()>;
}

/// Store confirmation for one upserted video
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub video_id: String,
    /// True when the row was created, false when an existing row was
    /// refreshed in place.
    pub inserted: bool,
}

/// Video repository for batched natural-key upserts and browse reads
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Upsert a batch of records in one transaction, keyed on the
    /// external video ID. Returns one outcome per row the store
    /// confirmed.
    ///
    /// Fields owned by other subsystems (`status`, `deleted_at`) are
    /// never part of the update clause and survive re-ingestion.
    async fn upsert_batch(&self, records: &[VideoRecord]) -> Result<Vec<UpsertOutcome>>;

    /// Full-column browse query, newest uploads first.
    async fn list_videos(&self, limit: i64) -> Result<Vec<VideoSummary>>;

    /// Reduced-column browse query for degraded reads.
    async fn list_videos_reduced(&self, limit: i64) -> Result<Vec<VideoSummary>>;
}

/// Quota repository for the shared singleton budget row
#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// One fresh read of the quota row for the named API.
    async fn fetch_quota(&self, api_name: &str) -> Result<Option<QuotaStatus>>;

    /// Decrement the remaining budget. The row is never incremented by
    /// this core; resets happen externally on a rolling window.
    async fn decrement_quota(&self, api_name: &str, units: i64) -> Result<()>;
}

/// PostgreSQL implementation of all ingestion repositories
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PostgresRepository {
    async fn active_channels(&self) -> Result<Vec<ChannelRef>> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, title, last_fetch
            FROM channels
            WHERE deleted_at IS NULL
            ORDER BY last_fetch ASC NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list active channels")?;

        Ok(rows
            .into_iter()
            .map(|row| ChannelRef {
                channel_id: row.get("channel_id"),
                title: row.get("title"),
                last_fetch: row.get("last_fetch"),
            })
            .collect())
    }

    async fn active_channel_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT channel_id FROM channels WHERE deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list active channel ids")?;

        Ok(rows)
    }

    async fn mark_synced(&self, channel_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET last_fetch = $1, fetch_error = NULL WHERE channel_id = $2",
        )
        .bind(Utc::now())
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark channel synced")?;

        Ok(())
    }

    async fn record_fetch_error(&self, channel_id: &str, message: &str) -> Result<()> {
        // last_fetch tracks successful syncs only; a failed or
        // interrupted channel keeps its staleness ranking.
        sqlx::query("UPDATE channels SET fetch_error = $1 WHERE channel_id = $2")
            .bind(message)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .context("Failed to record channel fetch error")?;

        Ok(())
    }

    async fn refresh_metadata(
        &self,
        channel_id: &str,
        title: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channels
            SET title = $1,
                thumbnail_url = COALESCE($2, thumbnail_url)
            WHERE channel_id = $3
            "#,
        )
        .bind(title)
        .bind(thumbnail_url)
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .context("Failed to refresh channel metadata")?;

        Ok(())
    }
}

#[async_trait]
impl VideoRepository for PostgresRepository {
    async fn upsert_batch(&self, records: &[VideoRecord]) -> Result<Vec<UpsertOutcome>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin batch transaction")?;

        let mut written = Vec::with_capacity(records.len());

        for record in records {
            // Ingestion-owned fields only; status and deleted_at are
            // owned by the moderation and admin subsystems. xmax = 0
            // distinguishes a fresh insert from a conflict update.
            let row = sqlx::query(
                r#"
                INSERT INTO videos (
                    video_id, title, thumbnail, channel_id, channel_name,
                    views, uploaded_at, description, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (video_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    thumbnail = EXCLUDED.thumbnail,
                    channel_id = EXCLUDED.channel_id,
                    channel_name = EXCLUDED.channel_name,
                    views = EXCLUDED.views,
                    uploaded_at = EXCLUDED.uploaded_at,
                    description = EXCLUDED.description,
                    updated_at = EXCLUDED.updated_at
                RETURNING video_id, (xmax = 0) AS inserted
                "#,
            )
            .bind(&record.video_id)
            .bind(&record.title)
            .bind(&record.thumbnail)
            .bind(&record.channel_id)
            .bind(&record.channel_name)
            .bind(record.views)
            .bind(record.uploaded_at)
            .bind(&record.description)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .context("Failed to upsert video")?;

            written.push(UpsertOutcome {
                video_id: row.get("video_id"),
                inserted: row.get("inserted"),
            });
        }

        tx.commit()
            .await
            .context("Failed to commit batch transaction")?;

        Ok(written)
    }

    async fn list_videos(&self, limit: i64) -> Result<Vec<VideoSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT video_id, title, thumbnail, channel_name, views
            FROM videos
            WHERE deleted_at IS NULL
            ORDER BY uploaded_at DESC NULLS LAST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list videos")?;

        Ok(rows
            .into_iter()
            .map(|row| VideoSummary {
                video_id: row.get("video_id"),
                title: row.get("title"),
                thumbnail: row.get("thumbnail"),
                channel_name: row.get("channel_name"),
                views: row.get("views"),
            })
            .collect())
    }

    async fn list_videos_reduced(&self, limit: i64) -> Result<Vec<VideoSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT video_id, title
            FROM videos
            WHERE deleted_at IS NULL
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list videos (reduced)")?;

        Ok(rows
            .into_iter()
            .map(|row| VideoSummary {
                video_id: row.get("video_id"),
                title: row.get("title"),
                thumbnail: None,
                channel_name: None,
                views: 0,
            })
            .collect())
    }
}

#[async_trait]
impl QuotaRepository for PostgresRepository {
    async fn fetch_quota(&self, api_name: &str) -> Result<Option<QuotaStatus>> {
        let row = sqlx::query(
            "SELECT quota_remaining, quota_reset_at FROM api_quota WHERE api_name = $1",
        )
        .bind(api_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read quota record")?;

        Ok(row.map(|row| QuotaStatus {
            remaining: row.get("quota_remaining"),
            reset_at: row.get("quota_reset_at"),
        }))
    }

    async fn decrement_quota(&self, api_name: &str, units: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE api_quota
            SET quota_remaining = quota_remaining - $1,
                updated_at = $2
            WHERE api_name = $3
            "#,
        )
        .bind(units)
        .bind(Utc::now())
        .bind(api_name)
        .execute(&self.pool)
        .await
        .context("Failed to decrement quota")?;

        Ok(())
    }
}
