//! Run orchestration: one ingest request end to end
//!
//! Walks the selected sources sequentially, gating each on the shared
//! quota budget, paging through its uploads, normalizing and batch
//! upserting the results. Failures are isolated per source; the one
//! exception is quota exhaustion, which aborts the remaining queue
//! immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::channels::ChannelSelector;
use crate::fetcher::PaginatedFetcher;
use crate::normalizer::normalize;
use crate::quota::{QuotaPriority, QuotaTracker};
use crate::repository::ChannelRepository;
use crate::writer::BatchUpsertWriter;
use crate::IngestionError;

/// API credentials available to a run
#[derive(Debug, Clone)]
pub struct ApiKeys {
    pub primary: String,
    /// Separate credential with its own external budget, used when the
    /// shared budget is too low for the primary key.
    pub fallback: Option<String>,
}

/// Parameters of one ingest run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Explicit channel scope; `None` or empty means all active channels.
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    /// Operator-triggered refresh; runs the quota budget lower before
    /// the gate blocks.
    #[serde(default)]
    pub force_update: bool,
    /// Cap on how many channels one run may process.
    #[serde(default)]
    pub max_channels_per_run: Option<usize>,
    /// Skip the quota gate entirely (last-resort strategy only).
    #[serde(default)]
    pub bypass_quota_check: bool,
}

impl IngestRequest {
    pub fn priority(&self) -> QuotaPriority {
        if self.force_update {
            QuotaPriority::High
        } else {
            QuotaPriority::Normal
        }
    }
}

/// Terminal state of one source within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelSyncStatus {
    Synced,
    SkippedQuota,
    Failed,
}

/// Per-source outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub status: ChannelSyncStatus,
    pub videos_processed: usize,
    pub new_videos: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one ingest run
///
/// `success: false` tells a fallback caller to try its next strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub success: bool,
    /// Total videos upserted across all sources.
    pub processed: usize,
    /// How many of those created a new row.
    pub new_videos: usize,
    pub results: Vec<ChannelOutcome>,
    /// Fresh budget read taken after the run, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<i64>,
    /// The run hit the external quota wall and aborted early.
    pub quota_exhausted: bool,
    /// When the external budget resets, echoed from the quota row on
    /// exhaustion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_reset_at: Option<DateTime<Utc>>,
    /// Diagnostic only; the fallback credential behaves identically.
    pub used_fallback_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl IngestReport {
    fn empty(used_fallback_key: bool) -> Self {
        Self {
            success: false,
            processed: 0,
            new_videos: 0,
            results: Vec::new(),
            quota_remaining: None,
            quota_exhausted: false,
            quota_reset_at: None,
            used_fallback_key,
            message: None,
            duration_ms: 0,
        }
    }
}

/// Bookkeeping applied after a source's records are committed.
///
/// Effects are collected during the source's sync and applied as an
/// ordered list once the writes are done; each is best-effort and a
/// failed effect never undoes the committed records.
enum PostCommitEffect {
    MarkSynced {
        channel_id: String,
    },
    RecordFetchError {
        channel_id: String,
        message: String,
    },
    RefreshMetadata {
        channel_id: String,
        title: String,
        thumbnail_url: Option<String>,
    },
}

/// Outcome of syncing one source, before bookkeeping
enum SourceResult {
    Synced { processed: usize, new_videos: usize },
    Failed(String),
    QuotaWall,
}

/// Drives one ingest run across the selected sources
pub struct IngestPipeline {
    selector: ChannelSelector,
    fetcher: PaginatedFetcher,
    writer: BatchUpsertWriter,
    quota: Arc<QuotaTracker>,
    channel_repo: Arc<dyn ChannelRepository>,
    keys: ApiKeys,
}

impl IngestPipeline {
    pub fn new(
        selector: ChannelSelector,
        fetcher: PaginatedFetcher,
        writer: BatchUpsertWriter,
        quota: Arc<QuotaTracker>,
        channel_repo: Arc<dyn ChannelRepository>,
        keys: ApiKeys,
    ) -> Self {
        Self {
            selector,
            fetcher,
            writer,
            quota,
            channel_repo,
            keys,
        }
    }

    /// Execute one ingest run.
    ///
    /// Never returns an error: every failure mode is folded into the
    /// report so callers and schedulers always get a full accounting.
    pub async fn run(&self, request: &IngestRequest) -> IngestReport {
        let started = Instant::now();
        let priority = request.priority();

        // Credential choice is made once per run. When the shared
        // budget fails the gate and a fallback credential exists, the
        // run proceeds on the fallback and skips further gating; that
        // credential draws on its own external budget.
        let mut used_fallback_key = false;
        let api_key = if request.bypass_quota_check {
            self.keys.primary.clone()
        } else if self.quota.has_sufficient_quota(priority).await {
            self.keys.primary.clone()
        } else if let Some(fallback) = &self.keys.fallback {
            info!("Shared quota below floor, switching to fallback credential");
            used_fallback_key = true;
            fallback.clone()
        } else {
            warn!("Shared quota below floor and no fallback credential, run blocked");
            return self
                .finish(
                    IngestReport {
                        message: Some("Insufficient API quota remaining".to_string()),
                        ..IngestReport::empty(used_fallback_key)
                    },
                    started,
                )
                .await;
        };

        let mut sources = self.selector.list_sources(request.channels.as_deref()).await;
        if let Some(cap) = request.max_channels_per_run {
            sources.truncate(cap);
        }
        if sources.is_empty() {
            info!("No sources selected, nothing to ingest");
            return self
                .finish(
                    IngestReport {
                        success: true,
                        message: Some("No channels to sync".to_string()),
                        ..IngestReport::empty(used_fallback_key)
                    },
                    started,
                )
                .await;
        }

        info!(sources = sources.len(), force_update = request.force_update, "Ingest run starting");

        let gate_each_source = !request.bypass_quota_check && !used_fallback_key;

        let mut report = IngestReport::empty(used_fallback_key);

        for source in &sources {
            // The budget is shared mutable state; re-read it before
            // every source instead of trusting the run-start view.
            if gate_each_source && !self.quota.has_sufficient_quota(priority).await {
                report.results.push(ChannelOutcome {
                    channel_id: source.channel_id.clone(),
                    status: ChannelSyncStatus::SkippedQuota,
                    videos_processed: 0,
                    new_videos: 0,
                    error: None,
                });
                continue;
            }

            let mut effects = Vec::new();
            let result = self
                .sync_source(&source.channel_id, &api_key, &mut effects)
                .await;
            self.apply_effects(effects).await;

            match result {
                SourceResult::Synced {
                    processed,
                    new_videos,
                } => {
                    report.processed += processed;
                    report.new_videos += new_videos;
                    report.results.push(ChannelOutcome {
                        channel_id: source.channel_id.clone(),
                        status: ChannelSyncStatus::Synced,
                        videos_processed: processed,
                        new_videos,
                        error: None,
                    });
                }
                SourceResult::Failed(message) => {
                    warn!(channel_id = %source.channel_id, "Source failed: {}", message);
                    report.results.push(ChannelOutcome {
                        channel_id: source.channel_id.clone(),
                        status: ChannelSyncStatus::Failed,
                        videos_processed: 0,
                        new_videos: 0,
                        error: Some(message),
                    });
                }
                SourceResult::QuotaWall => {
                    warn!(
                        channel_id = %source.channel_id,
                        "External quota exhausted, aborting remaining sources"
                    );
                    report.results.push(ChannelOutcome {
                        channel_id: source.channel_id.clone(),
                        status: ChannelSyncStatus::Failed,
                        videos_processed: 0,
                        new_videos: 0,
                        error: Some("quota exhausted".to_string()),
                    });
                    report.quota_exhausted = true;
                    report.message = Some("API quota exhausted mid-run".to_string());
                    break;
                }
            }
        }

        report.success = !report.quota_exhausted
            && report
                .results
                .iter()
                .any(|outcome| outcome.status == ChannelSyncStatus::Synced);

        let report = self.finish(report, started).await;
        info!(
            success = report.success,
            processed = report.processed,
            new_videos = report.new_videos,
            channels = report.results.len(),
            quota_exhausted = report.quota_exhausted,
            duration_ms = report.duration_ms,
            "Ingest run finished"
        );
        report
    }

    /// Stamp the duration and attach a fresh quota reading. A run that
    /// hit the wall also surfaces the reset timestamp from that reading.
    async fn finish(&self, mut report: IngestReport, started: Instant) -> IngestReport {
        if let Some(status) = self.quota.check_quota().await {
            report.quota_remaining = Some(status.remaining);
            if report.quota_exhausted {
                report.quota_reset_at = status.reset_at;
            }
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Sync one source: resolve, page, normalize, write.
    async fn sync_source(
        &self,
        channel_id: &str,
        api_key: &str,
        effects: &mut Vec<PostCommitEffect>,
    ) -> SourceResult {
        let (metadata, mut pager) = match self.fetcher.open(channel_id, api_key).await {
            Ok(opened) => opened,
            Err(e) if e.is_quota_exhausted() => return SourceResult::QuotaWall,
            Err(e) => {
                effects.push(PostCommitEffect::RecordFetchError {
                    channel_id: channel_id.to_string(),
                    message: e.to_string(),
                });
                return SourceResult::Failed(e.to_string());
            }
        };

        let mut records = Vec::new();
        loop {
            match pager.next_page().await {
                Ok(Some(page)) => {
                    for item in &page.items {
                        records.push(normalize(item, &page.stats, channel_id, &metadata.title));
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_quota_exhausted() => {
                    // Keep what was fetched before the wall; abandoning
                    // complete pages would waste already-spent budget.
                    self.writer.write(records).await;
                    // Only partially fetched: recording the interruption
                    // instead of a sync keeps the channel's staleness
                    // ranking so the next run picks it up again first.
                    effects.push(PostCommitEffect::RecordFetchError {
                        channel_id: channel_id.to_string(),
                        message: "quota exhausted mid-fetch".to_string(),
                    });
                    return SourceResult::QuotaWall;
                }
                Err(e) => {
                    effects.push(PostCommitEffect::RecordFetchError {
                        channel_id: channel_id.to_string(),
                        message: e.to_string(),
                    });
                    return SourceResult::Failed(e.to_string());
                }
            }
        }

        let summary = self.writer.write(records).await;

        effects.push(PostCommitEffect::MarkSynced {
            channel_id: channel_id.to_string(),
        });
        effects.push(PostCommitEffect::RefreshMetadata {
            channel_id: channel_id.to_string(),
            title: metadata.title.clone(),
            thumbnail_url: metadata.thumbnail_url.clone(),
        });

        SourceResult::Synced {
            processed: summary.written.len(),
            new_videos: summary.new_count,
        }
    }

    /// Apply post-commit bookkeeping in order; each effect is
    /// best-effort and logged on failure.
    async fn apply_effects(&self, effects: Vec<PostCommitEffect>) {
        for effect in effects {
            let result = match &effect {
                PostCommitEffect::MarkSynced { channel_id } => {
                    self.channel_repo.mark_synced(channel_id).await
                }
                PostCommitEffect::RecordFetchError {
                    channel_id,
                    message,
                } => {
                    self.channel_repo
                        .record_fetch_error(channel_id, message)
                        .await
                }
                PostCommitEffect::RefreshMetadata {
                    channel_id,
                    title,
                    thumbnail_url,
                } => {
                    self.channel_repo
                        .refresh_metadata(channel_id, title, thumbnail_url.as_deref())
                        .await
                }
            };
            if let Err(e) = result {
                warn!("Post-commit bookkeeping failed: {:#}", e);
            }
        }
    }
}

/// Strategy adapter: a report whose `success` flag is false becomes an
/// error so the fallback chain moves on to its next strategy.
pub(crate) fn report_as_result(report: IngestReport) -> crate::Result<IngestReport> {
    if report.success {
        return Ok(report);
    }
    if report.quota_exhausted {
        return Err(IngestionError::QuotaExhausted {
            reset_at: report.quota_reset_at,
        });
    }
    Err(IngestionError::Api(
        report
            .message
            .unwrap_or_else(|| "Ingest run reported no success".to_string()),
    ))
}
