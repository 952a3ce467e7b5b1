//! Batched video persistence
//!
//! Chunks normalized records into fixed-size batches, dedupes each
//! batch on the natural key, and upserts one batch per transaction with
//! a pacing delay in between. A failed batch is logged and skipped so
//! one poisoned batch cannot sink a whole channel's worth of records.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::normalizer::VideoRecord;
use crate::repository::VideoRepository;
use crate::youtube::PAGE_SIZE;

/// Delay between consecutive batch writes
const INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

/// What a write pass actually persisted
#[derive(Debug, Default)]
pub struct WriteSummary {
    /// Records the store confirmed, in write order.
    pub written: Vec<VideoRecord>,
    /// How many of those created a new row rather than refreshing one.
    pub new_count: usize,
}

/// Writes normalized records to the store in paced, deduplicated batches
pub struct BatchUpsertWriter {
    repo: Arc<dyn VideoRepository>,
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl BatchUpsertWriter {
    pub fn new(repo: Arc<dyn VideoRepository>) -> Self {
        Self {
            repo,
            batch_size: PAGE_SIZE,
            inter_batch_delay: INTER_BATCH_DELAY,
        }
    }

    /// Override batch size and pacing (tests).
    pub fn with_timings(mut self, batch_size: usize, inter_batch_delay: Duration) -> Self {
        self.batch_size = batch_size;
        self.inter_batch_delay = inter_batch_delay;
        self
    }

    /// Persist `records`, returning what the store confirmed.
    ///
    /// Records are deduplicated on video ID keeping the first
    /// occurrence; the upsert would otherwise touch the same row twice
    /// in one statement's transaction.
    pub async fn write(&self, records: Vec<VideoRecord>) -> WriteSummary {
        let deduped = dedupe_by_video_id(records);
        if deduped.is_empty() {
            return WriteSummary::default();
        }

        let mut summary = WriteSummary {
            written: Vec::with_capacity(deduped.len()),
            new_count: 0,
        };
        let total_batches = deduped.len().div_ceil(self.batch_size);

        for (index, batch) in deduped.chunks(self.batch_size).enumerate() {
            if index > 0 {
                sleep(self.inter_batch_delay).await;
            }

            match self.repo.upsert_batch(batch).await {
                Ok(outcomes) => {
                    let confirmed: HashMap<String, bool> = outcomes
                        .into_iter()
                        .map(|o| (o.video_id, o.inserted))
                        .collect();
                    for record in batch {
                        if let Some(inserted) = confirmed.get(&record.video_id) {
                            if *inserted {
                                summary.new_count += 1;
                            }
                            summary.written.push(record.clone());
                        }
                    }
                    debug!(
                        batch = index + 1,
                        total_batches,
                        size = batch.len(),
                        "Batch upserted"
                    );
                }
                Err(e) => {
                    // Skip and continue: later batches still get written
                    warn!(
                        batch = index + 1,
                        total_batches,
                        size = batch.len(),
                        "Batch upsert failed, skipping: {:#}",
                        e
                    );
                }
            }
        }

        summary
    }
}

fn dedupe_by_video_id(records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(r.video_id.clone()))
        .collect()
}
