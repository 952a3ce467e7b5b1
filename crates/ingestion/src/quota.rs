//! Shared daily quota budget tracking
//!
//! The quota row is shared, mutable state: it is re-read before every
//! quota-costly operation and never cached across sources. This tracker
//! is the only mutator of the row within the ingestion core.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::repository::QuotaRepository;

/// External API name keying the singleton quota row
pub const API_NAME: &str = "youtube";

/// Cost in quota units of one list-style API call (channel lookup,
/// playlist page, batched statistics).
pub const UNITS_PER_CALL: i64 = 1;

/// Remaining-units floor for normal-priority callers
const NORMAL_PRIORITY_FLOOR: i64 = 500;

/// Remaining-units floor for high-priority callers
const HIGH_PRIORITY_FLOOR: i64 = 100;

/// Snapshot of the shared quota record
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStatus {
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Caller priority for the quota gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPriority {
    /// Routine background syncs; requires a comfortable remaining budget.
    Normal,
    /// Operator-triggered work; allowed to run the budget lower.
    High,
}

impl QuotaPriority {
    fn floor(self) -> i64 {
        match self {
            QuotaPriority::Normal => NORMAL_PRIORITY_FLOOR,
            QuotaPriority::High => HIGH_PRIORITY_FLOOR,
        }
    }
}

/// Tracks and spends the shared daily quota budget
pub struct QuotaTracker {
    repo: Arc<dyn QuotaRepository>,
}

impl QuotaTracker {
    pub fn new(repo: Arc<dyn QuotaRepository>) -> Self {
        Self { repo }
    }

    /// One fresh read of the quota row.
    ///
    /// Returns `None` both when the row is absent and when the read
    /// fails; callers treat `None` as "unknown, proceed with caution"
    /// rather than a hard stop.
    pub async fn check_quota(&self) -> Option<QuotaStatus> {
        match self.repo.fetch_quota(API_NAME).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Quota record unreadable, treating as unknown: {:#}", e);
                None
            }
        }
    }

    /// Apply the priority-dependent floor to a fresh quota read.
    ///
    /// An absent or unreadable record yields `true`: availability over
    /// correctness, so a monitoring gap never halts ingestion entirely.
    pub async fn has_sufficient_quota(&self, priority: QuotaPriority) -> bool {
        match self.check_quota().await {
            Some(status) => {
                let sufficient = status.remaining >= priority.floor();
                if !sufficient {
                    debug!(
                        remaining = status.remaining,
                        floor = priority.floor(),
                        "Insufficient quota for priority {:?}",
                        priority
                    );
                }
                sufficient
            }
            None => {
                warn!("No quota record available, proceeding optimistically");
                true
            }
        }
    }

    /// Best-effort decrement after a costly call succeeds.
    ///
    /// Bookkeeping failures are logged, never propagated and never
    /// retried, so a failed spend cannot be double-applied.
    pub async fn spend(&self, units: i64) {
        if let Err(e) = self.repo.decrement_quota(API_NAME, units).await {
            warn!(units, "Failed to record quota spend: {:#}", e);
        }
    }
}
