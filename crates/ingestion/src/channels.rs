//! Source selection for a sync run

use std::sync::Arc;
use tracing::warn;

use crate::repository::{ChannelRef, ChannelRepository};

/// Resolves the ordered set of channels a run will sync
pub struct ChannelSelector {
    repo: Arc<dyn ChannelRepository>,
}

impl ChannelSelector {
    pub fn new(repo: Arc<dyn ChannelRepository>) -> Self {
        Self { repo }
    }

    /// List the channels to sync.
    ///
    /// An explicit non-empty list is returned unchanged (caller-scoped
    /// run). Otherwise all active channels are returned ordered by last
    /// sync ascending with never-synced channels first, so new sources
    /// are not starved by recently-synced ones.
    ///
    /// Store failures degrade to a reduced-column query, then to an
    /// empty list; an empty list is a valid result that short-circuits
    /// the run rather than an error.
    pub async fn list_sources(&self, explicit: Option<&[String]>) -> Vec<ChannelRef> {
        if let Some(ids) = explicit {
            if !ids.is_empty() {
                return ids.iter().map(ChannelRef::from_id).collect();
            }
        }

        match self.repo.active_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Channel query failed, retrying with reduced columns: {:#}", e);
                match self.repo.active_channel_ids().await {
                    Ok(ids) => ids.into_iter().map(ChannelRef::from_id).collect(),
                    Err(e) => {
                        warn!("Reduced channel query also failed: {:#}", e);
                        Vec::new()
                    }
                }
            }
        }
    }
}
