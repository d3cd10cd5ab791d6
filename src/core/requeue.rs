//! Self-healing requeue: reclaims unresponsive contacts.
//!
//! The only intentional backward edge in the state machine. Contacts
//! that went quiet after dispatch are cycled back into the dispatchable
//! pool with a retry delay, bounded by the ghost-count ceiling; past
//! the ceiling they are trashed for good.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::config::RequeueConfig;
use crate::store::{ContactStore, StoreError};

/// Counts for one requeue pass
#[derive(Debug, Clone, Default)]
pub struct RequeueSummary {
    /// Ghost candidates examined
    pub examined: usize,
    /// Cycled back to the dispatchable pool
    pub requeued: usize,
    /// Ceiling exhausted; permanently trashed
    pub trashed: usize,
    /// Lost races, skipped this pass
    pub skipped: usize,
}

/// Recovers ghosts back into the pipeline, bounded by the ceiling
pub struct RequeueWorker {
    store: Arc<ContactStore>,
    cfg: RequeueConfig,
}

impl RequeueWorker {
    pub fn new(store: Arc<ContactStore>, cfg: RequeueConfig) -> Self {
        Self { store, cfg }
    }

    /// One requeue pass over contacts that have been silent past the
    /// observation window.
    #[instrument(skip(self))]
    pub fn run_pass(&self, now: DateTime<Utc>) -> Result<RequeueSummary> {
        let cutoff = now - Duration::days(self.cfg.observation_days);
        let candidates = self.store.ghost_candidates(cutoff, self.cfg.batch_cap)?;

        let mut summary = RequeueSummary {
            examined: candidates.len(),
            ..Default::default()
        };

        for contact in candidates {
            if contact.ghost_count >= self.cfg.ghost_ceiling {
                match self.store.trash_ghost(&contact) {
                    Ok(()) => {
                        info!(contact_id = %contact.id, ghost_count = contact.ghost_count, "Ghost ceiling exhausted; trashed");
                        summary.trashed += 1;
                    }
                    Err(StoreError::VersionConflict { .. }) => summary.skipped += 1,
                    Err(e) => {
                        warn!(contact_id = %contact.id, error = %e, "Failed to trash ghost");
                        summary.skipped += 1;
                    }
                }
                continue;
            }

            let retry_at = now + Duration::days(self.cfg.retry_delay_days);
            match self.store.requeue_ghost(&contact, retry_at) {
                Ok(()) => {
                    info!(
                        contact_id = %contact.id,
                        ghost_count = contact.ghost_count + 1,
                        "Ghost requeued for another attempt"
                    );
                    summary.requeued += 1;
                }
                Err(StoreError::VersionConflict { .. }) => summary.skipped += 1,
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Failed to requeue ghost");
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }
}
