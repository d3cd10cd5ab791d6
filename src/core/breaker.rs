//! Circuit breaker (sentinel guard) for the dispatch pipeline.
//!
//! Samples the most recent touches, excluding the passive call-status
//! channel, and halts the whole pipeline once the failure count inside
//! the window reaches the threshold. The trip is a one-way latch:
//! nothing in the engine clears `halted`; recovery is the explicit,
//! audited `clear` operation.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::domain::PipelineMode;
use crate::store::ContactStore;

/// What the breaker concluded from the current sampling window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerVerdict {
    /// Pipeline already halted; no sampling performed
    AlreadyHalted,

    /// Not enough history to judge; never trips
    InsufficientSample { sampled: usize },

    /// Failure count below threshold
    Healthy { failures: usize, sampled: usize },

    /// Threshold reached; pipeline mode set to halted
    Tripped { failures: usize, sampled: usize },
}

/// Failure-rate kill switch consulted before every tick
pub struct CircuitBreaker {
    store: Arc<ContactStore>,
    cfg: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<ContactStore>, cfg: BreakerConfig) -> Self {
        Self { store, cfg }
    }

    /// Current latch state
    pub fn is_halted(&self) -> Result<bool> {
        Ok(self.store.mode()?.is_halted())
    }

    /// Sample the recent touch window and trip the latch if the failure
    /// threshold is reached.
    pub fn check_and_trip(&self) -> Result<BreakerVerdict> {
        if self.store.mode()?.is_halted() {
            return Ok(BreakerVerdict::AlreadyHalted);
        }

        // Explicit insufficient-sample guard: with fewer than a full
        // window of history the breaker must never trip.
        let total = self.store.touch_count()? as usize;
        if total < self.cfg.sample_size {
            return Ok(BreakerVerdict::InsufficientSample { sampled: total });
        }

        let window = self.store.recent_touches(self.cfg.sample_size)?;
        let sampled = window.len();
        let failures = window.iter().filter(|t| t.outcome.is_failure()).count();

        if failures >= self.cfg.failure_threshold {
            let reason = format!(
                "{} of last {} dispatch outcomes failed",
                failures, sampled
            );
            self.trip(&reason)?;
            return Ok(BreakerVerdict::Tripped { failures, sampled });
        }

        Ok(BreakerVerdict::Healthy { failures, sampled })
    }

    /// Force the latch shut. Also the operator-facing manual halt.
    pub fn trip(&self, reason: &str) -> Result<()> {
        warn!(%reason, "Circuit breaker tripped; pipeline halted");
        self.store.set_mode(PipelineMode::Halted, Some(reason))?;
        Ok(())
    }

    /// The explicit recovery operation. Logged so every clear leaves an
    /// audit trail; never invoked by the engine itself.
    pub fn clear(&self, reason: &str) -> Result<()> {
        info!(%reason, "Circuit breaker cleared; pipeline resuming");
        self.store.set_mode(PipelineMode::Working, None)?;
        self.store.set_state("resume_reason", reason)?;
        Ok(())
    }
}
