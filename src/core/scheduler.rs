//! Cadence scheduler: multiplexes every recurring job onto one tick.
//!
//! The hosting environment provides a single time-based trigger, so
//! each job type gets a tick modulus instead of its own schedule. The
//! trade-off is deliberate: one slow job can delay the next branch
//! within the same tick, but the engine stays under the platform's
//! trigger quota. A failure in one branch never prevents the others
//! from running; the failed job simply retries at its next natural
//! tick.
//!
//! The circuit breaker is consulted before any work. When the pipeline
//! is halted, only the heartbeat runs.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::CadenceConfig;
use crate::discovery::DiscoveryEngine;
use crate::domain::{ContactStatus, HeartbeatRecord, PipelineMode};
use crate::store::{ContactStore, StoreError};

use super::breaker::CircuitBreaker;
use super::dispatcher::ChannelDispatcher;
use super::requeue::RequeueWorker;

/// What one tick did, for the operator and for tests
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub mode: PipelineMode,
    /// Branches that ran to completion this tick
    pub jobs_run: Vec<&'static str>,
    /// Branches that failed, with their error strings
    pub errors: Vec<(&'static str, String)>,
}

impl TickReport {
    fn new(tick: u64) -> Self {
        Self {
            tick,
            mode: PipelineMode::Working,
            jobs_run: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Did the named branch run this tick?
    pub fn ran(&self, job: &str) -> bool {
        self.jobs_run.iter().any(|j| *j == job)
    }
}

/// Counts for one research pass
#[derive(Debug, Clone, Default)]
pub struct ResearchSummary {
    /// New contacts moved into researching
    pub started: usize,
    /// Contacts with a strategy hint moved to research done
    pub completed: usize,
    /// Contacts parked in a terminal skip state
    pub parked: usize,
    /// Contacts still waiting on the external strategy hint
    pub waiting: usize,
}

/// Composes breaker, dispatcher, discovery, and requeue onto one tick
pub struct CadenceScheduler {
    store: Arc<ContactStore>,
    breaker: CircuitBreaker,
    dispatcher: Arc<ChannelDispatcher>,
    discovery: DiscoveryEngine,
    requeue: RequeueWorker,
    cadence: CadenceConfig,
    research_batch_cap: usize,
}

impl CadenceScheduler {
    pub fn new(
        store: Arc<ContactStore>,
        breaker: CircuitBreaker,
        dispatcher: Arc<ChannelDispatcher>,
        discovery: DiscoveryEngine,
        requeue: RequeueWorker,
        cadence: CadenceConfig,
        research_batch_cap: usize,
    ) -> Self {
        Self {
            store,
            breaker,
            dispatcher,
            discovery,
            requeue,
            cadence,
            research_batch_cap,
        }
    }

    /// Run one tick. Each branch is isolated: a failure is recorded
    /// and the remaining branches still run.
    #[instrument(skip(self))]
    pub async fn run_tick(&self, tick: u64) -> TickReport {
        let mut report = TickReport::new(tick);
        let now = Utc::now();

        // Breaker first, before any work is dispatched
        match self.breaker.check_and_trip() {
            Ok(verdict) => debug!(?verdict, "Breaker consulted"),
            Err(e) => {
                error!(error = %e, "Breaker check failed");
                report.errors.push(("breaker", e.to_string()));
            }
        }

        // An unreadable mode counts as halted: fail safe
        report.mode = self.store.mode().unwrap_or(PipelineMode::Halted);

        if report.mode.is_halted() {
            warn!(tick, "Pipeline halted; only the heartbeat runs");
            if due(tick, self.cadence.heartbeat_every) {
                let result = self.run_heartbeat(tick, report.mode);
                self.run_branch("heartbeat", &mut report, result);
            }
            self.finish_tick(tick);
            return report;
        }

        if due(tick, self.cadence.research_every) {
            let result = self.run_research_pass().map(|_| ());
            self.run_branch("research", &mut report, result);
        }

        if due(tick, self.cadence.message_every) {
            let result = self.dispatcher.run_message_pass(now).await.map(|_| ());
            self.run_branch("message", &mut report, result);
        }

        // Re-sample after dispatch work so a bad batch halts within the
        // same tick instead of waiting for the next one.
        let mut tripped_mid_tick = self.recheck_breaker(&mut report);

        if !tripped_mid_tick && due(tick, self.cadence.voice_every) {
            let result = self.dispatcher.run_voice_pass(now).await.map(|_| ());
            self.run_branch("voice", &mut report, result);
            tripped_mid_tick = self.recheck_breaker(&mut report);
        }

        if !tripped_mid_tick && due(tick, self.cadence.discovery_every) {
            let result = self.discovery.run_pass().await.map(|_| ());
            self.run_branch("discovery", &mut report, result);
        }

        if !tripped_mid_tick && due(tick, self.cadence.requeue_every) {
            let result = self.requeue.run_pass(now).map(|_| ());
            self.run_branch("requeue", &mut report, result);
        }

        if due(tick, self.cadence.heartbeat_every) {
            let mode = self.store.mode().unwrap_or(report.mode);
            let result = self.run_heartbeat(tick, mode);
            self.run_branch("heartbeat", &mut report, result);
        }

        self.finish_tick(tick);
        info!(
            tick,
            ran = ?report.jobs_run,
            failed = report.errors.len(),
            "Tick complete"
        );
        report
    }

    /// Record a branch outcome without letting its error escape
    fn run_branch(&self, name: &'static str, report: &mut TickReport, result: Result<()>) {
        match result {
            Ok(()) => report.jobs_run.push(name),
            Err(e) => {
                error!(branch = name, error = %e, "Branch failed; will retry on its next tick");
                report.errors.push((name, e.to_string()));
            }
        }
    }

    /// Mid-tick breaker consultation; true when the latch is now shut
    fn recheck_breaker(&self, report: &mut TickReport) -> bool {
        match self.breaker.check_and_trip() {
            Ok(verdict) => {
                debug!(?verdict, "Breaker re-sampled mid-tick");
                let halted = self.store.mode().map(|m| m.is_halted()).unwrap_or(true);
                if halted {
                    report.mode = PipelineMode::Halted;
                    warn!("Breaker tripped mid-tick; remaining dispatch work skipped");
                }
                halted
            }
            Err(e) => {
                report.errors.push(("breaker", e.to_string()));
                true
            }
        }
    }

    /// Research pass: validate new contacts and promote those whose
    /// strategy hint has arrived from the external generator.
    pub fn run_research_pass(&self) -> Result<ResearchSummary> {
        let mut summary = ResearchSummary::default();

        // Snapshot before validating new contacts, so a contact moves
        // one step per pass at most.
        let researching = self
            .store
            .contacts_with_status(ContactStatus::Researching, self.research_batch_cap)?;

        for contact in self
            .store
            .contacts_with_status(ContactStatus::New, self.research_batch_cap)?
        {
            let next = if !contact.has_contact_path() {
                ContactStatus::NoContactInfo
            } else if contact.website.is_none() {
                ContactStatus::SkippedNoUrl
            } else {
                ContactStatus::Researching
            };

            match self.store.update_status(&contact, next) {
                Ok(()) => {
                    if next == ContactStatus::Researching {
                        summary.started += 1;
                    } else {
                        summary.parked += 1;
                    }
                }
                Err(StoreError::VersionConflict { .. }) => {}
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Research validation failed");
                }
            }
        }

        for contact in researching {
            if contact.strategy_hint.is_none() {
                summary.waiting += 1;
                continue;
            }

            match self
                .store
                .update_status(&contact, ContactStatus::ResearchDone)
            {
                Ok(()) => summary.completed += 1,
                Err(StoreError::VersionConflict { .. }) => {}
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Research promotion failed");
                }
            }
        }

        debug!(
            started = summary.started,
            completed = summary.completed,
            parked = summary.parked,
            waiting = summary.waiting,
            "Research pass complete"
        );
        Ok(summary)
    }

    fn run_heartbeat(&self, tick: u64, mode: PipelineMode) -> Result<()> {
        let note = match mode {
            PipelineMode::Working => "ok",
            PipelineMode::Halted => "halted",
        };
        self.store
            .append_heartbeat(&HeartbeatRecord::new(tick, mode, note))?;
        Ok(())
    }

    /// Stamp the run marker. Last writer wins, like the rest of
    /// PipelineState.
    fn finish_tick(&self, tick: u64) {
        if let Err(e) = self.store.set_state("last_tick", &tick.to_string()) {
            warn!(error = %e, "Failed to record last tick");
        }
    }
}

/// Whether a job with the given modulus fires on this tick
fn due(tick: u64, every: u64) -> bool {
    every > 0 && tick % every == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_modulo() {
        assert!(due(0, 1));
        assert!(due(10, 10));
        assert!(due(30, 10));
        assert!(!due(5, 10));

        // A zero modulus disables the job rather than dividing by zero
        assert!(!due(10, 0));
    }
}
