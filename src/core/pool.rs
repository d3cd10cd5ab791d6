//! Bounded worker pool for dispatch jobs.
//!
//! The scheduler enqueues typed jobs; a fixed number of workers consume
//! them and report outcomes back on a shared channel. This replaces
//! fire-and-forget sub-invocations: the tick sees every outcome, so the
//! breaker's sampling window is accurate in real time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Channel, Contact, TouchOutcome};

/// Why a dispatch job was issued; decides the follow-up status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPurpose {
    /// First outreach attempt for a contact
    Outreach,

    /// Drip message advancing the contact to this nurture stage
    Nurture { stage: u32 },

    /// Voice follow-up call
    Voice,
}

/// One unit of dispatch work handed to the pool
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub contact: Contact,
    pub channel: Channel,
    pub message: String,
    pub purpose: DispatchPurpose,
}

/// What a worker reports back for one job
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub contact_id: Uuid,
    pub channel: Channel,
    pub outcome: TouchOutcome,
    pub error: Option<String>,
}

/// Executes one dispatch job end to end (provider call, touch, status)
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: DispatchJob) -> DispatchOutcome;
}

/// Run a batch of jobs on `workers` concurrent workers and collect
/// every outcome. Returns when the batch is drained; there is no
/// cancellation once a job has been picked up.
pub async fn run_batch<H: JobHandler>(
    workers: usize,
    jobs: Vec<DispatchJob>,
    handler: Arc<H>,
) -> Vec<DispatchOutcome> {
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }

    let (job_tx, job_rx) = mpsc::channel::<DispatchJob>(total);
    for job in jobs {
        // Capacity equals the batch size, so this never blocks
        let _ = job_tx.send(job).await;
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<DispatchOutcome>(total);

    let worker_count = workers.max(1).min(total);
    let mut handles = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let job_rx = job_rx.clone();
        let outcome_tx = outcome_tx.clone();
        let handler = handler.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some(job) = job else { break };

                debug!(worker_id, contact_id = %job.contact.id, channel = %job.channel, "Worker picked up job");
                let outcome = handler.handle(job).await;

                if outcome_tx.send(outcome).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(outcome_tx);

    let mut outcomes = Vec::with_capacity(total);
    while let Some(outcome) = outcome_rx.recv().await {
        outcomes.push(outcome);
    }

    for handle in handles {
        let _ = handle.await;
    }

    outcomes
}
