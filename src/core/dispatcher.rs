//! Channel dispatcher: routes each dispatch-eligible contact to exactly
//! one channel and executes the attempt.
//!
//! Selection order: the real-time SMS channel when the contact's local
//! time is inside the allowed window on a business day and a phone is
//! on file; otherwise email if present; otherwise the contact is
//! unreachable and parked terminally. Voice is a secondary channel on
//! its own cadence with a daily cap.
//!
//! Every attempt appends exactly one Touch, also when the provider call
//! itself errors; losing the record would blind the circuit breaker.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, Timelike, Utc, Weekday};
use tracing::{info, instrument, warn};

use crate::config::DispatchConfig;
use crate::domain::{bucket_for, Channel, Contact, ContactStatus, Touch, TouchOutcome};
use crate::providers::ChannelProviders;
use crate::store::{ContactStore, StoreError};

use super::pool::{self, DispatchJob, DispatchOutcome, DispatchPurpose, JobHandler};

/// Outcome counts for one dispatch pass
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    /// Jobs handed to the worker pool
    pub attempted: usize,
    /// Attempts the provider accepted (sent, pending, or initiated)
    pub accepted: usize,
    /// Attempts that failed (provider rejection or call error)
    pub failed: usize,
    /// Contacts skipped this pass (window closed, caps, races)
    pub skipped: usize,
}

impl PassSummary {
    fn absorb(&mut self, outcomes: &[DispatchOutcome]) {
        self.attempted += outcomes.len();
        for outcome in outcomes {
            if outcome.outcome.is_failure() {
                self.failed += 1;
            } else {
                self.accepted += 1;
            }
        }
    }
}

/// Routes contacts to channels and records every outcome
pub struct ChannelDispatcher {
    store: Arc<ContactStore>,
    providers: ChannelProviders,
    cfg: DispatchConfig,
}

impl ChannelDispatcher {
    pub fn new(store: Arc<ContactStore>, providers: ChannelProviders, cfg: DispatchConfig) -> Self {
        Self {
            store,
            providers,
            cfg,
        }
    }

    /// Message-channel pass: fresh outreach for the dispatchable batch
    /// plus due nurture drips.
    #[instrument(skip(self), fields(pass = "message"))]
    pub async fn run_message_pass(self: &Arc<Self>, now: DateTime<Utc>) -> Result<PassSummary> {
        let local = local_time(now, &self.cfg);
        let mut summary = PassSummary::default();
        let mut jobs = Vec::new();

        let fresh = self
            .store
            .dispatchable_batch(self.cfg.message_batch_cap, now)?;

        for contact in fresh {
            match select_channel(&contact, local, &self.cfg) {
                Some(channel) => {
                    let message = self.outreach_message(&contact);
                    jobs.push(DispatchJob {
                        channel,
                        message,
                        purpose: DispatchPurpose::Outreach,
                        contact,
                    });
                }
                None if !contact.has_contact_path() => {
                    // Unreachable: park terminally instead of burning ticks
                    if let Err(e) = self
                        .store
                        .update_status(&contact, ContactStatus::NoContactInfo)
                    {
                        warn!(contact_id = %contact.id, error = %e, "Failed to park unreachable contact");
                    }
                    summary.skipped += 1;
                }
                None => {
                    // Phone-only contact outside the window; next tick
                    summary.skipped += 1;
                }
            }
        }

        jobs.extend(self.nurture_jobs(now, local)?);

        let outcomes = pool::run_batch(self.cfg.pool_workers, jobs, self.clone()).await;
        summary.absorb(&outcomes);

        info!(
            attempted = summary.attempted,
            accepted = summary.accepted,
            failed = summary.failed,
            skipped = summary.skipped,
            "Message pass complete"
        );
        Ok(summary)
    }

    /// Voice-channel pass: follow-up calls for accepted outreach, under
    /// the daily cap.
    #[instrument(skip(self), fields(pass = "voice"))]
    pub async fn run_voice_pass(self: &Arc<Self>, now: DateTime<Utc>) -> Result<PassSummary> {
        let mut summary = PassSummary::default();

        let used_today = self.store.voice_touches_on(now.date_naive())?;
        let remaining = (self.cfg.voice_daily_cap - used_today).max(0) as usize;
        if remaining == 0 {
            info!(cap = self.cfg.voice_daily_cap, "Voice daily cap reached; pass skipped");
            return Ok(summary);
        }

        let cutoff = now - Duration::days(self.cfg.voice_followup_min_days);
        let batch = self
            .store
            .voice_candidates(self.cfg.voice_batch_cap.min(remaining), cutoff)?;

        let jobs: Vec<DispatchJob> = batch
            .into_iter()
            .map(|contact| DispatchJob {
                channel: Channel::Voice,
                message: self.voice_script(&contact),
                purpose: DispatchPurpose::Voice,
                contact,
            })
            .collect();

        let outcomes = pool::run_batch(self.cfg.pool_workers, jobs, self.clone()).await;
        summary.absorb(&outcomes);

        info!(
            attempted = summary.attempted,
            accepted = summary.accepted,
            failed = summary.failed,
            "Voice pass complete"
        );
        Ok(summary)
    }

    /// Contacts in the drip sequence whose next stage threshold has
    /// been crossed. Timing is anchored on the first dispatch attempt
    /// and checked at tick granularity.
    fn nurture_jobs(
        &self,
        now: DateTime<Utc>,
        local: DateTime<FixedOffset>,
    ) -> Result<Vec<DispatchJob>, StoreError> {
        let offsets = &self.cfg.nurture_day_offsets;
        let mut jobs = Vec::new();

        for contact in self.store.nurture_candidates(self.cfg.message_batch_cap)? {
            let next_stage = contact.status.nurture_stage().unwrap_or(0) + 1;

            let Some(required_days) = offsets.get((next_stage - 1) as usize) else {
                // Drip sequence exhausted; requeue decides what happens next
                continue;
            };

            let anchor = match self.store.first_touch_at(contact.id)? {
                Some(first) => first,
                None => match contact.last_contacted_at {
                    Some(last) => last,
                    None => continue,
                },
            };

            if (now - anchor).num_days() < *required_days {
                continue;
            }

            let Some(channel) = select_channel(&contact, local, &self.cfg) else {
                continue;
            };

            jobs.push(DispatchJob {
                channel,
                message: self.nurture_message(&contact, next_stage),
                purpose: DispatchPurpose::Nurture { stage: next_stage },
                contact,
            });
        }

        Ok(jobs)
    }

    /// First-touch message. The variant is chosen by a stable hash of
    /// the contact id, so bucket assignment is reproducible.
    fn outreach_message(&self, contact: &Contact) -> String {
        let hook = contact
            .strategy_hint
            .as_deref()
            .unwrap_or("I had an idea for bringing a few more customers through your door");

        match bucket_for(contact.id, self.cfg.variant_buckets) {
            0 => format!(
                "Hi {}, {}. Worth a quick chat?",
                contact.business_name, hook
            ),
            _ => format!(
                "Hello {}, {}. Open to a short call this week?",
                contact.business_name, hook
            ),
        }
    }

    fn nurture_message(&self, contact: &Contact, stage: u32) -> String {
        match stage {
            1 => format!(
                "Hi {}, circling back on my note from the other day. Still happy to walk you through it.",
                contact.business_name
            ),
            2 => format!(
                "Hi {}, one more nudge in case this got buried. Five minutes is all I need.",
                contact.business_name
            ),
            _ => format!(
                "Hi {}, last note from me. If the timing is wrong, no worries at all.",
                contact.business_name
            ),
        }
    }

    fn voice_script(&self, contact: &Contact) -> String {
        let hook = contact
            .strategy_hint
            .as_deref()
            .unwrap_or("following up on the message we sent");

        format!(
            "Follow-up call for {}: {}.",
            contact.business_name, hook
        )
    }
}

#[async_trait]
impl JobHandler for ChannelDispatcher {
    /// Execute one attempt: provider call, then the Touch, then the
    /// status update. The Touch is written regardless of how the
    /// provider call went.
    async fn handle(&self, job: DispatchJob) -> DispatchOutcome {
        let contact = &job.contact;

        let identifier = match job.channel {
            Channel::Sms | Channel::Voice => contact.phone.clone(),
            Channel::Email => contact.email.clone(),
            Channel::CallStatus => None,
        };

        let (outcome, response, error) = match (identifier, self.providers.for_channel(job.channel)) {
            (Some(identifier), Some(provider)) => {
                match provider.send(&identifier, &job.message).await {
                    Ok(receipt) if receipt.accepted => {
                        let outcome = match job.purpose {
                            DispatchPurpose::Voice => TouchOutcome::Initiated,
                            _ => {
                                let has_ref = receipt
                                    .provider_ref
                                    .as_deref()
                                    .map(|r| !r.is_empty())
                                    .unwrap_or(false);
                                if has_ref {
                                    TouchOutcome::Sent
                                } else {
                                    TouchOutcome::Pending
                                }
                            }
                        };
                        (outcome, receipt.raw, None)
                    }
                    Ok(receipt) => (TouchOutcome::Failed, receipt.raw, None),
                    Err(e) => {
                        let msg = e.to_string();
                        (
                            TouchOutcome::Failed,
                            serde_json::json!({ "error": msg }),
                            Some(msg),
                        )
                    }
                }
            }
            _ => {
                // Job built against a channel the contact cannot take;
                // record the defect rather than dropping it silently.
                let msg = format!("no identifier for channel {}", job.channel);
                (
                    TouchOutcome::Failed,
                    serde_json::json!({ "error": msg }),
                    Some(msg),
                )
            }
        };

        // The audit record comes first; a lost Touch would blind the breaker.
        let touch = Touch::new(contact.id, job.channel, outcome).with_response(response);
        if let Err(e) = self.store.append_touch(&touch) {
            warn!(contact_id = %contact.id, error = %e, "Failed to append touch");
        }

        if !outcome.is_failure() {
            let next_status = match job.purpose {
                DispatchPurpose::Outreach => match outcome {
                    TouchOutcome::Sent => ContactStatus::OutreachSent,
                    _ => ContactStatus::OutreachDispatched,
                },
                DispatchPurpose::Nurture { stage } => ContactStatus::NurtureDay(stage),
                DispatchPurpose::Voice => ContactStatus::CallingInitiated,
            };

            match self.store.mark_contacted(contact, next_status, Utc::now()) {
                Ok(()) => {}
                Err(StoreError::VersionConflict { id }) => {
                    // A concurrent tick advanced this contact first
                    warn!(contact_id = %id, "Skipping status update after lost race");
                }
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Failed to update status after dispatch");
                }
            }
        }

        DispatchOutcome {
            contact_id: contact.id,
            channel: job.channel,
            outcome,
            error,
        }
    }
}

/// Shift the engine clock into the contacts' local time.
fn local_time(now: DateTime<Utc>, cfg: &DispatchConfig) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(cfg.local_utc_offset_hours.clamp(-23, 23) * 3600)
        .unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
}

/// Pick exactly one channel for a contact, or none.
///
/// SMS requires a phone, a business day, and a local hour inside the
/// window; email only requires an address. A `None` for a contact with
/// no contact path at all means the contact is unreachable.
pub fn select_channel(
    contact: &Contact,
    local: DateTime<FixedOffset>,
    cfg: &DispatchConfig,
) -> Option<Channel> {
    let business_day = !matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
    let hour = local.hour();
    let in_window = hour >= cfg.sms_window_start_hour && hour < cfg.sms_window_end_hour;

    if contact.phone.is_some() && business_day && in_window {
        Some(Channel::Sms)
    } else if contact.email.is_some() {
        Some(Channel::Email)
    } else {
        None
    }
}
