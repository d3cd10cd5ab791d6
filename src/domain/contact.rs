//! Contact entity and its funnel state machine.
//!
//! A Contact moves one direction through the funnel
//! (Discovery → Research → Dispatch → Nurture → Terminal); the only
//! backward edge is the self-healing requeue, which is a dedicated
//! store operation rather than a graph transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A prospective customer tracked through the outreach funnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Unique identifier
    pub id: Uuid,

    /// Business name as reported by the directory source
    pub business_name: String,

    /// Lowercased, whitespace-collapsed name used for dedup
    pub normalized_name: String,

    /// Phone number (required for the SMS and voice channels)
    pub phone: Option<String>,

    /// Email address (fallback channel, no time restriction)
    pub email: Option<String>,

    /// Website, used for enrichment and strategy generation
    pub website: Option<String>,

    /// Discovery provenance: which source produced this contact
    pub source: String,

    /// Niche/category the contact was discovered under
    pub niche: String,

    /// Geography the contact was discovered under
    pub geography: String,

    /// Current funnel state
    pub status: ContactStatus,

    /// Lead-quality score computed at discovery
    pub engagement_score: i64,

    /// Cached output of the external content-generation provider.
    /// Consumed, never produced, by this engine.
    pub strategy_hint: Option<String>,

    /// Consecutive unresponsive cycles (bounds requeue retries)
    pub ghost_count: i64,

    /// Consent marker recorded at discovery
    pub consent_logged: bool,

    /// Earliest time the requeue edge allows re-dispatch
    pub next_touch_at: Option<DateTime<Utc>>,

    /// When the last outbound attempt happened
    pub last_contacted_at: Option<DateTime<Utc>>,

    /// When the contact entered the store
    pub created_at: DateTime<Utc>,

    /// Optimistic-concurrency token; bumped on every status update
    pub version: i64,
}

impl Contact {
    /// A contact is dispatch-eligible only when at least one channel
    /// identifier is present.
    pub fn has_contact_path(&self) -> bool {
        self.phone.is_some() || self.email.is_some()
    }

    /// Check whether the requeue retry delay has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_touch_at.map(|t| t <= now).unwrap_or(true)
    }
}

/// Funnel state of a contact.
///
/// `NurtureDay(k)` is the k-th stage of the drip sequence; stages only
/// move forward, at tick granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ContactStatus {
    /// Freshly discovered, not yet validated
    New,

    /// Waiting for the external strategy hint
    Researching,

    /// Strategy attached, ready for dispatch
    ResearchDone,

    /// Attempt handed to a provider, acceptance still pending
    OutreachDispatched,

    /// Provider accepted the message
    OutreachSent,

    /// Voice call placed, awaiting status callback
    CallingInitiated,

    /// Drip sequence stage k (1-based)
    NurtureDay(u32),

    /// Converted (terminal)
    Customer,

    /// Exhausted requeue attempts (terminal)
    Trashed,

    /// Identifiers turned out invalid (terminal)
    BadData,

    /// No phone and no email (terminal; must never leave)
    NoContactInfo,

    /// No website to research against (terminal)
    SkippedNoUrl,
}

impl ContactStatus {
    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Customer | Self::Trashed | Self::BadData | Self::NoContactInfo | Self::SkippedNoUrl
        )
    }

    /// States where an attempt went out and a reply may still arrive.
    /// Only these are eligible for the requeue backward edge.
    pub fn is_awaiting_reply(&self) -> bool {
        matches!(
            self,
            Self::OutreachDispatched
                | Self::OutreachSent
                | Self::CallingInitiated
                | Self::NurtureDay(_)
        )
    }

    /// Nurture stage number, if this is a nurture state
    pub fn nurture_stage(&self) -> Option<u32> {
        match self {
            Self::NurtureDay(k) => Some(*k),
            _ => None,
        }
    }

    /// Whether `next` is a legal forward edge from this state.
    ///
    /// The requeue backward edge (awaiting-reply → ResearchDone/Trashed)
    /// is intentionally NOT part of this graph; it goes through its own
    /// store operation with its own guards.
    pub fn can_transition_to(&self, next: ContactStatus) -> bool {
        use ContactStatus::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (New, Researching) => true,
            (New, SkippedNoUrl) | (New, NoContactInfo) | (New, BadData) => true,

            (Researching, ResearchDone) => true,
            (Researching, NoContactInfo) | (Researching, BadData) => true,

            (ResearchDone, OutreachDispatched)
            | (ResearchDone, OutreachSent)
            | (ResearchDone, CallingInitiated) => true,
            (ResearchDone, NoContactInfo) | (ResearchDone, BadData) => true,

            (OutreachDispatched, OutreachSent) => true,
            (OutreachDispatched, Customer) | (OutreachDispatched, BadData) => true,
            (OutreachDispatched, NurtureDay(_)) => true,

            (OutreachSent, CallingInitiated) => true,
            (OutreachSent, Customer) | (OutreachSent, BadData) => true,
            (OutreachSent, NurtureDay(_)) => true,

            (CallingInitiated, OutreachSent) => true,
            (CallingInitiated, Customer) | (CallingInitiated, BadData) => true,
            (CallingInitiated, NurtureDay(_)) => true,

            // Drip stages only move forward
            (NurtureDay(k), NurtureDay(j)) => j > *k,
            (NurtureDay(_), CallingInitiated) => true,
            (NurtureDay(_), Customer) | (NurtureDay(_), BadData) => true,

            _ => false,
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Researching => write!(f, "researching"),
            Self::ResearchDone => write!(f, "research_done"),
            Self::OutreachDispatched => write!(f, "outreach_dispatched"),
            Self::OutreachSent => write!(f, "outreach_sent"),
            Self::CallingInitiated => write!(f, "calling_initiated"),
            Self::NurtureDay(k) => write!(f, "nurture_day_{}", k),
            Self::Customer => write!(f, "customer"),
            Self::Trashed => write!(f, "trashed"),
            Self::BadData => write!(f, "bad_data"),
            Self::NoContactInfo => write!(f, "no_contact_info"),
            Self::SkippedNoUrl => write!(f, "skipped_no_url"),
        }
    }
}

/// Error parsing a status string from the store
#[derive(Debug, Clone, Error)]
#[error("Unknown contact status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for ContactStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "researching" => Ok(Self::Researching),
            "research_done" => Ok(Self::ResearchDone),
            "outreach_dispatched" => Ok(Self::OutreachDispatched),
            "outreach_sent" => Ok(Self::OutreachSent),
            "calling_initiated" => Ok(Self::CallingInitiated),
            "customer" => Ok(Self::Customer),
            "trashed" => Ok(Self::Trashed),
            "bad_data" => Ok(Self::BadData),
            "no_contact_info" => Ok(Self::NoContactInfo),
            "skipped_no_url" => Ok(Self::SkippedNoUrl),
            other => {
                if let Some(stage) = other.strip_prefix("nurture_day_") {
                    let k: u32 = stage
                        .parse()
                        .map_err(|_| ParseStatusError(other.to_string()))?;
                    return Ok(Self::NurtureDay(k));
                }
                Err(ParseStatusError(other.to_string()))
            }
        }
    }
}

impl From<ContactStatus> for String {
    fn from(s: ContactStatus) -> Self {
        s.to_string()
    }
}

impl TryFrom<String> for ContactStatus {
    type Error = ParseStatusError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Deterministic experiment bucket for a contact.
///
/// Stable SHA-256 of the contact id modulo `denominator`, so bucket
/// assignment is reproducible across invocations and testable.
pub fn bucket_for(contact_id: Uuid, denominator: u32) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(contact_id.as_bytes());
    let digest = hasher.finalize();

    let mut word = [0u8; 4];
    word.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(word) % denominator.max(1)
}

/// Normalize a business name for dedup matching: lowercase, drop
/// punctuation, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_space = true;

    for c in lowered.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        let all = [
            ContactStatus::New,
            ContactStatus::Researching,
            ContactStatus::ResearchDone,
            ContactStatus::OutreachDispatched,
            ContactStatus::OutreachSent,
            ContactStatus::CallingInitiated,
            ContactStatus::NurtureDay(3),
            ContactStatus::Customer,
            ContactStatus::Trashed,
            ContactStatus::BadData,
            ContactStatus::NoContactInfo,
            ContactStatus::SkippedNoUrl,
        ];

        for status in all {
            let parsed: ContactStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_nurture_day_parsing() {
        let status: ContactStatus = "nurture_day_7".parse().unwrap();
        assert_eq!(status, ContactStatus::NurtureDay(7));

        assert!("nurture_day_".parse::<ContactStatus>().is_err());
        assert!("nurture_day_x".parse::<ContactStatus>().is_err());
        assert!("bogus".parse::<ContactStatus>().is_err());
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        let terminals = [
            ContactStatus::Customer,
            ContactStatus::Trashed,
            ContactStatus::BadData,
            ContactStatus::NoContactInfo,
            ContactStatus::SkippedNoUrl,
        ];

        for t in terminals {
            assert!(t.is_terminal());
            assert!(!t.can_transition_to(ContactStatus::New));
            assert!(!t.can_transition_to(ContactStatus::ResearchDone));
            assert!(!t.can_transition_to(ContactStatus::OutreachSent));
        }
    }

    #[test]
    fn test_forward_edges() {
        use ContactStatus::*;

        assert!(New.can_transition_to(Researching));
        assert!(Researching.can_transition_to(ResearchDone));
        assert!(ResearchDone.can_transition_to(OutreachSent));
        assert!(ResearchDone.can_transition_to(CallingInitiated));
        assert!(OutreachSent.can_transition_to(NurtureDay(1)));
        assert!(NurtureDay(1).can_transition_to(NurtureDay(2)));
        assert!(NurtureDay(2).can_transition_to(Customer));
    }

    #[test]
    fn test_no_backward_edges_in_graph() {
        use ContactStatus::*;

        // The requeue edge is not part of the forward graph
        assert!(!OutreachSent.can_transition_to(ResearchDone));
        assert!(!NurtureDay(2).can_transition_to(ResearchDone));
        assert!(!NurtureDay(3).can_transition_to(NurtureDay(2)));
        assert!(!NurtureDay(3).can_transition_to(NurtureDay(3)));
        assert!(!ResearchDone.can_transition_to(New));
    }

    #[test]
    fn test_bucket_is_stable() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

        let a = bucket_for(id, 10);
        let b = bucket_for(id, 10);
        assert_eq!(a, b);
        assert!(a < 10);

        // Denominator of zero must not panic
        assert_eq!(bucket_for(id, 0), bucket_for(id, 1));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Joe's Plumbing, LLC"), "joe s plumbing llc");
        assert_eq!(normalize_name("  ACME   Corp  "), "acme corp");
        assert_eq!(normalize_name("Café-Bar 42"), "café bar 42");
    }
}
