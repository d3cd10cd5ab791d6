//! Touch records: the append-only audit trail of dispatch attempts.
//!
//! Touches are the circuit breaker's only observability signal. Every
//! dispatch attempt produces exactly one Touch, also when the provider
//! call itself errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// An immutable record of one outbound communication attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Touch {
    /// Unique identifier for this touch
    pub id: Uuid,

    /// The contact this attempt targeted
    pub contact_id: Uuid,

    /// Which channel carried the attempt
    pub channel: Channel,

    /// Outcome as reported by the provider (or `Failed` when the call errored)
    pub outcome: TouchOutcome,

    /// Raw provider response payload
    pub provider_response: serde_json::Value,

    /// When the attempt happened
    pub created_at: DateTime<Utc>,
}

impl Touch {
    /// Create a new touch with the current timestamp
    pub fn new(contact_id: Uuid, channel: Channel, outcome: TouchOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id,
            channel,
            outcome,
            provider_response: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach the provider's response payload
    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.provider_response = response;
        self
    }
}

/// Communication channels the dispatcher can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Real-time message channel, gated on the contact's local hours
    Sms,

    /// Fallback channel with no time restriction
    Email,

    /// Secondary channel with a daily cap
    Voice,

    /// Passive call-status logging; excluded from breaker sampling
    CallStatus,
}

impl Channel {
    /// The low-signal channel the breaker ignores
    pub fn is_passive(&self) -> bool {
        matches!(self, Self::CallStatus)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Email => write!(f, "email"),
            Self::Voice => write!(f, "voice"),
            Self::CallStatus => write!(f, "call_status"),
        }
    }
}

/// Error parsing a channel string from the store
#[derive(Debug, Clone, Error)]
#[error("Unknown channel: {0}")]
pub struct ParseChannelError(pub String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "voice" => Ok(Self::Voice),
            "call_status" => Ok(Self::CallStatus),
            other => Err(ParseChannelError(other.to_string())),
        }
    }
}

/// Outcome of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchOutcome {
    /// Provider accepted the message
    Sent,

    /// Provider rejected the attempt or the call errored
    Failed,

    /// Call placed, final status arrives via callback
    Initiated,

    /// Handed off, acceptance not yet known
    Pending,
}

impl TouchOutcome {
    /// Failure-class outcomes count toward the breaker threshold
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TouchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Initiated => write!(f, "initiated"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Error parsing an outcome string from the store
#[derive(Debug, Clone, Error)]
#[error("Unknown touch outcome: {0}")]
pub struct ParseOutcomeError(pub String);

impl FromStr for TouchOutcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "initiated" => Ok(Self::Initiated),
            "pending" => Ok(Self::Pending),
            other => Err(ParseOutcomeError(other.to_string())),
        }
    }
}
