//! Provider interfaces for external systems.
//!
//! The engine consumes two abstract provider contracts: directory
//! search (discovery input) and per-channel message dispatch. Both are
//! treated as at-most-once; retry policy lives in the engine, never in
//! the provider.

pub mod http;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Channel;

// Re-export the HTTP implementations
pub use http::{HttpDirectoryProvider, HttpMessenger};

/// One raw business listing from a directory search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryResult {
    /// Business name as listed
    pub name: String,

    /// Phone number, if listed
    #[serde(default)]
    pub phone: Option<String>,

    /// Website URL, if listed
    #[serde(default)]
    pub website: Option<String>,

    /// Street address, if listed
    #[serde(default)]
    pub address: Option<String>,

    /// Listing rating (0.0–5.0)
    #[serde(default)]
    pub rating: Option<f64>,

    /// Number of reviews behind the rating
    #[serde(default)]
    pub review_count: Option<i64>,
}

/// One page of directory results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryPage {
    /// Listings on this page
    pub results: Vec<DirectoryResult>,

    /// Token for the next page; `None` means the query is exhausted
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// External directory search source
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Fetch one page of listings for a (category, geography) query
    async fn search(
        &self,
        niche: &str,
        geography: &str,
        page_token: Option<&str>,
    ) -> Result<DirectoryPage>;
}

/// What a communication provider reported back for one send
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// Whether the provider accepted the message
    pub accepted: bool,

    /// Provider-side reference for the accepted message
    pub provider_ref: Option<String>,

    /// Raw response payload, persisted on the Touch
    pub raw: serde_json::Value,
}

impl DispatchReceipt {
    /// An accepted receipt with a provider reference
    pub fn accepted(provider_ref: impl Into<String>) -> Self {
        let provider_ref = provider_ref.into();
        Self {
            raw: serde_json::json!({ "provider_ref": provider_ref.clone() }),
            accepted: true,
            provider_ref: Some(provider_ref),
        }
    }

    /// A rejected receipt carrying the provider's reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            provider_ref: None,
            raw: serde_json::json!({ "reason": reason.into() }),
        }
    }
}

/// Per-channel communication provider
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// The channel this provider carries
    fn channel(&self) -> Channel;

    /// Send one message to the given identifier (phone or email).
    ///
    /// At-most-once: the engine records the outcome and never retries
    /// within the same tick.
    async fn send(&self, identifier: &str, message: &str) -> Result<DispatchReceipt>;
}

/// The dispatcher's channel fan-out, injected at startup
#[derive(Clone)]
pub struct ChannelProviders {
    pub sms: Arc<dyn Messenger>,
    pub email: Arc<dyn Messenger>,
    pub voice: Arc<dyn Messenger>,
}

impl ChannelProviders {
    /// Look up the provider for a channel. The passive call-status
    /// channel has no outbound provider.
    pub fn for_channel(&self, channel: Channel) -> Option<&Arc<dyn Messenger>> {
        match channel {
            Channel::Sms => Some(&self.sms),
            Channel::Email => Some(&self.email),
            Channel::Voice => Some(&self.voice),
            Channel::CallStatus => None,
        }
    }
}
