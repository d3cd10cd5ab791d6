//! HTTP JSON implementations of the provider contracts.
//!
//! Both providers speak a small JSON-over-HTTP shape with an API key
//! header; base URLs and keys come from the resolved configuration.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::Channel;

use super::{DirectoryPage, DirectoryProvider, DispatchReceipt, Messenger};

const API_KEY_HEADER: &str = "x-api-key";

/// Directory search over HTTP
pub struct HttpDirectoryProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpDirectoryProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DirectoryProvider for HttpDirectoryProvider {
    fn name(&self) -> &str {
        "http-directory"
    }

    async fn search(
        &self,
        niche: &str,
        geography: &str,
        page_token: Option<&str>,
    ) -> Result<DirectoryPage> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));

        let mut query = vec![("category", niche), ("geography", geography)];
        if let Some(token) = page_token {
            query.push(("page_token", token));
        }

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Directory search failed for '{} {}'", niche, geography))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Directory search for '{} {}' returned HTTP {}",
                niche,
                geography,
                response.status()
            );
        }

        response
            .json::<DirectoryPage>()
            .await
            .context("Failed to parse directory search response")
    }
}

/// Response shape of the communication provider's send endpoint
#[derive(Debug, Deserialize)]
struct SendResponse {
    /// "accepted" or "rejected"
    status: String,

    #[serde(default)]
    provider_ref: Option<String>,

    #[serde(default)]
    reason: Option<String>,
}

/// Per-channel message dispatch over HTTP
pub struct HttpMessenger {
    channel: Channel,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpMessenger {
    pub fn new(channel: Channel, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            channel,
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/send", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    fn name(&self) -> &str {
        "http-messenger"
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, identifier: &str, message: &str) -> Result<DispatchReceipt> {
        let response = self
            .client
            .post(self.send_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({
                "channel": self.channel.to_string(),
                "to": identifier,
                "body": message,
            }))
            .send()
            .await
            .with_context(|| format!("{} send failed", self.channel))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "{} provider returned HTTP {}",
                self.channel,
                response.status()
            );
        }

        let parsed: SendResponse = response
            .json()
            .await
            .context("Failed to parse send response")?;

        if parsed.status == "accepted" {
            Ok(DispatchReceipt::accepted(
                parsed.provider_ref.unwrap_or_default(),
            ))
        } else {
            Ok(DispatchReceipt::rejected(
                parsed.reason.unwrap_or_else(|| parsed.status.clone()),
            ))
        }
    }
}
