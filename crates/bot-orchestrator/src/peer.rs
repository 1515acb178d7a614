use anyhow::{Context, Result};
use async_trait::async_trait;
use robopilot_core::{Host, PeerNotifier};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct TakeoverRequest {
    from: Host,
}

/// Calls the peer's control surface to hand over trading.
#[derive(Debug, Clone)]
pub struct HttpPeerNotifier {
    client: reqwest::Client,
    peer_url: String,
}

impl HttpPeerNotifier {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(peer_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            peer_url: peer_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PeerNotifier for HttpPeerNotifier {
    async fn request_takeover(&self, from: Host) -> Result<()> {
        let url = format!("{}/api/takeover", self.peer_url);
        self.client
            .post(&url)
            .json(&TakeoverRequest { from })
            .send()
            .await
            .with_context(|| format!("Takeover request to {url} failed"))?
            .error_for_status()
            .context("Peer refused takeover")?;

        info!(peer = %self.peer_url, "Peer notified to take over");
        Ok(())
    }
}

/// Used when no peer is configured; the peer then finds the released lease
/// on its own standby poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPeerNotifier;

#[async_trait]
impl PeerNotifier for NoopPeerNotifier {
    async fn request_takeover(&self, from: Host) -> Result<()> {
        info!(from = %from, "No peer configured, lease left for standby poll");
        Ok(())
    }
}
