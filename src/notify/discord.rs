//! Discord webhook sink.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{TradeError, TradeResult};

use super::MessageSink;

/// Discord rejects message content longer than this.
const MAX_CONTENT_LEN: usize = 2000;

#[derive(Serialize)]
struct WebhookBody<'a> {
    content: &'a str,
}

/// Posts messages to a Discord webhook. Without a URL, messages are only logged.
pub struct DiscordWebhook {
    client: Client,
    url: Option<String>,
}

impl DiscordWebhook {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

fn truncate(text: &str) -> &str {
    if text.len() <= MAX_CONTENT_LEN {
        return text;
    }
    let mut end = MAX_CONTENT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl MessageSink for DiscordWebhook {
    async fn send_message(&self, text: &str) -> TradeResult<()> {
        let Some(url) = &self.url else {
            info!(message = %text, "Notification (no webhook configured)");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&WebhookBody {
                content: truncate(text),
            })
            .send()
            .await
            .map_err(|e| TradeError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradeError::Delivery(format!(
                "webhook returned {} - {}",
                status, body
            )));
        }

        debug!(length = text.len(), "Discord message sent");
        Ok(())
    }
}
