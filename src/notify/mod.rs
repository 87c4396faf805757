//! Outbound notifications.
//!
//! A [`Notifier`] wraps a [`MessageSink`] with per-key burst suppression.
//! Delivery failures are logged and swallowed; they never reach the trading
//! loop.

mod discord;
pub mod format;
mod rate_limit;

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TradeResult;

pub use discord::DiscordWebhook;
pub use rate_limit::RateLimiter;

/// Default minimum gap between rate-limited messages for one key.
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_secs(60);

/// Something that can deliver a text message.
#[allow(async_fn_in_trait)]
pub trait MessageSink {
    async fn send_message(&self, text: &str) -> TradeResult<()>;
}

/// Sink that keeps messages in memory (replays and tests).
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: StdMutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|mut m| std::mem::take(&mut *m))
            .unwrap_or_default()
    }
}

impl MessageSink for MemorySink {
    async fn send_message(&self, text: &str) -> TradeResult<()> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(text.to_string());
        }
        Ok(())
    }
}

/// Sink plus rate limiter.
pub struct Notifier<S> {
    sink: S,
    limiter: RateLimiter,
}

impl<S: MessageSink> Notifier<S> {
    pub fn new(sink: S, interval: Duration) -> Self {
        Self {
            sink,
            limiter: RateLimiter::new(interval),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Send unconditionally. Returns whether delivery succeeded.
    pub async fn send(&self, text: &str) -> bool {
        match self.sink.send_message(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Notification not delivered");
                false
            }
        }
    }

    /// Send unless a message for `key` went out within the interval.
    ///
    /// Suppressed messages are dropped, not queued.
    pub async fn send_limited(&self, key: &str, text: &str) -> bool {
        if !self.limiter.try_acquire(key).await {
            debug!(key = %key, "Notification suppressed by rate limit");
            return false;
        }
        self.send(text).await
    }
}
