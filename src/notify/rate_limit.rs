use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Per-key last-sent map. A key may fire once per interval.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the slot for `key` if it is free, recording now as last-sent.
    pub async fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now()).await
    }

    pub async fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = last_sent.get(key) {
            if now.saturating_duration_since(*last) < self.interval {
                return false;
            }
        }
        last_sent.insert(key.to_string(), now);
        true
    }
}
