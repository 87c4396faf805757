//! Trading configuration shared by all symbols.

use serde::{Deserialize, Serialize};

use super::calendar::DEFAULT_OFFSET_MINUTES;
use super::controller::DEFAULT_COOLDOWN_SECS;

/// Settings that apply across symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Pause on new opens after a stop-loss (seconds)
    pub cooldown_secs: i64,

    /// Minimum gap between rate-limited notifications per key (seconds)
    pub notify_interval_secs: u64,

    /// UTC offset of the trading day, in minutes
    pub utc_offset_minutes: i32,

    /// Attempts when fetching a reference price
    pub reference_retries: u32,

    /// First retry delay for reference prices (seconds), doubled per attempt
    pub reference_retry_delay_secs: u64,

    /// Send an alert when a symbol enters its threshold band
    pub direction_alerts: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            notify_interval_secs: 60,
            utc_offset_minutes: DEFAULT_OFFSET_MINUTES,
            reference_retries: 3,
            reference_retry_delay_secs: 2,
            direction_alerts: true,
        }
    }
}
