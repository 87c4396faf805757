//! Error kinds raised at the trading boundaries.
//!
//! Broker and notification failures are converted into these variants where
//! they happen, so the polling loop can decide per symbol whether to skip a
//! tick, notify, or keep going. Startup and persistence code uses `anyhow`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    /// Bad pip size or thresholds. Fatal for the symbol at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Non-finite or non-positive price. The tick is skipped for that symbol.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Broker returned no tick or bar for the symbol.
    #[error("Price unavailable for {symbol}: {reason}")]
    PriceUnavailable { symbol: String, reason: String },

    #[error("Order rejected for {symbol} (retcode {code}): {message}")]
    OrderRejected {
        symbol: String,
        code: i64,
        message: String,
    },

    #[error("Close rejected for ticket {ticket} (retcode {code}): {message}")]
    CloseRejected {
        ticket: u64,
        code: i64,
        message: String,
    },

    /// Notification could not be delivered. Logged, never retried.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Connection or decoding failure talking to the broker bridge.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl TradeError {
    /// Whether the broker refused an action (as opposed to failing to answer).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TradeError::OrderRejected { .. } | TradeError::CloseRejected { .. }
        )
    }
}

impl From<reqwest::Error> for TradeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TradeError::Transport(format!("request timed out: {}", err))
        } else {
            TradeError::Transport(err.to_string())
        }
    }
}

pub type TradeResult<T> = std::result::Result<T, TradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_kinds() {
        let order = TradeError::OrderRejected {
            symbol: "EURUSD".to_string(),
            code: 10019,
            message: "No money".to_string(),
        };
        assert!(order.is_rejection());
        assert!(order.to_string().contains("10019"));

        let missing = TradeError::PriceUnavailable {
            symbol: "EURUSD".to_string(),
            reason: "no tick".to_string(),
        };
        assert!(!missing.is_rejection());
    }
}
