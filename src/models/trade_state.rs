//! Per-symbol trading state owned by the controller.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;
use crate::trading::{CloseReason, Direction};

/// Where the symbol's position stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PositionState {
    /// No position.
    Flat,
    /// Position held, entry recorded.
    Open {
        direction: TradeSide,
        entry_pip_difference: Decimal,
        /// Highest threshold count reached in the position's direction
        peak_thresholds: u32,
    },
    /// Original position plus opposite hedge orders.
    Hedged {
        direction: TradeSide,
        entry_pip_difference: Decimal,
        hedge_entry_price: Decimal,
        hedges: u32,
    },
    /// A close went through for some tickets but not all. Retried every tick
    /// until the broker has nothing left open.
    Closing {
        direction: TradeSide,
        entry_pip_difference: Decimal,
        reason: CloseReason,
    },
}

impl PositionState {
    pub fn name(&self) -> &'static str {
        match self {
            PositionState::Flat => "flat",
            PositionState::Open { .. } => "open",
            PositionState::Hedged { .. } => "hedged",
            PositionState::Closing { .. } => "closing",
        }
    }
}

/// Mutable state for one symbol during one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeState {
    pub symbol: String,
    pub position: PositionState,
    pub trades_today: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub trading_day: NaiveDate,

    /// Last non-neutral alert direction, to only alert on changes
    #[serde(default)]
    pub last_alert_direction: Option<Direction>,

    /// Most recent polled price, read by the summary timer
    #[serde(default)]
    pub last_price: Option<Decimal>,
}

impl TradeState {
    pub fn new(symbol: impl Into<String>, trading_day: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            position: PositionState::Flat,
            trades_today: 0,
            cooldown_until: None,
            trading_day,
            last_alert_direction: None,
            last_price: None,
        }
    }

    pub fn trade_placed(&self) -> bool {
        !matches!(self.position, PositionState::Flat)
    }

    pub fn direction(&self) -> Option<TradeSide> {
        match &self.position {
            PositionState::Flat => None,
            PositionState::Open { direction, .. }
            | PositionState::Hedged { direction, .. }
            | PositionState::Closing { direction, .. } => Some(*direction),
        }
    }

    pub fn entry_pip_difference(&self) -> Option<Decimal> {
        match &self.position {
            PositionState::Flat => None,
            PositionState::Open {
                entry_pip_difference,
                ..
            }
            | PositionState::Hedged {
                entry_pip_difference,
                ..
            }
            | PositionState::Closing {
                entry_pip_difference,
                ..
            } => Some(*entry_pip_difference),
        }
    }

    pub fn hedge_entry_price(&self) -> Option<Decimal> {
        match &self.position {
            PositionState::Hedged {
                hedge_entry_price, ..
            } => Some(*hedge_entry_price),
            _ => None,
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }

    /// Start a new trading day: flat, no trades, no cooldown.
    pub fn reset_for_day(&mut self, trading_day: NaiveDate) {
        self.position = PositionState::Flat;
        self.trades_today = 0;
        self.cooldown_until = None;
        self.trading_day = trading_day;
        self.last_alert_direction = None;
    }
}
