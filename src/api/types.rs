//! Wire types for the MT5 bridge HTTP API.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradeResult;
use crate::models::{decimal_price, Bar, TradeSide};

/// Trade server return code for a completed request.
pub const TRADE_RETCODE_DONE: i64 = 10009;

/// Magic number stamped on every order this bot sends.
pub const ORDER_MAGIC: u64 = 234000;

/// Allowed slippage in points for market orders.
pub const ORDER_DEVIATION: u32 = 50;

/// Latest tick from `/symbols/{symbol}/tick`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickResponse {
    pub bid: f64,
    /// Unix seconds
    pub time: i64,
}

/// One bar from `/symbols/{symbol}/rates`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateResponse {
    /// Unix seconds of the bar open
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl RateResponse {
    /// Convert to an exact-decimal bar, rejecting invalid prices.
    pub fn into_bar(self, symbol: &str) -> TradeResult<Bar> {
        Ok(Bar {
            time: unix_to_utc(self.time),
            open: decimal_price(symbol, self.open)?,
            high: decimal_price(symbol, self.high)?,
            low: decimal_price(symbol, self.low)?,
            close: decimal_price(symbol, self.close)?,
        })
    }
}

/// Body for `POST /orders`.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    pub type_filling: String,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: TradeSide, volume: Decimal, comment: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            volume,
            deviation: ORDER_DEVIATION,
            magic: ORDER_MAGIC,
            comment: comment.to_string(),
            type_filling: "FOK".to_string(),
        }
    }
}

/// Trade server reply for orders and closes.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeReply {
    pub retcode: i64,
    #[serde(default)]
    pub order: Option<u64>,
    #[serde(default)]
    pub deal: Option<u64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub comment: String,
}

impl TradeReply {
    pub fn is_done(&self) -> bool {
        self.retcode == TRADE_RETCODE_DONE
    }
}

/// Open position from `/positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResponse {
    pub ticket: u64,
    pub symbol: String,
    pub volume: f64,
    /// 0 = buy, 1 = sell
    #[serde(rename = "type")]
    pub position_type: i32,
}

impl PositionResponse {
    pub fn side(&self) -> TradeSide {
        if self.position_type == 0 {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        }
    }
}

/// Convert bridge unix seconds, falling back to now for out-of-range values.
pub fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
