//! Price observations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{TradeError, TradeResult};

/// A single price for a symbol at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }

    /// Build from a raw terminal price, rejecting NaN, infinities and
    /// non-positive values.
    pub fn from_f64(
        symbol: impl Into<String>,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> TradeResult<Self> {
        let symbol = symbol.into();
        let price = decimal_price(&symbol, price)?;
        Ok(Self::new(symbol, price, timestamp))
    }
}

/// Convert a terminal `f64` price into an exact decimal.
pub fn decimal_price(symbol: &str, price: f64) -> TradeResult<Decimal> {
    if !price.is_finite() {
        return Err(TradeError::InvalidInput(format!(
            "{}: non-finite price {}",
            symbol, price
        )));
    }
    if price <= 0.0 {
        return Err(TradeError::InvalidInput(format!(
            "{}: non-positive price {}",
            symbol, price
        )));
    }
    Decimal::try_from(price)
        .map(|d| d.normalize())
        .map_err(|e| TradeError::InvalidInput(format!("{}: {}", symbol, e)))
}

/// One OHLC bar, as returned by rate history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_f64_exact() {
        let point = PricePoint::from_f64("EURUSD", 1.0983, Utc::now()).unwrap();
        assert_eq!(point.price, dec!(1.0983));
    }

    #[test]
    fn test_rejects_bad_prices() {
        for bad in [f64::NAN, f64::INFINITY, 0.0, -1.2] {
            let err = PricePoint::from_f64("EURUSD", bad, Utc::now()).unwrap_err();
            assert!(matches!(err, TradeError::InvalidInput(_)), "{} accepted", bad);
        }
    }
}
