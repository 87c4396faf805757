//! Per-symbol threshold configuration.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{TradeError, TradeResult};

/// Static configuration for one traded symbol.
///
/// Pip quantities (thresholds, ranges, targets) are expressed in pips, prices
/// in quote currency. The JSON loader also accepts the older
/// `positive_pip_difference` / `negative_pip_difference` key names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Broker symbol, e.g. "EURUSD"
    pub symbol: String,

    /// Price units per pip (0.0001 for most FX pairs, 0.01 for JPY pairs)
    pub pip_size: Decimal,

    /// Pips above the reference price that make one threshold unit
    #[serde(alias = "positive_pip_difference")]
    pub positive_pip_threshold: Decimal,

    /// Pips below the reference price that make one threshold unit (negative)
    #[serde(alias = "negative_pip_difference")]
    pub negative_pip_threshold: Decimal,

    /// Upper edge of the positive alert band
    #[serde(default)]
    pub positive_pip_range: Option<Decimal>,

    /// Lower edge of the negative alert band
    #[serde(default)]
    pub negative_pip_range: Option<Decimal>,

    /// Profit target in pips from the entry pip difference
    pub close_trade_at: Decimal,

    /// Stop-loss in pips against the entry pip difference
    pub close_trade_at_opposite_direction: Decimal,

    /// Volume for opening trades
    pub lot_size: Decimal,

    /// Opens allowed per trading day
    #[serde(default = "default_max_trades")]
    pub max_trades_per_day: u32,

    /// Number of opposite orders placed when hedging (2 or 3)
    #[serde(default = "default_hedge_trades")]
    pub hedge_trades: u32,

    /// Volume of each hedge order
    #[serde(default = "default_hedge_lot_size")]
    pub hedge_lot_size: Decimal,

    /// Threshold units the position must have reached before a reversal hedges it
    #[serde(default = "default_hedge_min_peak")]
    pub hedge_min_peak_thresholds: u32,
}

fn default_max_trades() -> u32 {
    2
}

fn default_hedge_trades() -> u32 {
    3
}

fn default_hedge_lot_size() -> Decimal {
    dec!(1.0)
}

fn default_hedge_min_peak() -> u32 {
    2
}

impl SymbolConfig {
    /// Build a config with the usual defaults for everything but the core values.
    pub fn new(
        symbol: impl Into<String>,
        pip_size: Decimal,
        threshold: Decimal,
        close_trade_at: Decimal,
        close_trade_at_opposite_direction: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            pip_size,
            positive_pip_threshold: threshold,
            negative_pip_threshold: -threshold,
            positive_pip_range: None,
            negative_pip_range: None,
            close_trade_at,
            close_trade_at_opposite_direction,
            lot_size: dec!(1.0),
            max_trades_per_day: default_max_trades(),
            hedge_trades: default_hedge_trades(),
            hedge_lot_size: default_hedge_lot_size(),
            hedge_min_peak_thresholds: default_hedge_min_peak(),
        }
    }

    /// Set the alert band edges.
    pub fn with_range(mut self, positive: Decimal, negative: Decimal) -> Self {
        self.positive_pip_range = Some(positive);
        self.negative_pip_range = Some(negative);
        self
    }

    /// Check pip size and threshold signs. Used by the engine on every call.
    pub fn validate_thresholds(&self) -> TradeResult<()> {
        if self.pip_size <= Decimal::ZERO {
            return Err(TradeError::InvalidConfiguration(format!(
                "{}: pip_size must be positive, got {}",
                self.symbol, self.pip_size
            )));
        }
        if self.positive_pip_threshold <= Decimal::ZERO
            || self.negative_pip_threshold >= Decimal::ZERO
        {
            return Err(TradeError::InvalidConfiguration(format!(
                "{}: thresholds must be opposite-signed (positive {}, negative {})",
                self.symbol, self.positive_pip_threshold, self.negative_pip_threshold
            )));
        }
        Ok(())
    }

    /// Full startup validation.
    pub fn validate(&self) -> TradeResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(TradeError::InvalidConfiguration(
                "symbol name is empty".to_string(),
            ));
        }
        self.validate_thresholds()?;

        if let Some(range) = self.positive_pip_range {
            if range < self.positive_pip_threshold {
                return Err(self.invalid(format!(
                    "positive_pip_range {} is inside the threshold {}",
                    range, self.positive_pip_threshold
                )));
            }
        }
        if let Some(range) = self.negative_pip_range {
            if range > self.negative_pip_threshold {
                return Err(self.invalid(format!(
                    "negative_pip_range {} is inside the threshold {}",
                    range, self.negative_pip_threshold
                )));
            }
        }
        if self.close_trade_at <= Decimal::ZERO {
            return Err(self.invalid("close_trade_at must be positive".to_string()));
        }
        if self.close_trade_at_opposite_direction <= Decimal::ZERO {
            return Err(self.invalid(
                "close_trade_at_opposite_direction must be positive".to_string(),
            ));
        }
        if self.lot_size <= Decimal::ZERO || self.hedge_lot_size <= Decimal::ZERO {
            return Err(self.invalid("lot sizes must be positive".to_string()));
        }
        if !(2..=3).contains(&self.hedge_trades) {
            return Err(self.invalid(format!(
                "hedge_trades must be 2 or 3, got {}",
                self.hedge_trades
            )));
        }
        Ok(())
    }

    fn invalid(&self, msg: String) -> TradeError {
        TradeError::InvalidConfiguration(format!("{}: {}", self.symbol, msg))
    }

    /// Magnitude of one threshold unit on the given side, in pips.
    pub fn threshold_for(&self, upward: bool) -> Decimal {
        if upward {
            self.positive_pip_threshold
        } else {
            self.negative_pip_threshold.abs()
        }
    }
}

/// Built-in symbol list used when no file is given.
pub fn default_symbols() -> Vec<SymbolConfig> {
    vec![
        SymbolConfig::new("EURUSD", dec!(0.0001), dec!(15), dec!(10), dec!(8))
            .with_range(dec!(17), dec!(-17)),
        SymbolConfig::new("GBPUSD", dec!(0.0001), dec!(15), dec!(10), dec!(8))
            .with_range(dec!(17), dec!(-17)),
        SymbolConfig::new("USDJPY", dec!(0.01), dec!(10), dec!(10), dec!(7)),
        SymbolConfig::new("XAUUSD", dec!(0.01), dec!(15), dec!(10), dec!(7)),
    ]
}

/// Load symbol configs from a JSON array file.
pub fn load_symbols(path: &Path) -> Result<Vec<SymbolConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read symbols file {}", path.display()))?;
    parse_symbols(&raw).with_context(|| format!("Invalid symbols file {}", path.display()))
}

/// Parse a JSON array of symbol configs.
pub fn parse_symbols(raw: &str) -> Result<Vec<SymbolConfig>> {
    let symbols: Vec<SymbolConfig> =
        serde_json::from_str(raw).context("Failed to parse symbol configs")?;
    Ok(symbols)
}
