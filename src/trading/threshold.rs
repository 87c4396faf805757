//! Pip difference, direction and threshold counting.
//!
//! Everything here is pure: two prices and a symbol config in, a
//! [`ThresholdResult`] out. Crossing is inclusive (a pip difference equal to
//! the threshold counts) and the crossed count is floor-divided, so 2.0x the
//! threshold is two crossings and 2.9x is still two.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{TradeError, TradeResult};
use crate::models::{SymbolConfig, TradeSide};

/// Which side of the reference price the move is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Neutral => "neutral",
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "↑",
            Direction::Down => "↓",
            Direction::Neutral => "-",
        }
    }

    /// Side of the trade a crossing in this direction opens.
    pub fn trade_side(&self) -> Option<TradeSide> {
        match self {
            Direction::Up => Some(TradeSide::Buy),
            Direction::Down => Some(TradeSide::Sell),
            Direction::Neutral => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a current price with the reference price.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub direction: Direction,
    pub thresholds_crossed: u32,
    /// Signed pips, current minus start
    pub pip_difference: Decimal,
}

impl ThresholdResult {
    /// Thresholds crossed in favour of a position on `side` (0 otherwise).
    pub fn crossed_for(&self, side: TradeSide) -> u32 {
        match (self.direction, side) {
            (Direction::Up, TradeSide::Buy) | (Direction::Down, TradeSide::Sell) => {
                self.thresholds_crossed
            }
            _ => 0,
        }
    }
}

/// Compute direction and crossed thresholds for one symbol.
pub fn compute(
    start_price: Decimal,
    current_price: Decimal,
    config: &SymbolConfig,
) -> TradeResult<ThresholdResult> {
    config.validate_thresholds()?;
    check_price(&config.symbol, "start", start_price)?;
    check_price(&config.symbol, "current", current_price)?;

    let pip_difference = (current_price - start_price) / config.pip_size;

    let (direction, thresholds_crossed) = if pip_difference >= config.positive_pip_threshold {
        (
            Direction::Up,
            floor_units(pip_difference, config.positive_pip_threshold),
        )
    } else if pip_difference <= config.negative_pip_threshold {
        (
            Direction::Down,
            floor_units(pip_difference.abs(), config.negative_pip_threshold.abs()),
        )
    } else {
        (Direction::Neutral, 0)
    };

    Ok(ThresholdResult {
        direction,
        thresholds_crossed,
        pip_difference,
    })
}

fn check_price(symbol: &str, label: &str, price: Decimal) -> TradeResult<()> {
    if price <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(format!(
            "{}: {} price must be positive, got {}",
            symbol, label, price
        )));
    }
    Ok(())
}

fn floor_units(pips: Decimal, threshold: Decimal) -> u32 {
    (pips / threshold).floor().to_u32().unwrap_or(u32::MAX)
}

/// Signed pip difference expressed in threshold units of its own side.
pub fn threshold_units(pip_difference: Decimal, config: &SymbolConfig) -> Decimal {
    if pip_difference >= Decimal::ZERO {
        pip_difference / config.positive_pip_threshold
    } else {
        pip_difference / config.negative_pip_threshold.abs()
    }
}

/// Pips still needed to reach the positive threshold (negative once past it).
pub fn pips_to_positive_threshold(pip_difference: Decimal, config: &SymbolConfig) -> Decimal {
    config.positive_pip_threshold - pip_difference
}

/// Pips still needed to reach the negative threshold (negative once past it).
pub fn pips_to_negative_threshold(pip_difference: Decimal, config: &SymbolConfig) -> Decimal {
    pip_difference - config.negative_pip_threshold
}

/// Direction inside the alert band `[threshold, range]` on either side.
///
/// A missing range leaves that side of the band open-ended.
pub fn band_direction(pip_difference: Decimal, config: &SymbolConfig) -> Direction {
    let upper_ok = config
        .positive_pip_range
        .map(|range| pip_difference <= range)
        .unwrap_or(true);
    let lower_ok = config
        .negative_pip_range
        .map(|range| pip_difference >= range)
        .unwrap_or(true);

    if pip_difference >= config.positive_pip_threshold && upper_ok {
        Direction::Up
    } else if pip_difference <= config.negative_pip_threshold && lower_ok {
        Direction::Down
    } else {
        Direction::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eurusd() -> SymbolConfig {
        SymbolConfig::new("EURUSD", dec!(0.0001), dec!(15), dec!(10), dec!(8))
    }

    #[test]
    fn test_identical_prices_neutral() {
        let config = eurusd();
        for start in [dec!(0.5), dec!(1.09680), dec!(150.25)] {
            let result = compute(start, start, &config).unwrap();
            assert_eq!(result.direction, Direction::Neutral);
            assert_eq!(result.thresholds_crossed, 0);
            assert_eq!(result.pip_difference, Decimal::ZERO);
        }
    }

    #[test]
    fn test_exact_threshold_counts() {
        let config = eurusd();
        let start = dec!(1.09680);

        let one = compute(start, start + dec!(15) * config.pip_size, &config).unwrap();
        assert_eq!(one.direction, Direction::Up);
        assert_eq!(one.thresholds_crossed, 1);

        let two = compute(start, start + dec!(30) * config.pip_size, &config).unwrap();
        assert_eq!(two.direction, Direction::Up);
        assert_eq!(two.thresholds_crossed, 2);
    }

    #[test]
    fn test_floor_division() {
        let config = eurusd();
        let start = dec!(1.09680);
        let result = compute(start, start + dec!(44.9) * config.pip_size, &config).unwrap();
        assert_eq!(result.thresholds_crossed, 2);
    }

    #[test]
    fn test_just_below_threshold_neutral() {
        let config = eurusd();
        let start = dec!(1.09680);
        let result = compute(start, start + dec!(14.9) * config.pip_size, &config).unwrap();
        assert_eq!(result.direction, Direction::Neutral);
        assert_eq!(result.thresholds_crossed, 0);
    }

    #[test]
    fn test_direction_antisymmetry() {
        let config = eurusd();
        let start = dec!(1.09680);
        for pips in [dec!(15), dec!(16.5), dec!(31), dec!(75)] {
            let d = pips * config.pip_size;
            let up = compute(start, start + d, &config).unwrap();
            let down = compute(start, start - d, &config).unwrap();
            assert_eq!(up.direction, Direction::Up);
            assert_eq!(down.direction, Direction::Down);
            assert_eq!(up.thresholds_crossed, down.thresholds_crossed);
        }
    }

    #[test]
    fn test_jpy_pip_size() {
        let config = SymbolConfig::new("USDJPY", dec!(0.01), dec!(10), dec!(10), dec!(7));
        let result = compute(dec!(149.500), dec!(149.300), &config).unwrap();
        assert_eq!(result.pip_difference, dec!(-20));
        assert_eq!(result.direction, Direction::Down);
        assert_eq!(result.thresholds_crossed, 2);
    }

    #[test]
    fn test_invalid_configuration() {
        let mut config = eurusd();
        config.pip_size = dec!(0);
        let err = compute(dec!(1.1), dec!(1.2), &config).unwrap_err();
        assert!(matches!(err, TradeError::InvalidConfiguration(_)));

        let mut config = eurusd();
        config.negative_pip_threshold = dec!(5);
        let err = compute(dec!(1.1), dec!(1.2), &config).unwrap_err();
        assert!(matches!(err, TradeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_input() {
        let config = eurusd();
        let err = compute(dec!(0), dec!(1.2), &config).unwrap_err();
        assert!(matches!(err, TradeError::InvalidInput(_)));
        let err = compute(dec!(1.1), dec!(-1.2), &config).unwrap_err();
        assert!(matches!(err, TradeError::InvalidInput(_)));
    }

    #[test]
    fn test_crossed_for_side() {
        let config = eurusd();
        let result = compute(dec!(1.09680), dec!(1.09980), &config).unwrap();
        assert_eq!(result.crossed_for(TradeSide::Buy), 2);
        assert_eq!(result.crossed_for(TradeSide::Sell), 0);
    }

    #[test]
    fn test_band_direction() {
        let config = eurusd().with_range(dec!(17), dec!(-17));
        assert_eq!(band_direction(dec!(16), &config), Direction::Up);
        assert_eq!(band_direction(dec!(17), &config), Direction::Up);
        assert_eq!(band_direction(dec!(18), &config), Direction::Neutral);
        assert_eq!(band_direction(dec!(-15), &config), Direction::Down);
        assert_eq!(band_direction(dec!(-20), &config), Direction::Neutral);

        // Without ranges the band is open-ended.
        assert_eq!(band_direction(dec!(40), &eurusd()), Direction::Up);
    }

    #[test]
    fn test_distances_and_units() {
        let config = eurusd();
        assert_eq!(pips_to_positive_threshold(dec!(5), &config), dec!(10));
        assert_eq!(pips_to_negative_threshold(dec!(5), &config), dec!(20));
        assert_eq!(threshold_units(dec!(7.5), &config), dec!(0.5));
        assert_eq!(threshold_units(dec!(-30), &config), dec!(-2));
    }
}
