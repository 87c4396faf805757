//! Per-symbol open/close/hedge state machine.
//!
//! Deciding and mutating are separate steps: [`TradeController::decide`] looks
//! at the current [`TradeState`] and a [`ThresholdResult`] and returns the
//! broker actions to attempt plus the transition to apply if they succeed.
//! The bot only calls [`TradeController::apply`] once the broker accepted the
//! actions, so a rejected order leaves the state exactly as it was.
//!
//! Within one tick an open position is checked in this order: profit target,
//! stop-loss, hedge, peak tracking.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{PositionState, SymbolConfig, TradeSide, TradeState};

use super::threshold::{threshold_units, ThresholdResult};

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    Target,
    StopLoss,
    HedgeResolved,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Target => "target",
            CloseReason::StopLoss => "stop-loss",
            CloseReason::HedgeResolved => "hedge-resolved",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker action requested by a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenTrade { side: TradeSide, volume: Decimal },
    /// Close every open position for the symbol
    CloseTrade { reason: CloseReason },
    HedgeTrade { side: TradeSide, volume: Decimal },
}

/// State change to apply once the actions went through.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Stay,
    /// Position reached a new high-water threshold count
    TrackPeak(u32),
    Open {
        direction: TradeSide,
        entry_pip_difference: Decimal,
        thresholds: u32,
    },
    Close {
        reason: CloseReason,
    },
    /// Some tickets closed, some were refused
    CloseIncomplete {
        reason: CloseReason,
    },
    Hedge {
        hedge_entry_price: Decimal,
        hedges: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub actions: Vec<Action>,
    pub transition: Transition,
}

impl Decision {
    fn stay() -> Self {
        Self {
            actions: Vec::new(),
            transition: Transition::Stay,
        }
    }

    fn silent(transition: Transition) -> Self {
        Self {
            actions: Vec::new(),
            transition,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty() && self.transition == Transition::Stay
    }
}

/// Signed threshold-unit level at or below which an escalated position hedges.
const HEDGE_UNITS: Decimal = dec!(0.5);

/// Default pause on new opens after a stop-loss.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

/// Decision logic shared by all symbols.
#[derive(Debug, Clone)]
pub struct TradeController {
    cooldown: Duration,
}

impl Default for TradeController {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

impl TradeController {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// Decide what to do for one symbol on this tick.
    pub fn decide(
        &self,
        config: &SymbolConfig,
        state: &TradeState,
        result: &ThresholdResult,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Decision {
        match &state.position {
            PositionState::Flat => self.decide_flat(config, state, result, now),
            PositionState::Open {
                direction,
                entry_pip_difference,
                peak_thresholds,
            } => self.decide_open(
                config,
                result,
                *direction,
                *entry_pip_difference,
                *peak_thresholds,
                current_price,
            ),
            PositionState::Hedged {
                direction,
                hedge_entry_price,
                ..
            } => self.decide_hedged(config, *direction, *hedge_entry_price, current_price),
            PositionState::Closing { reason, .. } => Decision {
                actions: vec![Action::CloseTrade { reason: *reason }],
                transition: Transition::Close { reason: *reason },
            },
        }
    }

    fn decide_flat(
        &self,
        config: &SymbolConfig,
        state: &TradeState,
        result: &ThresholdResult,
        now: DateTime<Utc>,
    ) -> Decision {
        if result.thresholds_crossed == 0 {
            return Decision::stay();
        }
        if state.in_cooldown(now) {
            debug!(symbol = %config.symbol, "In cooldown, not opening");
            return Decision::stay();
        }
        if state.trades_today >= config.max_trades_per_day {
            debug!(
                symbol = %config.symbol,
                trades_today = state.trades_today,
                "Daily trade limit reached"
            );
            return Decision::stay();
        }
        let Some(side) = result.direction.trade_side() else {
            return Decision::stay();
        };

        Decision {
            actions: vec![Action::OpenTrade {
                side,
                volume: config.lot_size,
            }],
            transition: Transition::Open {
                direction: side,
                entry_pip_difference: result.pip_difference,
                thresholds: result.thresholds_crossed,
            },
        }
    }

    fn decide_open(
        &self,
        config: &SymbolConfig,
        result: &ThresholdResult,
        direction: TradeSide,
        entry_pip_difference: Decimal,
        peak_thresholds: u32,
        current_price: Decimal,
    ) -> Decision {
        // Pips gained since entry; negative when the market moved against us.
        let moved = (result.pip_difference - entry_pip_difference) * direction.sign();

        if moved >= config.close_trade_at {
            return Decision {
                actions: vec![Action::CloseTrade {
                    reason: CloseReason::Target,
                }],
                transition: Transition::Close {
                    reason: CloseReason::Target,
                },
            };
        }

        if -moved >= config.close_trade_at_opposite_direction {
            return Decision {
                actions: vec![Action::CloseTrade {
                    reason: CloseReason::StopLoss,
                }],
                transition: Transition::Close {
                    reason: CloseReason::StopLoss,
                },
            };
        }

        let crossed = result.crossed_for(direction);
        let peak = peak_thresholds.max(crossed);
        let units = threshold_units(result.pip_difference, config) * direction.sign();

        if peak >= config.hedge_min_peak_thresholds && units <= HEDGE_UNITS {
            let hedge_side = direction.opposite();
            let actions = (0..config.hedge_trades)
                .map(|_| Action::HedgeTrade {
                    side: hedge_side,
                    volume: config.hedge_lot_size,
                })
                .collect();
            return Decision {
                actions,
                transition: Transition::Hedge {
                    hedge_entry_price: current_price,
                    hedges: config.hedge_trades,
                },
            };
        }

        if crossed > peak_thresholds {
            return Decision::silent(Transition::TrackPeak(crossed));
        }

        Decision::stay()
    }

    fn decide_hedged(
        &self,
        config: &SymbolConfig,
        direction: TradeSide,
        hedge_entry_price: Decimal,
        current_price: Decimal,
    ) -> Decision {
        let pips_beyond = (current_price - hedge_entry_price) / config.pip_size * direction.sign();

        if pips_beyond >= config.threshold_for(direction.is_long()) {
            return Decision {
                actions: vec![Action::CloseTrade {
                    reason: CloseReason::HedgeResolved,
                }],
                transition: Transition::Close {
                    reason: CloseReason::HedgeResolved,
                },
            };
        }

        Decision::stay()
    }

    /// Apply a transition whose actions were accepted by the broker.
    pub fn apply(&self, state: &mut TradeState, transition: &Transition, now: DateTime<Utc>) {
        match transition {
            Transition::Stay => {}
            Transition::TrackPeak(peak) => {
                if let PositionState::Open {
                    peak_thresholds, ..
                } = &mut state.position
                {
                    *peak_thresholds = (*peak_thresholds).max(*peak);
                }
            }
            Transition::Open {
                direction,
                entry_pip_difference,
                thresholds,
            } => {
                state.position = PositionState::Open {
                    direction: *direction,
                    entry_pip_difference: *entry_pip_difference,
                    peak_thresholds: *thresholds,
                };
                state.trades_today += 1;
            }
            Transition::Close { reason } => {
                state.position = PositionState::Flat;
                if *reason == CloseReason::StopLoss {
                    state.cooldown_until = Some(now + self.cooldown);
                }
            }
            Transition::CloseIncomplete { reason } => {
                if let (Some(direction), Some(entry_pip_difference)) =
                    (state.direction(), state.entry_pip_difference())
                {
                    state.position = PositionState::Closing {
                        direction,
                        entry_pip_difference,
                        reason: *reason,
                    };
                }
            }
            Transition::Hedge {
                hedge_entry_price,
                hedges,
            } => {
                if let PositionState::Open {
                    direction,
                    entry_pip_difference,
                    ..
                } = state.position
                {
                    state.position = PositionState::Hedged {
                        direction,
                        entry_pip_difference,
                        hedge_entry_price: *hedge_entry_price,
                        hedges: *hedges,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::threshold::{compute, Direction};
    use chrono::NaiveDate;

    fn eurusd() -> SymbolConfig {
        SymbolConfig::new("EURUSD", dec!(0.0001), dec!(15), dec!(10), dec!(8))
    }

    fn fresh_state() -> TradeState {
        TradeState::new("EURUSD", NaiveDate::from_ymd_opt(2024, 3, 12).unwrap())
    }

    /// Decide and apply as if the broker accepted everything.
    fn step(
        controller: &TradeController,
        config: &SymbolConfig,
        state: &mut TradeState,
        start: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<Action> {
        let result = compute(start, price, config).unwrap();
        let decision = controller.decide(config, state, &result, price, now);
        controller.apply(state, &decision.transition, now);
        decision.actions
    }

    #[test]
    fn test_eurusd_open_then_target() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        let actions = step(&controller, &config, &mut state, start, dec!(1.09695), now);
        assert!(actions.is_empty());
        assert!(!state.trade_placed());

        let actions = step(&controller, &config, &mut state, start, dec!(1.09830), now);
        assert_eq!(
            actions,
            vec![Action::OpenTrade {
                side: TradeSide::Buy,
                volume: dec!(1.0)
            }]
        );
        assert_eq!(state.direction(), Some(TradeSide::Buy));
        assert_eq!(state.entry_pip_difference(), Some(dec!(15)));
        assert_eq!(state.trades_today, 1);

        let actions = step(&controller, &config, &mut state, start, dec!(1.09930), now);
        assert_eq!(
            actions,
            vec![Action::CloseTrade {
                reason: CloseReason::Target
            }]
        );
        assert_eq!(state.position, PositionState::Flat);
        assert!(state.cooldown_until.is_none());
    }

    #[test]
    fn test_stop_loss_boundary() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        step(&controller, &config, &mut state, start, dec!(1.09830), now);
        assert!(state.trade_placed());

        // 7.5 pips against: below the 8 pip stop
        let actions = step(&controller, &config, &mut state, start, dec!(1.097550), now);
        assert!(actions.is_empty());
        assert!(state.trade_placed());

        // 8 pips against: stop-loss
        let actions = step(&controller, &config, &mut state, start, dec!(1.09750), now);
        assert_eq!(
            actions,
            vec![Action::CloseTrade {
                reason: CloseReason::StopLoss
            }]
        );
        assert!(!state.trade_placed());
        assert_eq!(state.cooldown_until, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn test_cooldown_blocks_reopen() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        step(&controller, &config, &mut state, start, dec!(1.09830), now);
        step(&controller, &config, &mut state, start, dec!(1.09750), now);

        let actions = step(
            &controller,
            &config,
            &mut state,
            start,
            dec!(1.09840),
            now + Duration::seconds(30),
        );
        assert!(actions.is_empty());

        let actions = step(
            &controller,
            &config,
            &mut state,
            start,
            dec!(1.09840),
            now + Duration::seconds(61),
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(state.trades_today, 2);
    }

    #[test]
    fn test_trade_limit_boundary() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        state.trades_today = config.max_trades_per_day;

        let result = compute(dec!(1.09680), dec!(1.09900), &config).unwrap();
        assert_eq!(result.thresholds_crossed, 1);
        let decision = controller.decide(&config, &state, &result, dec!(1.09900), Utc::now());
        assert!(decision.is_noop());

        state.trades_today = config.max_trades_per_day - 1;
        let decision = controller.decide(&config, &state, &result, dec!(1.09900), Utc::now());
        assert_eq!(decision.actions.len(), 1);
    }

    #[test]
    fn test_target_inclusive_for_sell() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        let actions = step(&controller, &config, &mut state, start, dec!(1.09530), now);
        assert_eq!(
            actions,
            vec![Action::OpenTrade {
                side: TradeSide::Sell,
                volume: dec!(1.0)
            }]
        );

        // 9.9 pips in favour: hold
        let actions = step(&controller, &config, &mut state, start, dec!(1.09431), now);
        assert!(actions.is_empty());

        // exactly 10 pips in favour
        let actions = step(&controller, &config, &mut state, start, dec!(1.09430), now);
        assert_eq!(
            actions,
            vec![Action::CloseTrade {
                reason: CloseReason::Target
            }]
        );
    }

    #[test]
    fn test_escalated_position_hedges_then_resolves() {
        let controller = TradeController::default();
        let mut config = eurusd();
        config.close_trade_at = dec!(50);
        config.close_trade_at_opposite_direction = dec!(40);
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        step(&controller, &config, &mut state, start, dec!(1.09830), now);
        // 30 pips: second threshold, tracked as the new peak
        let actions = step(&controller, &config, &mut state, start, dec!(1.09980), now);
        assert!(actions.is_empty());
        assert!(matches!(
            state.position,
            PositionState::Open {
                peak_thresholds: 2,
                ..
            }
        ));

        // Back to 7 pips: 0.47 threshold units, hedge
        let actions = step(&controller, &config, &mut state, start, dec!(1.09750), now);
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| matches!(
            a,
            Action::HedgeTrade {
                side: TradeSide::Sell,
                ..
            }
        )));
        assert_eq!(state.hedge_entry_price(), Some(dec!(1.09750)));

        // Not yet a full unit above the hedge price
        let actions = step(&controller, &config, &mut state, start, dec!(1.09890), now);
        assert!(actions.is_empty());

        // 15 pips above the hedge entry
        let actions = step(&controller, &config, &mut state, start, dec!(1.09900), now);
        assert_eq!(
            actions,
            vec![Action::CloseTrade {
                reason: CloseReason::HedgeResolved
            }]
        );
        assert!(!state.trade_placed());
        assert!(state.hedge_entry_price().is_none());
    }

    #[test]
    fn test_no_hedge_without_escalation() {
        let controller = TradeController::default();
        let mut config = eurusd();
        config.close_trade_at_opposite_direction = dec!(40);
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        step(&controller, &config, &mut state, start, dec!(1.09830), now);
        let actions = step(&controller, &config, &mut state, start, dec!(1.09700), now);
        assert!(actions.is_empty());
        assert!(matches!(state.position, PositionState::Open { .. }));
    }

    #[test]
    fn test_rejected_actions_leave_state() {
        let controller = TradeController::default();
        let config = eurusd();
        let state = fresh_state();
        let result = compute(dec!(1.09680), dec!(1.09830), &config).unwrap();
        assert_eq!(result.direction, Direction::Up);

        let decision = controller.decide(&config, &state, &result, dec!(1.09830), Utc::now());
        assert!(!decision.actions.is_empty());
        // Not applied: nothing changed
        assert!(!state.trade_placed());
        assert_eq!(state.trades_today, 0);
    }

    #[test]
    fn test_closing_retries_regardless_of_price() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        let start = dec!(1.09680);
        let now = Utc::now();

        step(&controller, &config, &mut state, start, dec!(1.09830), now);
        controller.apply(
            &mut state,
            &Transition::CloseIncomplete {
                reason: CloseReason::StopLoss,
            },
            now,
        );
        assert_eq!(
            state.position,
            PositionState::Closing {
                direction: TradeSide::Buy,
                entry_pip_difference: dec!(15),
                reason: CloseReason::StopLoss,
            }
        );

        // Back at the entry level, where an open position would hold
        let actions = step(&controller, &config, &mut state, start, dec!(1.09830), now);
        assert_eq!(
            actions,
            vec![Action::CloseTrade {
                reason: CloseReason::StopLoss
            }]
        );
        assert_eq!(state.position, PositionState::Flat);
        assert_eq!(state.cooldown_until, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn test_daily_reset_from_any_state() {
        let controller = TradeController::default();
        let config = eurusd();
        let mut state = fresh_state();
        let start = dec!(1.09680);
        step(&controller, &config, &mut state, start, dec!(1.09830), Utc::now());
        assert!(state.trade_placed());

        let next = state.trading_day.succ_opt().unwrap();
        state.reset_for_day(next);
        assert_eq!(state.position, PositionState::Flat);
        assert_eq!(state.trades_today, 0);
    }
}
