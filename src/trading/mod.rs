//! Trading logic: threshold engine, controller state machine, calendar.

mod calendar;
mod config;
mod controller;
pub mod threshold;

pub use calendar::TradingCalendar;
pub use config::TradingConfig;
pub use controller::{Action, CloseReason, Decision, TradeController, Transition};
pub use threshold::{compute, Direction, ThresholdResult};
