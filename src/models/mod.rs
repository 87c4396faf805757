//! Data models for symbols, prices, orders and per-symbol trade state.

mod price;
mod symbol;
mod trade;
mod trade_state;

pub use price::{decimal_price, Bar, PricePoint};
pub use symbol::{default_symbols, load_symbols, SymbolConfig};
pub use trade::{OpenPosition, OrderTicket, TradeSide};
pub use trade_state::{PositionState, TradeState};
