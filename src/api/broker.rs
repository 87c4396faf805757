//! The broker boundary the bot trades through.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::TradeResult;
use crate::models::{OpenPosition, OrderTicket, PricePoint, TradeSide};

/// Price source and order execution for a trading terminal.
///
/// Implementations convert every failure into a [`crate::error::TradeError`]
/// so callers can tell a missing price from a rejected order.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Current bid for the symbol.
    async fn get_current_price(&self, symbol: &str) -> TradeResult<PricePoint>;

    /// Close of the first 5-minute bar at or before `from`.
    async fn get_reference_bar(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: u32,
    ) -> TradeResult<Decimal>;

    /// Send a market order.
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        volume: Decimal,
        comment: &str,
    ) -> TradeResult<OrderTicket>;

    /// Close a position by ticket.
    async fn close_position(&self, ticket: u64) -> TradeResult<()>;

    /// Positions currently open for the symbol.
    async fn list_open_positions(&self, symbol: &str) -> TradeResult<Vec<OpenPosition>>;
}
