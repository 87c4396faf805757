//! Paper broker: simulated fills against quoted or live prices.
//!
//! Used for dry runs, replays and tests. Orders fill instantly at the last
//! known price; nothing reaches a real account.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{TradeError, TradeResult};
use crate::models::{OpenPosition, OrderTicket, PricePoint, TradeSide};

use super::bridge_client::BridgeClient;
use super::broker::Broker;

/// Retcode reported for simulated rejections (`TRADE_RETCODE_REJECT`).
pub const PAPER_REJECT_CODE: i64 = 10006;

/// A filled paper order still open.
#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl PaperPosition {
    /// Price move in the position's favour.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.side.sign() * self.volume
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    prices: HashMap<String, PricePoint>,
    references: HashMap<String, Decimal>,
    positions: Vec<PaperPosition>,
    realized: Decimal,
    orders: usize,
}

/// Simulated broker.
pub struct PaperBroker {
    book: Mutex<PaperBook>,
    feed: Option<BridgeClient>,
    next_ticket: AtomicU64,
    reject_orders: AtomicBool,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    /// Broker whose prices are set by hand.
    pub fn new() -> Self {
        Self {
            book: Mutex::new(PaperBook::default()),
            feed: None,
            next_ticket: AtomicU64::new(1),
            reject_orders: AtomicBool::new(false),
        }
    }

    /// Broker that reads prices from a live bridge but never sends orders.
    pub fn with_feed(feed: BridgeClient) -> Self {
        Self {
            feed: Some(feed),
            ..Self::new()
        }
    }

    /// Quote a price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        let mut book = self.book.lock().await;
        book.prices
            .insert(symbol.to_string(), PricePoint::new(symbol, price, at));
    }

    /// Set the reference bar close returned for a symbol.
    pub async fn set_reference(&self, symbol: &str, price: Decimal) {
        self.book
            .lock()
            .await
            .references
            .insert(symbol.to_string(), price);
    }

    /// Make every following order and close fail.
    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    pub async fn positions(&self) -> Vec<PaperPosition> {
        self.book.lock().await.positions.clone()
    }

    /// Realized price movement over all closed positions.
    pub async fn realized(&self) -> Decimal {
        self.book.lock().await.realized
    }

    /// Orders filled so far.
    pub async fn order_count(&self) -> usize {
        self.book.lock().await.orders
    }

    async fn last_price(&self, symbol: &str) -> TradeResult<Decimal> {
        let book = self.book.lock().await;
        book.prices
            .get(symbol)
            .map(|p| p.price)
            .ok_or_else(|| TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: "no paper quote".to_string(),
            })
    }
}

impl Broker for PaperBroker {
    async fn get_current_price(&self, symbol: &str) -> TradeResult<PricePoint> {
        if let Some(feed) = &self.feed {
            let point = feed.get_current_price(symbol).await?;
            self.book
                .lock()
                .await
                .prices
                .insert(symbol.to_string(), point.clone());
            return Ok(point);
        }

        let book = self.book.lock().await;
        book.prices
            .get(symbol)
            .cloned()
            .ok_or_else(|| TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: "no paper quote".to_string(),
            })
    }

    async fn get_reference_bar(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: u32,
    ) -> TradeResult<Decimal> {
        if let Some(price) = self.book.lock().await.references.get(symbol) {
            return Ok(*price);
        }
        match &self.feed {
            Some(feed) => feed.get_reference_bar(symbol, from, count).await,
            None => Err(TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: format!("no paper reference at {}", from),
            }),
        }
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        volume: Decimal,
        comment: &str,
    ) -> TradeResult<OrderTicket> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(TradeError::OrderRejected {
                symbol: symbol.to_string(),
                code: PAPER_REJECT_CODE,
                message: "paper rejection".to_string(),
            });
        }

        let price = self.last_price(symbol).await?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);

        let mut book = self.book.lock().await;
        book.positions.push(PaperPosition {
            ticket,
            symbol: symbol.to_string(),
            side,
            volume,
            entry_price: price,
            opened_at: Utc::now(),
        });
        book.orders += 1;

        info!(
            symbol = %symbol,
            side = %side,
            volume = %volume,
            price = %price,
            ticket,
            comment = %comment,
            "[PAPER] Order filled"
        );

        Ok(OrderTicket {
            ticket,
            symbol: symbol.to_string(),
            side,
            volume,
            price: Some(price),
        })
    }

    async fn close_position(&self, ticket: u64) -> TradeResult<()> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(TradeError::CloseRejected {
                ticket,
                code: PAPER_REJECT_CODE,
                message: "paper rejection".to_string(),
            });
        }

        let mut book = self.book.lock().await;
        let idx = book
            .positions
            .iter()
            .position(|p| p.ticket == ticket)
            .ok_or_else(|| TradeError::CloseRejected {
                ticket,
                code: PAPER_REJECT_CODE,
                message: "unknown ticket".to_string(),
            })?;

        let position = book.positions.remove(idx);
        let exit = book
            .prices
            .get(&position.symbol)
            .map(|p| p.price)
            .unwrap_or(position.entry_price);
        let pnl = position.pnl_at(exit);
        book.realized += pnl;

        debug!(
            ticket,
            symbol = %position.symbol,
            exit = %exit,
            pnl = %pnl,
            held_secs = (Utc::now() - position.opened_at).num_seconds(),
            "[PAPER] Position closed"
        );
        Ok(())
    }

    async fn list_open_positions(&self, symbol: &str) -> TradeResult<Vec<OpenPosition>> {
        let book = self.book.lock().await;
        Ok(book
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| OpenPosition {
                ticket: p.ticket,
                symbol: p.symbol.clone(),
                volume: p.volume,
                side: p.side,
            })
            .collect())
    }
}
