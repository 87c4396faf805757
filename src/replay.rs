//! Offline replay of a price sequence through the full bot pipeline.
//!
//! Uses the paper broker, an in-memory sink and an in-memory database, so a
//! run touches nothing outside the process. Handy for checking how a symbol
//! config reacts to a move before running it live.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::api::PaperBroker;
use crate::bot::{Bot, BotConfig};
use crate::models::SymbolConfig;
use crate::notify::MemorySink;
use crate::trading::{compute, Direction, TradingConfig};

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Seconds between consecutive prices
    pub step_secs: i64,

    /// Trading configuration
    pub trading_config: TradingConfig,

    /// Time of the first price
    pub start_time: DateTime<Utc>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            step_secs: 1,
            trading_config: TradingConfig::default(),
            start_time: Utc::now(),
        }
    }
}

/// What happened at one price.
#[derive(Debug, Clone)]
pub struct ReplayStep {
    pub price: Decimal,
    pub pip_difference: Decimal,
    pub direction: Direction,
    pub thresholds_crossed: u32,
    pub position: &'static str,
    pub trades_today: u32,
    pub messages: Vec<String>,
}

/// Replay results summary.
#[derive(Debug, Clone)]
pub struct ReplayResults {
    pub symbol: String,
    pub start_price: Decimal,
    pub steps: Vec<ReplayStep>,
    pub orders: usize,
    pub open_positions: usize,
    /// Closed-position movement in pips, weighted by volume
    pub realized_pips: Decimal,
}

impl std::fmt::Display for ReplayResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " REPLAY ")?;
        writeln!(f, "Symbol: {}  Start: {}", self.symbol, self.start_price)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>4} {:>12} {:>9} {:>8} {:>3} {:>7} {:>6}",
            "#", "price", "pips", "dir", "x", "state", "trades"
        )?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(
                f,
                "{:>4} {:>12} {:>9} {:>8} {:>3} {:>7} {:>6}",
                i + 1,
                step.price,
                step.pip_difference.round_dp(1),
                step.direction.as_str(),
                step.thresholds_crossed,
                step.position,
                step.trades_today
            )?;
            for message in &step.messages {
                let headline = message.lines().next().unwrap_or_default();
                writeln!(f, "       > {}", headline)?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Orders filled:  {}", self.orders)?;
        writeln!(f, "Still open:     {}", self.open_positions)?;
        writeln!(f, "Realized:       {} pips", self.realized_pips.round_dp(1))?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Replay engine.
pub struct Replayer {
    config: ReplayConfig,
}

impl Replayer {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Feed `prices` one tick at a time against a fixed start price.
    pub async fn run(
        &self,
        symbol: SymbolConfig,
        start_price: Decimal,
        prices: &[Decimal],
    ) -> Result<ReplayResults> {
        info!(symbol = %symbol.symbol, start = %start_price, count = prices.len(), "Starting replay");

        let broker = PaperBroker::new();
        broker.set_reference(&symbol.symbol, start_price).await;

        let bot_config = BotConfig {
            database_url: "sqlite::memory:".to_string(),
            trading_config: self.config.trading_config.clone(),
            ..BotConfig::default()
        };
        let mut bot = Bot::new(bot_config, vec![symbol.clone()], broker, MemorySink::new()).await?;

        let mut now = self.config.start_time;
        bot.initialize_at(now).await?;
        bot.notifier().sink().drain();

        let mut steps = Vec::with_capacity(prices.len());
        for price in prices {
            bot.broker().set_price(&symbol.symbol, *price, now).await;
            bot.tick_at(now).await?;

            let start = bot.start_price(&symbol.symbol).unwrap_or(start_price);
            let result = compute(start, *price, &symbol)?;
            let state = bot.state(&symbol.symbol);

            steps.push(ReplayStep {
                price: *price,
                pip_difference: result.pip_difference,
                direction: result.direction,
                thresholds_crossed: result.thresholds_crossed,
                position: state.map(|s| s.position.name()).unwrap_or("flat"),
                trades_today: state.map(|s| s.trades_today).unwrap_or(0),
                messages: bot.notifier().sink().drain(),
            });

            now += Duration::seconds(self.config.step_secs.max(1));
        }

        let broker = bot.broker();
        Ok(ReplayResults {
            symbol: symbol.symbol.clone(),
            start_price,
            steps,
            orders: broker.order_count().await,
            open_positions: broker.positions().await.len(),
            realized_pips: broker.realized().await / symbol.pip_size,
        })
    }
}

/// Parse a comma-separated price list.
pub fn parse_prices(raw: &str) -> Result<Vec<Decimal>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Decimal>()
                .map_err(|e| anyhow::anyhow!("Invalid price '{}': {}", s, e))
        })
        .collect()
}
