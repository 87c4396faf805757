//! Bot runner: polling loop, per-symbol evaluation and daily rollover.
//!
//! Handles:
//! - Fetching every symbol's price each tick, concurrently
//! - Running the threshold engine and trade controller per symbol
//! - Executing controller actions through the broker
//! - Daily reset and reference price refresh
//! - Periodic summaries and crash-recovery snapshots

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::Broker;
use crate::db::{Database, NewTradeEvent};
use crate::error::{TradeError, TradeResult};
use crate::models::{PricePoint, SymbolConfig, TradeSide, TradeState};
use crate::notify::{format, MessageSink, Notifier};
use crate::trading::threshold::band_direction;
use crate::trading::{
    compute, Action, CloseReason, Decision, Direction, ThresholdResult, TradeController,
    TradingCalendar, TradingConfig, Transition,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Price polling interval (seconds)
    pub poll_interval_secs: u64,

    /// Summary notification interval (seconds)
    pub summary_interval_secs: u64,

    /// Route orders to the paper broker instead of the terminal
    pub dry_run: bool,

    /// Timeout for every broker and webhook request (seconds)
    pub broker_timeout_secs: u64,

    /// Trading configuration
    pub trading_config: TradingConfig,

    /// Database URL
    pub database_url: String,
}

impl BotConfig {
    /// Request timeout for the bridge and webhook clients, at least one second.
    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs.max(1))
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            summary_interval_secs: 3600,
            dry_run: true,
            broker_timeout_secs: 10,
            trading_config: TradingConfig::default(),
            database_url: "sqlite:pipwatch.db?mode=rwc".to_string(),
        }
    }
}

/// How a close-all attempt went at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOutcome {
    /// Every ticket closed
    Closed,
    /// Some tickets closed, at least one refused
    Partial,
    /// Nothing closed
    Rejected,
}

/// Main bot runner.
pub struct Bot<B, S> {
    config: BotConfig,
    symbols: Vec<SymbolConfig>,
    broker: B,
    notifier: Notifier<S>,
    db: Database,
    controller: TradeController,
    calendar: TradingCalendar,

    // Runtime state, one entry per symbol
    states: HashMap<String, TradeState>,
    start_prices: HashMap<String, Decimal>,
    current_day: Option<NaiveDate>,
    last_summary_at: Option<DateTime<Utc>>,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl<B: Broker, S: MessageSink> Bot<B, S> {
    /// Create a new bot. Invalid symbol configs are skipped; none valid is fatal.
    pub async fn new(
        config: BotConfig,
        symbols: Vec<SymbolConfig>,
        broker: B,
        sink: S,
    ) -> Result<Self> {
        let symbols: Vec<SymbolConfig> = symbols
            .into_iter()
            .filter(|s| match s.validate() {
                Ok(()) => true,
                Err(e) => {
                    error!(symbol = %s.symbol, error = %e, "Rejecting symbol config");
                    false
                }
            })
            .collect();
        if symbols.is_empty() {
            bail!("No valid symbol configs");
        }

        let trading = &config.trading_config;
        let Some(calendar) = TradingCalendar::new(trading.utc_offset_minutes) else {
            bail!(TradeError::InvalidConfiguration(format!(
                "UTC offset out of range: {} minutes",
                trading.utc_offset_minutes
            )));
        };
        let controller = TradeController::new(chrono::Duration::seconds(trading.cooldown_secs));
        let notifier = Notifier::new(sink, Duration::from_secs(trading.notify_interval_secs));
        let db = Database::new(&config.database_url).await?;

        Ok(Self {
            config,
            symbols,
            broker,
            notifier,
            db,
            controller,
            calendar,
            states: HashMap::new(),
            start_prices: HashMap::new(),
            current_day: None,
            last_summary_at: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self, symbol: &str) -> Option<&TradeState> {
        self.states.get(symbol)
    }

    pub fn start_price(&self, symbol: &str) -> Option<Decimal> {
        self.start_prices.get(symbol).copied()
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn notifier(&self) -> &Notifier<S> {
        &self.notifier
    }

    /// Initialize bot state from database or fresh start.
    pub async fn initialize(&mut self) -> Result<()> {
        self.initialize_at(Utc::now()).await
    }

    pub async fn initialize_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        info!("Initializing bot...");

        let day = self.calendar.trading_day(now);
        let mut resumed = 0;
        let mut missing = Vec::new();

        for config in self.symbols.clone() {
            let state = match self.db.load_trade_state(&config.symbol, day).await {
                Ok(Some(state)) => {
                    resumed += 1;
                    info!(
                        symbol = %config.symbol,
                        position = state.position.name(),
                        trades_today = state.trades_today,
                        "Resuming trade state"
                    );
                    state
                }
                Ok(None) => TradeState::new(config.symbol.clone(), day),
                Err(e) => {
                    warn!(symbol = %config.symbol, error = %e, "Discarding stored trade state");
                    TradeState::new(config.symbol.clone(), day)
                }
            };
            self.states.insert(config.symbol.clone(), state);

            match self.db.get_start_price(&config.symbol, day).await? {
                Some(price) => {
                    self.start_prices.insert(config.symbol.clone(), price);
                }
                None => missing.push(config.symbol.clone()),
            }
        }

        // Symbols retry side by side so one missing bar doesn't hold up the rest
        let fetched = join_all(missing.iter().map(|symbol| self.fetch_reference(symbol, now))).await;
        for (symbol, result) in missing.iter().zip(fetched) {
            match result {
                Ok(price) => self.store_start_price(symbol, price, now).await,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Start price unavailable");
                    self.notifier
                        .send_limited(&price_key(symbol), &format::price_unavailable(symbol, &e))
                        .await;
                }
            }
        }

        self.current_day = Some(day);

        info!(
            symbols = self.symbols.len(),
            resumed,
            trading_day = %day,
            "Bot initialized"
        );

        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            poll_interval = self.config.poll_interval_secs,
            summary_interval = self.config.summary_interval_secs,
            "Starting bot run loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut summary_interval =
            interval(Duration::from_secs(self.config.summary_interval_secs.max(1)));
        // The first tick completes immediately.
        summary_interval.tick().await;

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Error in bot tick");
                    }
                }
                _ = summary_interval.tick() => {
                    self.send_summary().await;
                }
            }
        }

        // Graceful shutdown
        self.shutdown().await?;

        Ok(())
    }

    /// Single iteration of the main loop.
    pub async fn tick(&mut self) -> Result<()> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        debug!("Bot tick");

        // 1. Roll over to a new trading day
        let rolled_over = self
            .current_day
            .map_or(true, |day| self.calendar.is_new_day(day, now));
        if rolled_over {
            self.daily_reset(self.calendar.trading_day(now), now).await;
        }

        // 2. Fetch every price; failures stay per symbol
        let prices = join_all(
            self.symbols
                .iter()
                .map(|config| self.broker.get_current_price(&config.symbol)),
        )
        .await;

        // 3. Evaluate symbols
        for (idx, price) in prices.into_iter().enumerate() {
            let config = self.symbols[idx].clone();
            self.evaluate_symbol(&config, price, now).await;
        }

        Ok(())
    }

    /// Run one symbol through the engine and controller.
    async fn evaluate_symbol(
        &mut self,
        config: &SymbolConfig,
        price: TradeResult<PricePoint>,
        now: DateTime<Utc>,
    ) {
        let symbol = config.symbol.as_str();

        let point = match price {
            Ok(point) => point,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Skipping tick");
                self.notifier
                    .send_limited(&price_key(symbol), &format::price_unavailable(symbol, &e))
                    .await;
                return;
            }
        };

        let start = match self.start_prices.get(symbol).copied() {
            Some(start) => start,
            None => match self.broker.get_reference_bar(symbol, self.calendar.reference_time(now), 1).await {
                Ok(start) => {
                    self.store_start_price(symbol, start, now).await;
                    start
                }
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Still no start price");
                    self.notifier
                        .send_limited(&price_key(symbol), &format::price_unavailable(symbol, &e))
                        .await;
                    return;
                }
            },
        };

        let result = match compute(start, point.price, config) {
            Ok(result) => result,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Skipping tick");
                return;
            }
        };

        let day = self.calendar.trading_day(now);
        let mut state = self
            .states
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| TradeState::new(symbol, day));
        state.last_price = Some(point.price);

        debug!(
            symbol = %symbol,
            price = %point.price,
            pips = %result.pip_difference,
            direction = %result.direction,
            crossed = result.thresholds_crossed,
            "Evaluated"
        );

        if self.config.trading_config.direction_alerts {
            self.direction_alert(config, &mut state, start, point.price, &result)
                .await;
        }

        let decision = self
            .controller
            .decide(config, &state, &result, point.price, now);

        if !decision.is_noop() {
            if let Some(transition) = self.execute(config, &decision, &result, point.price).await {
                let before = state.position.name();
                self.controller.apply(&mut state, &transition, now);
                if before != state.position.name() {
                    info!(
                        symbol = %symbol,
                        from = before,
                        to = state.position.name(),
                        trades_today = state.trades_today,
                        "Position state changed"
                    );
                }
                if let Err(e) = self.db.save_trade_state(&state).await {
                    warn!(symbol = %symbol, error = %e, "Failed to persist trade state");
                }
            }
        }

        self.states.insert(symbol.to_string(), state);
    }

    /// Alert when the symbol enters a new threshold band.
    async fn direction_alert(
        &self,
        config: &SymbolConfig,
        state: &mut TradeState,
        start: Decimal,
        current: Decimal,
        result: &ThresholdResult,
    ) {
        let band = band_direction(result.pip_difference, config);
        if state.last_alert_direction == Some(band) {
            return;
        }
        state.last_alert_direction = Some(band);
        if band == Direction::Neutral {
            return;
        }

        let text = format::direction_alert(
            &config.symbol,
            start,
            current,
            result.pip_difference,
            band,
        );
        self.notifier
            .send_limited(&format!("{}:alert", config.symbol), &text)
            .await;
    }

    /// Run a decision's actions. Returns the transition to apply, or `None`
    /// when the broker refused and the state must stay as it is.
    async fn execute(
        &self,
        config: &SymbolConfig,
        decision: &Decision,
        result: &ThresholdResult,
        price: Decimal,
    ) -> Option<Transition> {
        let mut hedges_requested = 0u32;
        let mut hedges_placed = 0u32;
        let mut hedge_side = None;

        for action in &decision.actions {
            match action {
                Action::OpenTrade { side, volume } => {
                    if !self.open_trade(config, *side, *volume, result).await {
                        return None;
                    }
                }
                Action::CloseTrade { reason } => {
                    match self.close_all(config, *reason, result).await {
                        CloseOutcome::Closed => {}
                        CloseOutcome::Partial => {
                            return Some(Transition::CloseIncomplete { reason: *reason })
                        }
                        CloseOutcome::Rejected => return None,
                    }
                }
                Action::HedgeTrade { side, volume } => {
                    hedges_requested += 1;
                    hedge_side = Some(*side);
                    if self.place_hedge(config, *side, *volume, result).await {
                        hedges_placed += 1;
                    }
                }
            }
        }

        match &decision.transition {
            Transition::Hedge {
                hedge_entry_price, ..
            } => {
                if hedges_placed == 0 {
                    return None;
                }
                if let Some(side) = hedge_side {
                    self.notifier
                        .send(&format::hedge_placed(
                            &config.symbol,
                            side,
                            hedges_placed,
                            hedges_requested,
                            price,
                        ))
                        .await;
                }
                Some(Transition::Hedge {
                    hedge_entry_price: *hedge_entry_price,
                    hedges: hedges_placed,
                })
            }
            other => Some(other.clone()),
        }
    }

    async fn open_trade(
        &self,
        config: &SymbolConfig,
        side: TradeSide,
        volume: Decimal,
        result: &ThresholdResult,
    ) -> bool {
        let symbol = config.symbol.as_str();
        match self
            .broker
            .submit_market_order(symbol, side, volume, "pipwatch open")
            .await
        {
            Ok(ticket) => {
                info!(
                    symbol = %symbol,
                    side = %side,
                    volume = %volume,
                    ticket = ticket.ticket,
                    pips = %result.pip_difference,
                    "Trade opened"
                );
                self.record(NewTradeEvent {
                    symbol,
                    kind: "open",
                    side: Some(side.as_str()),
                    price: ticket.price,
                    pip_difference: Some(result.pip_difference),
                    ticket: Some(ticket.ticket),
                    status: "executed",
                    ..Default::default()
                })
                .await;
                self.notifier
                    .send(&format::trade_opened(
                        &ticket,
                        result.pip_difference,
                        result.thresholds_crossed,
                    ))
                    .await;
                true
            }
            Err(e) => {
                self.action_failed(symbol, "open", Some(side), None, result, &e)
                    .await;
                false
            }
        }
    }

    /// Close every open position for the symbol. A refused ticket does not
    /// stop the others from being tried.
    async fn close_all(
        &self,
        config: &SymbolConfig,
        reason: CloseReason,
        result: &ThresholdResult,
    ) -> CloseOutcome {
        let symbol = config.symbol.as_str();
        let positions = match self.broker.list_open_positions(symbol).await {
            Ok(positions) => positions,
            Err(e) => {
                self.action_failed(symbol, "close", None, Some(reason), result, &e)
                    .await;
                return CloseOutcome::Rejected;
            }
        };

        let mut closed = 0;
        let mut refused = 0;
        for position in &positions {
            if let Err(e) = self.broker.close_position(position.ticket).await {
                refused += 1;
                self.action_failed(symbol, "close", Some(position.side), Some(reason), result, &e)
                    .await;
                continue;
            }
            closed += 1;
            self.record(NewTradeEvent {
                symbol,
                kind: "close",
                side: Some(position.side.as_str()),
                reason: Some(reason.as_str()),
                pip_difference: Some(result.pip_difference),
                ticket: Some(position.ticket),
                status: "executed",
                ..Default::default()
            })
            .await;
        }

        if refused > 0 {
            warn!(symbol = %symbol, reason = %reason, closed, refused, "Close incomplete");
            return if closed == 0 {
                CloseOutcome::Rejected
            } else {
                CloseOutcome::Partial
            };
        }

        info!(
            symbol = %symbol,
            reason = %reason,
            closed,
            pips = %result.pip_difference,
            "Positions closed"
        );
        self.notifier
            .send(&format::trade_closed(
                symbol,
                reason,
                closed,
                result.pip_difference,
            ))
            .await;
        CloseOutcome::Closed
    }

    async fn place_hedge(
        &self,
        config: &SymbolConfig,
        side: TradeSide,
        volume: Decimal,
        result: &ThresholdResult,
    ) -> bool {
        let symbol = config.symbol.as_str();
        match self
            .broker
            .submit_market_order(symbol, side, volume, "pipwatch hedge")
            .await
        {
            Ok(ticket) => {
                info!(symbol = %symbol, side = %side, ticket = ticket.ticket, "Hedge placed");
                self.record(NewTradeEvent {
                    symbol,
                    kind: "hedge",
                    side: Some(side.as_str()),
                    price: ticket.price,
                    pip_difference: Some(result.pip_difference),
                    ticket: Some(ticket.ticket),
                    status: "executed",
                    ..Default::default()
                })
                .await;
                true
            }
            Err(e) => {
                self.action_failed(symbol, "hedge", Some(side), None, result, &e)
                    .await;
                false
            }
        }
    }

    async fn action_failed(
        &self,
        symbol: &str,
        kind: &str,
        side: Option<TradeSide>,
        reason: Option<CloseReason>,
        result: &ThresholdResult,
        err: &TradeError,
    ) {
        error!(symbol = %symbol, action = kind, error = %err, "Broker action failed");
        self.record(NewTradeEvent {
            symbol,
            kind,
            side: side.map(|s| s.as_str()),
            reason: reason.map(|r| r.as_str()),
            pip_difference: Some(result.pip_difference),
            status: "failed",
            message: Some(err.to_string()),
            ..Default::default()
        })
        .await;
        self.notifier
            .send_limited(
                &format!("{}:action", symbol),
                &format::action_failed(symbol, kind, err),
            )
            .await;
    }

    async fn record(&self, event: NewTradeEvent<'_>) {
        if let Err(e) = self.db.record_event(&event).await {
            warn!(symbol = %event.symbol, error = %e, "Failed to record trade event");
        }
    }

    /// Fetch a symbol's reference price, retrying with exponential backoff.
    async fn fetch_reference(&self, symbol: &str, now: DateTime<Utc>) -> TradeResult<Decimal> {
        let reference_time = self.calendar.reference_time(now);
        let trading = &self.config.trading_config;
        let max_attempts = trading.reference_retries.max(1);

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(trading.reference_retry_delay_secs))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let broker = &self.broker;
        let mut attempt = 0u32;
        backoff::future::retry(policy, || {
            attempt += 1;
            let this_attempt = attempt;
            async move {
                match broker.get_reference_bar(symbol, reference_time, 1).await {
                    Ok(price) => Ok(price),
                    Err(e) if this_attempt >= max_attempts => Err(backoff::Error::permanent(e)),
                    Err(e) => {
                        warn!(symbol = %symbol, attempt = this_attempt, error = %e, "Reference fetch failed, retrying");
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        })
        .await
    }

    async fn store_start_price(&mut self, symbol: &str, price: Decimal, now: DateTime<Utc>) {
        let day = self.calendar.trading_day(now);
        let reference_time = self.calendar.reference_time(now);

        info!(symbol = %symbol, price = %price, trading_day = %day, "Start price set");
        self.start_prices.insert(symbol.to_string(), price);
        if let Err(e) = self
            .db
            .save_start_price(symbol, day, price, reference_time)
            .await
        {
            warn!(symbol = %symbol, error = %e, "Failed to persist start price");
        }
    }

    /// Reset every symbol for a new trading day and refresh reference prices.
    ///
    /// References get one concurrent attempt here; a symbol still missing one
    /// is retried by the following ticks. Broker positions are left alone and
    /// the notification lists any still open.
    async fn daily_reset(&mut self, day: NaiveDate, now: DateTime<Utc>) {
        info!(
            trading_day = %day,
            next_rollover = %self.calendar.next_rollover(now),
            "New trading day"
        );

        self.start_prices.clear();
        let mut starts = Vec::new();
        let mut open_tickets = Vec::new();

        for config in self.symbols.clone() {
            let symbol = config.symbol.as_str();
            let mut state = self
                .states
                .remove(symbol)
                .unwrap_or_else(|| TradeState::new(symbol, day));
            state.reset_for_day(day);
            if let Err(e) = self.db.save_trade_state(&state).await {
                warn!(symbol = %symbol, error = %e, "Failed to persist trade state");
            }
            self.states.insert(symbol.to_string(), state);
        }

        let reference_time = self.calendar.reference_time(now);
        let fetched = join_all(
            self.symbols
                .iter()
                .map(|config| self.broker.get_reference_bar(&config.symbol, reference_time, 1)),
        )
        .await;

        let symbols = self.symbols.clone();
        for (config, result) in symbols.iter().zip(fetched) {
            let symbol = config.symbol.as_str();
            let start = match result {
                Ok(price) => {
                    self.store_start_price(symbol, price, now).await;
                    Some(price)
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Start price unavailable");
                    None
                }
            };
            starts.push((symbol.to_string(), start));

            match self.broker.list_open_positions(symbol).await {
                Ok(positions) => {
                    open_tickets.extend(positions.into_iter().map(|p| (p.symbol, p.ticket)))
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Could not list open positions"),
            }
        }

        self.current_day = Some(day);
        self.notifier
            .send(&format::daily_reset(day, &starts, &open_tickets))
            .await;
    }

    /// Send the periodic summary built from cached state.
    pub async fn send_summary(&mut self) {
        let text = {
            let lines: Vec<format::SummaryLine<'_>> = self
                .symbols
                .iter()
                .map(|config| {
                    let state = self.states.get(&config.symbol);
                    let start_price = self.start_prices.get(&config.symbol).copied();
                    let current_price = state.and_then(|s| s.last_price);
                    let result = match (start_price, current_price) {
                        (Some(start), Some(current)) => compute(start, current, config).ok(),
                        _ => None,
                    };
                    format::SummaryLine {
                        config,
                        start_price,
                        current_price,
                        direction: result
                            .as_ref()
                            .map(|r| r.direction)
                            .unwrap_or(Direction::Neutral),
                        thresholds_crossed: result.as_ref().map(|r| r.thresholds_crossed).unwrap_or(0),
                        pip_difference: result.as_ref().map(|r| r.pip_difference),
                        trade_open: state.map(|s| s.trade_placed()).unwrap_or(false),
                    }
                })
                .collect();
            format::summary(&lines)
        };

        if self.notifier.send(&text).await {
            self.last_summary_at = Some(Utc::now());
        }
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bot...");

        // Final state save
        for state in self.states.values() {
            self.db.save_trade_state(state).await?;
        }

        info!(stats = %self.get_stats().await, "Bot shutdown complete");
        Ok(())
    }

    /// Get current stats.
    pub async fn get_stats(&self) -> BotStats {
        let (total_events, executed, failed) =
            self.db.get_event_stats().await.unwrap_or((0, 0, 0));

        BotStats {
            symbols: self.symbols.len(),
            open_positions: self.states.values().filter(|s| s.trade_placed()).count(),
            trades_today: self.states.values().map(|s| s.trades_today).sum(),
            total_events,
            executed_events: executed,
            failed_events: failed,
            trading_day: self.current_day,
            last_summary_at: self.last_summary_at,
            is_running: !self.shutdown.load(Ordering::SeqCst),
            dry_run: self.config.dry_run,
        }
    }
}

fn price_key(symbol: &str) -> String {
    format!("{}:price", symbol)
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub symbols: usize,
    pub open_positions: usize,
    pub trades_today: u32,
    pub total_events: i64,
    pub executed_events: i64,
    pub failed_events: i64,
    pub trading_day: Option<NaiveDate>,
    pub last_summary_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub dry_run: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "symbols={} open={} trades_today={} events={} (executed {}, failed {}) day={} last_summary={} {}{}",
            self.symbols,
            self.open_positions,
            self.trades_today,
            self.total_events,
            self.executed_events,
            self.failed_events,
            self.trading_day
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.last_summary_at
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            if self.is_running { "running" } else { "stopped" },
            if self.dry_run { " (dry run)" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperBroker;
    use crate::models::{OpenPosition, OrderTicket, PositionState};
    use crate::notify::MemorySink;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;

    /// Paper broker that refuses one order and/or one close, counted from 1.
    struct FlakyBroker {
        inner: PaperBroker,
        orders: AtomicU32,
        closes: AtomicU32,
        reject_order: Option<u32>,
        reject_close: Option<u32>,
    }

    impl FlakyBroker {
        async fn new(reject_order: Option<u32>, reject_close: Option<u32>) -> Self {
            let inner = PaperBroker::new();
            inner.set_reference("EURUSD", dec!(1.09680)).await;
            Self {
                inner,
                orders: AtomicU32::new(0),
                closes: AtomicU32::new(0),
                reject_order,
                reject_close,
            }
        }
    }

    impl Broker for FlakyBroker {
        async fn get_current_price(&self, symbol: &str) -> TradeResult<PricePoint> {
            self.inner.get_current_price(symbol).await
        }

        async fn get_reference_bar(
            &self,
            symbol: &str,
            from: DateTime<Utc>,
            count: u32,
        ) -> TradeResult<Decimal> {
            self.inner.get_reference_bar(symbol, from, count).await
        }

        async fn submit_market_order(
            &self,
            symbol: &str,
            side: TradeSide,
            volume: Decimal,
            comment: &str,
        ) -> TradeResult<OrderTicket> {
            let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reject_order == Some(n) {
                return Err(TradeError::OrderRejected {
                    symbol: symbol.to_string(),
                    code: 10006,
                    message: "rejected".to_string(),
                });
            }
            self.inner
                .submit_market_order(symbol, side, volume, comment)
                .await
        }

        async fn close_position(&self, ticket: u64) -> TradeResult<()> {
            let n = self.closes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reject_close == Some(n) {
                return Err(TradeError::CloseRejected {
                    ticket,
                    code: 10006,
                    message: "rejected".to_string(),
                });
            }
            self.inner.close_position(ticket).await
        }

        async fn list_open_positions(&self, symbol: &str) -> TradeResult<Vec<OpenPosition>> {
            self.inner.list_open_positions(symbol).await
        }
    }

    /// EURUSD with a wide target and stop so a position can escalate and hedge.
    fn hedging_eurusd() -> SymbolConfig {
        let mut config = eurusd();
        config.close_trade_at = dec!(50);
        config.close_trade_at_opposite_direction = dec!(40);
        config
    }

    async fn flaky_bot(broker: FlakyBroker) -> Bot<FlakyBroker, MemorySink> {
        let mut bot = Bot::new(test_config(), vec![hedging_eurusd()], broker, MemorySink::new())
            .await
            .unwrap();
        bot.initialize_at(tuesday()).await.unwrap();
        bot
    }

    async fn flaky_tick(bot: &mut Bot<FlakyBroker, MemorySink>, price: Decimal, now: DateTime<Utc>) {
        bot.broker().inner.set_price("EURUSD", price, now).await;
        bot.tick_at(now).await.unwrap();
    }

    /// Open at 15 pips, peak at 30, then fall back to 7 pips and hedge.
    async fn drive_to_hedge(bot: &mut Bot<FlakyBroker, MemorySink>) {
        let now = tuesday();
        flaky_tick(bot, dec!(1.09830), now).await;
        flaky_tick(bot, dec!(1.09980), now + chrono::Duration::seconds(1)).await;
        flaky_tick(bot, dec!(1.09750), now + chrono::Duration::seconds(2)).await;
    }

    fn eurusd() -> SymbolConfig {
        SymbolConfig::new("EURUSD", dec!(0.0001), dec!(15), dec!(10), dec!(8))
    }

    fn test_config() -> BotConfig {
        BotConfig {
            database_url: "sqlite::memory:".to_string(),
            trading_config: TradingConfig {
                reference_retries: 1,
                reference_retry_delay_secs: 0,
                ..TradingConfig::default()
            },
            ..BotConfig::default()
        }
    }

    // Tuesday 2024-03-05 10:00 UTC, 15:30 in the default offset.
    fn tuesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
    }

    async fn eurusd_bot() -> Bot<PaperBroker, MemorySink> {
        let broker = PaperBroker::new();
        broker.set_reference("EURUSD", dec!(1.09680)).await;
        let mut bot = Bot::new(test_config(), vec![eurusd()], broker, MemorySink::new())
            .await
            .unwrap();
        bot.initialize_at(tuesday()).await.unwrap();
        bot
    }

    async fn tick_with(bot: &mut Bot<PaperBroker, MemorySink>, price: Decimal, now: DateTime<Utc>) {
        bot.broker().set_price("EURUSD", price, now).await;
        bot.tick_at(now).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_when_no_valid_symbols() {
        let bad = SymbolConfig::new("EURUSD", dec!(0), dec!(15), dec!(10), dec!(8));
        let result = Bot::new(test_config(), vec![bad], PaperBroker::new(), MemorySink::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_then_target_close() {
        let mut bot = eurusd_bot().await;
        assert_eq!(bot.start_price("EURUSD"), Some(dec!(1.09680)));
        let now = tuesday();

        tick_with(&mut bot, dec!(1.09695), now).await;
        assert_eq!(bot.state("EURUSD").unwrap().position, PositionState::Flat);

        tick_with(&mut bot, dec!(1.09830), now + chrono::Duration::seconds(1)).await;
        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.direction(), Some(TradeSide::Buy));
        assert_eq!(state.entry_pip_difference(), Some(dec!(15)));
        assert_eq!(state.trades_today, 1);
        assert_eq!(bot.broker().positions().await.len(), 1);

        tick_with(&mut bot, dec!(1.09930), now + chrono::Duration::seconds(2)).await;
        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.position, PositionState::Flat);
        assert!(bot.broker().positions().await.is_empty());

        let messages = bot.notifier().sink().messages();
        assert!(messages.iter().any(|m| m.starts_with("**EURUSD ↑**")));
        assert!(messages.iter().any(|m| m.starts_with("**EURUSD BUY opened**")));
        assert!(messages.iter().any(|m| m.contains("target reached")));

        let stats = bot.get_stats().await;
        assert_eq!(stats.executed_events, 2);
        assert_eq!(stats.failed_events, 0);
    }

    #[tokio::test]
    async fn test_rejected_order_leaves_state() {
        let mut bot = eurusd_bot().await;
        let now = tuesday();

        bot.broker().set_reject_orders(true);
        tick_with(&mut bot, dec!(1.09830), now).await;
        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.position, PositionState::Flat);
        assert_eq!(state.trades_today, 0);
        assert!(bot
            .notifier()
            .sink()
            .messages()
            .iter()
            .any(|m| m.contains("open failed")));

        // Next tick re-attempts naturally.
        bot.broker().set_reject_orders(false);
        tick_with(&mut bot, dec!(1.09830), now + chrono::Duration::seconds(1)).await;
        assert_eq!(bot.state("EURUSD").unwrap().trades_today, 1);
    }

    #[tokio::test]
    async fn test_rejected_close_leaves_position_open() {
        let mut bot = eurusd_bot().await;
        let now = tuesday();

        tick_with(&mut bot, dec!(1.09830), now).await;
        assert!(bot.state("EURUSD").unwrap().trade_placed());

        bot.broker().set_reject_orders(true);
        tick_with(&mut bot, dec!(1.09930), now + chrono::Duration::seconds(1)).await;
        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.position.name(), "open");
        assert_eq!(bot.broker().positions().await.len(), 1);
        assert!(bot
            .notifier()
            .sink()
            .messages()
            .iter()
            .any(|m| m.contains("close failed")));

        bot.broker().set_reject_orders(false);
        tick_with(&mut bot, dec!(1.09930), now + chrono::Duration::seconds(2)).await;
        assert_eq!(bot.state("EURUSD").unwrap().position, PositionState::Flat);
        assert!(bot.broker().positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_hedge_then_resolve_closes_everything() {
        let mut bot = flaky_bot(FlakyBroker::new(None, None).await).await;
        drive_to_hedge(&mut bot).await;

        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.hedge_entry_price(), Some(dec!(1.09750)));
        assert!(matches!(state.position, PositionState::Hedged { hedges: 3, .. }));
        assert_eq!(bot.broker().inner.positions().await.len(), 4);

        // 15 pips above the hedge entry
        flaky_tick(&mut bot, dec!(1.09900), tuesday() + chrono::Duration::seconds(3)).await;
        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.position, PositionState::Flat);
        assert!(state.cooldown_until.is_none());
        assert!(bot.broker().inner.positions().await.is_empty());
        assert!(bot
            .notifier()
            .sink()
            .messages()
            .iter()
            .any(|m| m.contains("hedge resolved")));
    }

    #[tokio::test]
    async fn test_partial_hedge_counts_placed_orders() {
        // Order 1 opens, order 3 is the second hedge
        let mut bot = flaky_bot(FlakyBroker::new(Some(3), None).await).await;
        drive_to_hedge(&mut bot).await;

        let state = bot.state("EURUSD").unwrap();
        assert!(matches!(state.position, PositionState::Hedged { hedges: 2, .. }));
        assert_eq!(bot.broker().inner.positions().await.len(), 3);
        assert!(bot
            .notifier()
            .sink()
            .messages()
            .iter()
            .any(|m| m.contains("hedge failed")));
    }

    #[tokio::test]
    async fn test_incomplete_close_retries_next_tick() {
        let mut bot = flaky_bot(FlakyBroker::new(None, Some(2)).await).await;
        drive_to_hedge(&mut bot).await;

        flaky_tick(&mut bot, dec!(1.09900), tuesday() + chrono::Duration::seconds(3)).await;
        let state = bot.state("EURUSD").unwrap();
        assert_eq!(
            state.position,
            PositionState::Closing {
                direction: TradeSide::Buy,
                entry_pip_difference: dec!(15),
                reason: CloseReason::HedgeResolved,
            }
        );
        assert_eq!(bot.broker().inner.positions().await.len(), 1);

        // Back at the hedge price, where a hedged position would hold
        flaky_tick(&mut bot, dec!(1.09750), tuesday() + chrono::Duration::seconds(4)).await;
        assert_eq!(bot.state("EURUSD").unwrap().position, PositionState::Flat);
        assert!(bot.broker().inner.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_reference_does_not_stall_rollover() {
        let config = BotConfig {
            trading_config: TradingConfig {
                reference_retries: 2,
                reference_retry_delay_secs: 1,
                ..TradingConfig::default()
            },
            ..test_config()
        };
        let gbpusd = SymbolConfig::new("GBPUSD", dec!(0.0001), dec!(15), dec!(10), dec!(8));
        let broker = PaperBroker::new();
        broker.set_reference("EURUSD", dec!(1.09680)).await;
        let mut bot = Bot::new(config, vec![eurusd(), gbpusd], broker, MemorySink::new())
            .await
            .unwrap();
        bot.initialize_at(tuesday()).await.unwrap();
        assert_eq!(bot.start_price("GBPUSD"), None);

        let tomorrow = tuesday() + chrono::Duration::days(1);
        let started = std::time::Instant::now();
        tick_with(&mut bot, dec!(1.09830), tomorrow).await;
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(bot.state("EURUSD").unwrap().trades_today, 1);
        assert_eq!(bot.start_price("GBPUSD"), None);
    }

    #[test]
    fn test_broker_timeout_from_config() {
        assert_eq!(BotConfig::default().broker_timeout(), Duration::from_secs(10));
        let config = BotConfig {
            broker_timeout_secs: 0,
            ..BotConfig::default()
        };
        assert_eq!(config.broker_timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_price_is_skipped_and_rate_limited() {
        let mut bot = eurusd_bot().await;
        let now = tuesday();

        bot.tick_at(now).await.unwrap();
        bot.tick_at(now + chrono::Duration::seconds(1)).await.unwrap();

        let unavailable = bot
            .notifier()
            .sink()
            .messages()
            .iter()
            .filter(|m| m.contains("price unavailable"))
            .count();
        assert_eq!(unavailable, 1);
        assert_eq!(bot.state("EURUSD").unwrap().position, PositionState::Flat);
    }

    #[tokio::test]
    async fn test_daily_reset_flattens_state() {
        let mut bot = eurusd_bot().await;
        let now = tuesday();

        tick_with(&mut bot, dec!(1.09830), now).await;
        assert_eq!(bot.state("EURUSD").unwrap().trades_today, 1);

        let tomorrow = now + chrono::Duration::days(1);
        tick_with(&mut bot, dec!(1.09680), tomorrow).await;

        let state = bot.state("EURUSD").unwrap();
        assert_eq!(state.position, PositionState::Flat);
        assert_eq!(state.trades_today, 0);
        assert_eq!(state.trading_day, NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());

        let messages = bot.notifier().sink().messages();
        let reset = messages
            .iter()
            .find(|m| m.starts_with("**New trading day 2024-03-06**"))
            .unwrap();
        assert!(reset.contains("EURUSD #1"));
    }

    #[tokio::test]
    async fn test_summary_uses_cached_prices() {
        let mut bot = eurusd_bot().await;
        tick_with(&mut bot, dec!(1.09780), tuesday()).await;

        bot.send_summary().await;
        let messages = bot.notifier().sink().messages();
        let summary = messages.last().unwrap();
        assert!(summary.contains("**Pip Difference:** **10**"));
        assert!(summary.contains("**Pips to Positive Threshold:** 5"));
        let stats = bot.get_stats().await;
        assert!(stats.last_summary_at.is_some());
        assert!(!stats.to_string().contains("last_summary=-"));
    }
}
