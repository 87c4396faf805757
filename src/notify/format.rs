//! Message text for every notification the bot sends.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::TradeError;
use crate::models::{OrderTicket, SymbolConfig, TradeSide};
use crate::trading::threshold::{pips_to_negative_threshold, pips_to_positive_threshold};
use crate::trading::{CloseReason, Direction};

fn pips(value: Decimal) -> Decimal {
    value.round_dp(1).normalize()
}

pub fn trade_opened(ticket: &OrderTicket, pip_difference: Decimal, thresholds: u32) -> String {
    let price = ticket
        .price
        .map(|p| p.to_string())
        .unwrap_or_else(|| "market".to_string());
    format!(
        "**{} {} opened**\nTicket: {}\nVolume: {}\nPrice: {}\nPip Difference: {} ({} threshold{})",
        ticket.symbol,
        ticket.side.as_str().to_uppercase(),
        ticket.ticket,
        ticket.volume,
        price,
        pips(pip_difference),
        thresholds,
        if thresholds == 1 { "" } else { "s" },
    )
}

pub fn trade_closed(
    symbol: &str,
    reason: CloseReason,
    closed: usize,
    pip_difference: Decimal,
) -> String {
    let headline = match reason {
        CloseReason::Target => "target reached",
        CloseReason::StopLoss => "stop-loss hit",
        CloseReason::HedgeResolved => "hedge resolved",
    };
    format!(
        "**{} closed: {}**\nPositions closed: {}\nPip Difference: {}",
        symbol,
        headline,
        closed,
        pips(pip_difference)
    )
}

pub fn hedge_placed(
    symbol: &str,
    side: TradeSide,
    placed: u32,
    requested: u32,
    price: Decimal,
) -> String {
    format!(
        "**{} hedged**\n{} {} order(s) placed ({} requested) at {}",
        symbol,
        placed,
        side.as_str().to_uppercase(),
        requested,
        price
    )
}

/// Broker refused or failed an action.
pub fn action_failed(symbol: &str, action: &str, err: &TradeError) -> String {
    format!("**{} {} failed**\n{}", symbol, action, err)
}

pub fn price_unavailable(symbol: &str, err: &TradeError) -> String {
    format!("**{} price unavailable**\n{}", symbol, err)
}

/// Alert sent when a symbol moves into its threshold band.
pub fn direction_alert(
    symbol: &str,
    start_price: Decimal,
    current_price: Decimal,
    pip_difference: Decimal,
    direction: Direction,
) -> String {
    format!(
        "**{} {}**\n\n**Start Price:** **{}**\n**Current Price:** **{}**\n**Pip Difference:** **{}**\n**Direction:** {} {}",
        symbol,
        direction.arrow(),
        start_price,
        current_price,
        pips(pip_difference),
        direction.arrow(),
        direction,
    )
}

/// One symbol's block in the periodic summary.
#[derive(Debug, Clone)]
pub struct SummaryLine<'a> {
    pub config: &'a SymbolConfig,
    pub start_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub direction: Direction,
    pub thresholds_crossed: u32,
    pub pip_difference: Option<Decimal>,
    pub trade_open: bool,
}

pub fn summary(lines: &[SummaryLine<'_>]) -> String {
    let mut out = String::from("**Hourly Update**");
    for line in lines {
        let fmt_price = |p: Option<Decimal>| {
            p.map(|p| p.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        };
        out.push_str(&format!(
            "\n\n**Symbol:** {}\n**Start Price:** **{}**\n**Current Price:** **{}**",
            line.config.symbol,
            fmt_price(line.start_price),
            fmt_price(line.current_price),
        ));
        match line.pip_difference {
            Some(pd) => out.push_str(&format!(
                "\n**Pip Difference:** **{}**\n**Direction:** {} {}\n**Thresholds:** {}\n**Trade Open:** {}\n**Pips to Positive Threshold:** {}\n**Pips to Negative Threshold:** {}",
                pips(pd),
                line.direction.arrow(),
                line.direction,
                line.thresholds_crossed,
                line.trade_open,
                pips(pips_to_positive_threshold(pd, line.config)),
                pips(pips_to_negative_threshold(pd, line.config)),
            )),
            None => out.push_str(&format!("\n**Trade Open:** {}", line.trade_open)),
        }
    }
    out
}

pub fn daily_reset(
    day: NaiveDate,
    start_prices: &[(String, Option<Decimal>)],
    open_tickets: &[(String, u64)],
) -> String {
    let mut out = format!("**New trading day {}**", day);
    for (symbol, price) in start_prices {
        match price {
            Some(p) => out.push_str(&format!("\n{}: start price {}", symbol, p)),
            None => out.push_str(&format!("\n{}: start price unavailable", symbol)),
        }
    }
    if !open_tickets.is_empty() {
        let tickets: Vec<String> = open_tickets
            .iter()
            .map(|(symbol, ticket)| format!("{} #{}", symbol, ticket))
            .collect();
        out.push_str(&format!(
            "\nStill open at the broker: {}",
            tickets.join(", ")
        ));
    }
    out
}
