//! pipwatch: pip-threshold trading bot
//!
//! Watches FX and metal symbols against their daily reference price, opens a
//! position when a configured pip threshold is crossed, and closes or hedges
//! it as the move develops. Every action is reported to a Discord webhook.

mod api;
mod bot;
mod db;
mod error;
mod models;
mod notify;
mod replay;
mod trading;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{BridgeClient, Broker, PaperBroker};
use crate::bot::{Bot, BotConfig};
use crate::db::Database;
use crate::models::{default_symbols, load_symbols, SymbolConfig};
use crate::notify::DiscordWebhook;
use crate::replay::{parse_prices, ReplayConfig, Replayer};
use crate::trading::threshold::{pips_to_negative_threshold, pips_to_positive_threshold};
use crate::trading::{compute, TradingCalendar, TradingConfig};

/// Pip-threshold trading bot CLI.
#[derive(Parser)]
#[command(name = "pipwatch")]
#[command(about = "Trade daily pip-threshold crossings through an MT5 bridge", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./pipwatch.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON file with symbol configs (built-in defaults when omitted)
    #[arg(short, long, env = "PIPWATCH_SYMBOLS")]
    symbols: Option<PathBuf>,

    /// MT5 bridge base URL
    #[arg(long, env = "MT5_BRIDGE_URL", default_value = "http://127.0.0.1:8081")]
    bridge_url: String,

    /// Discord webhook URL (messages are only logged when unset)
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Timeout for broker and webhook requests in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// UTC offset of the trading day in minutes
    #[arg(long, default_value = "330", allow_hyphen_values = true)]
    utc_offset: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading bot
    Run {
        /// Polling interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,

        /// Summary notification interval in seconds
        #[arg(long, default_value = "3600")]
        summary_interval: u64,

        /// Pause on new trades after a stop-loss, in seconds
        #[arg(long, default_value = "60")]
        cooldown: i64,

        /// Dry run (live prices, paper orders)
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch reference and current prices once and show threshold status
    Check,

    /// Show current configuration
    Config,

    /// Show persisted trade states and recent actions
    Status {
        /// Number of recent actions to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Replay a price sequence through the bot with a paper broker
    Replay {
        /// Symbol to replay (must be in the symbol configs)
        #[arg(long)]
        symbol: String,

        /// Reference (start) price
        #[arg(long)]
        start: Decimal,

        /// Comma-separated prices, one per tick
        #[arg(long)]
        prices: String,

        /// Seconds between ticks
        #[arg(long, default_value = "1")]
        step: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let symbols = symbol_configs(cli.symbols.as_deref())?;
    let trading_config = TradingConfig {
        utc_offset_minutes: cli.utc_offset,
        ..TradingConfig::default()
    };

    match cli.command {
        Commands::Run {
            interval,
            summary_interval,
            cooldown,
            dry_run,
        } => {
            info!(
                interval = interval,
                summary_interval = summary_interval,
                dry_run = dry_run,
                symbols = symbols.len(),
                "Starting pipwatch"
            );

            let bot_config = BotConfig {
                poll_interval_secs: interval,
                summary_interval_secs: summary_interval,
                dry_run,
                broker_timeout_secs: cli.timeout,
                trading_config: TradingConfig {
                    cooldown_secs: cooldown,
                    ..trading_config
                },
                database_url: cli.database.clone(),
            };

            let timeout = bot_config.broker_timeout();
            let bridge = BridgeClient::new(&cli.bridge_url, timeout)?;
            let webhook = DiscordWebhook::new(cli.webhook_url.clone(), timeout)?;
            if !webhook.is_configured() {
                warn!("DISCORD_WEBHOOK_URL not set, notifications will only be logged");
            }

            println!("\n=== pipwatch ===");
            println!("Bridge:           {}", bridge.base_url());
            println!("Polling interval: {}s", interval);
            println!("Summary interval: {}s", summary_interval);
            println!("Mode: {}", if dry_run { "DRY RUN (paper orders)" } else { "LIVE TRADING" });
            println!("Symbols:          {}", symbol_names(&symbols));
            println!("\nPress Ctrl+C to stop.\n");

            if dry_run {
                run_bot(bot_config, symbols, PaperBroker::with_feed(bridge), webhook).await?;
            } else {
                run_bot(bot_config, symbols, bridge, webhook).await?;
            }
        }

        Commands::Check => {
            let timeout = Duration::from_secs(cli.timeout.max(1));
            let bridge = BridgeClient::new(&cli.bridge_url, timeout)?;
            let Some(calendar) = TradingCalendar::new(cli.utc_offset) else {
                anyhow::bail!("UTC offset out of range: {} minutes", cli.utc_offset);
            };
            let now = Utc::now();
            let reference_time = calendar.reference_time(now);

            println!(
                "\nTrading day {} (UTC{}), reference bar at {}",
                calendar.trading_day(now),
                calendar.offset(),
                reference_time
            );
            println!(
                "\n{:<8} {:>12} {:>12} {:>9} {:>8} {:>3} {:>9} {:>9}",
                "SYMBOL", "START", "CURRENT", "PIPS", "DIR", "X", "TO +", "TO -"
            );
            println!("{}", "-".repeat(78));

            for config in &symbols {
                let start = bridge.get_reference_bar(&config.symbol, reference_time, 1).await;
                let current = bridge.get_current_price(&config.symbol).await;

                match (start, current) {
                    (Ok(start), Ok(current)) => match compute(start, current.price, config) {
                        Ok(result) => println!(
                            "{:<8} {:>12} {:>12} {:>9} {:>8} {:>3} {:>9} {:>9}",
                            config.symbol,
                            start.to_string(),
                            current.price.to_string(),
                            result.pip_difference.round_dp(1).to_string(),
                            format!("{} {}", result.direction.arrow(), result.direction),
                            result.thresholds_crossed,
                            pips_to_positive_threshold(result.pip_difference, config)
                                .round_dp(1)
                                .to_string(),
                            pips_to_negative_threshold(result.pip_difference, config)
                                .round_dp(1)
                                .to_string(),
                        ),
                        Err(e) => println!("{:<8} {}", config.symbol, e),
                    },
                    (Err(e), _) | (_, Err(e)) => println!("{:<8} {}", config.symbol, e),
                }
            }
        }

        Commands::Config => {
            println!("\n=== Trading Configuration ===\n");
            println!("  Cooldown:             {}s", trading_config.cooldown_secs);
            println!("  Notify Interval:      {}s", trading_config.notify_interval_secs);
            println!("  UTC Offset:           {} min", trading_config.utc_offset_minutes);
            println!("  Reference Retries:    {}", trading_config.reference_retries);
            println!("  Direction Alerts:     {}", trading_config.direction_alerts);

            println!("\n=== Symbols ===");
            for config in &symbols {
                println!("\n{}:", config.symbol);
                println!("  Pip Size:             {}", config.pip_size);
                println!(
                    "  Thresholds:           +{} / {}",
                    config.positive_pip_threshold, config.negative_pip_threshold
                );
                if let (Some(pos), Some(neg)) = (config.positive_pip_range, config.negative_pip_range)
                {
                    println!("  Alert Band:           +{} / {}", pos, neg);
                }
                println!("  Take Profit:          {} pips", config.close_trade_at);
                println!("  Stop Loss:            {} pips", config.close_trade_at_opposite_direction);
                println!("  Lot Size:             {}", config.lot_size);
                println!("  Max Trades / Day:     {}", config.max_trades_per_day);
                println!(
                    "  Hedge:                {} x {} after {} thresholds",
                    config.hedge_trades, config.hedge_lot_size, config.hedge_min_peak_thresholds
                );
                match config.validate() {
                    Ok(()) => println!("  Valid:                yes"),
                    Err(e) => println!("  Valid:                NO ({})", e),
                }
            }
        }

        Commands::Status { limit } => {
            let db = Database::new(&cli.database).await?;

            let states = db.get_trade_states().await?;
            if states.is_empty() {
                println!("No bot session found. Run 'pipwatch run' to start the bot.");
                return Ok(());
            }

            let (total, executed, failed) = db.get_event_stats().await.unwrap_or((0, 0, 0));

            println!("\n=== Trade States ===");
            println!(
                "{:<8} {:<12} {:<8} {:<6} {:>7} {:<20}",
                "SYMBOL", "DAY", "STATE", "SIDE", "TRADES", "UPDATED"
            );
            for stored in &states {
                match stored.state() {
                    Ok(state) => println!(
                        "{:<8} {:<12} {:<8} {:<6} {:>7} {:<20}",
                        state.symbol,
                        stored.trading_day,
                        state.position.name(),
                        state.direction().map(|d| d.as_str()).unwrap_or("-"),
                        state.trades_today,
                        stored.updated_at
                    ),
                    Err(e) => println!("{:<8} {}", stored.symbol, e),
                }
            }

            println!("\n=== Actions ===");
            println!("Total:            {}", total);
            println!("Executed:         {}", executed);
            println!("Failed:           {}", failed);

            let events = db.get_recent_events(limit).await?;
            if !events.is_empty() {
                println!("\n=== Recent Actions ===");
                for event in &events {
                    println!(
                        "  {} {:<8} {:<6} {:<5} {:<15} {:<9} {}",
                        event.created_at,
                        event.symbol,
                        event.kind,
                        event.side.as_deref().unwrap_or("-"),
                        event.reason.as_deref().unwrap_or("-"),
                        event.status,
                        event
                            .ticket
                            .map(|t| format!("#{}", t))
                            .or_else(|| event.message.clone())
                            .unwrap_or_default()
                    );
                }
            }
        }

        Commands::Replay {
            symbol,
            start,
            prices,
            step,
        } => {
            let config = symbols
                .iter()
                .find(|s| s.symbol.eq_ignore_ascii_case(&symbol))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Unknown symbol {}", symbol))?;
            let prices = parse_prices(&prices)?;
            if prices.is_empty() {
                anyhow::bail!("No prices to replay");
            }

            let replayer = Replayer::new(ReplayConfig {
                step_secs: step,
                trading_config,
                ..ReplayConfig::default()
            });
            let results = replayer.run(config, start, &prices).await?;
            println!("{}", results);
        }
    }

    Ok(())
}

/// Build, initialize and run a bot until Ctrl+C.
async fn run_bot<B: Broker>(
    config: BotConfig,
    symbols: Vec<SymbolConfig>,
    broker: B,
    webhook: DiscordWebhook,
) -> Result<()> {
    let mut bot = Bot::new(config, symbols, broker, webhook).await?;
    bot.initialize().await?;

    // Run the bot
    if let Err(e) = bot.run().await {
        tracing::error!(error = %e, "Bot error");
    }

    // Show final stats
    let stats = bot.get_stats().await;
    println!("\n{}", stats);
    Ok(())
}

fn symbol_configs(path: Option<&Path>) -> Result<Vec<SymbolConfig>> {
    match path {
        Some(path) => load_symbols(path),
        None => Ok(default_symbols()),
    }
}

fn symbol_names(symbols: &[SymbolConfig]) -> String {
    symbols
        .iter()
        .map(|s| s.symbol.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
