//! Database persistence for resuming a trading day.
//!
//! Stores:
//! - Daily reference (start) prices per symbol
//! - The latest trade-state snapshot per symbol
//! - An append-only history of trading actions
//!
//! Prices are stored as decimal text so they round-trip exactly.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

use crate::models::TradeState;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored reference price.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredStartPrice {
    pub price: String,
}

impl StoredStartPrice {
    pub fn price(&self) -> Option<Decimal> {
        Decimal::from_str(&self.price).ok()
    }
}

/// Stored trade-state snapshot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTradeState {
    pub symbol: String,
    pub trading_day: String,
    pub state_json: String,
    pub updated_at: String,
}

impl StoredTradeState {
    pub fn state(&self) -> Result<TradeState> {
        serde_json::from_str(&self.state_json)
            .with_context(|| format!("Corrupt trade state for {}", self.symbol))
    }
}

/// One row of action history.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeEvent {
    pub id: String,
    pub symbol: String,
    pub kind: String,
    pub side: Option<String>,
    pub reason: Option<String>,
    pub price: Option<String>,
    pub pip_difference: Option<String>,
    pub ticket: Option<i64>,
    pub status: String,
    pub message: Option<String>,
    pub created_at: String,
}

/// Fields for a new history row.
#[derive(Debug, Clone, Default)]
pub struct NewTradeEvent<'a> {
    pub symbol: &'a str,
    pub kind: &'a str,
    pub side: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub price: Option<Decimal>,
    pub pip_difference: Option<Decimal>,
    pub ticket: Option<u64>,
    pub status: &'a str,
    pub message: Option<String>,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS start_prices (
                symbol TEXT NOT NULL,
                trading_day TEXT NOT NULL,
                price TEXT NOT NULL,
                reference_time TEXT NOT NULL,
                PRIMARY KEY (symbol, trading_day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_states (
                symbol TEXT PRIMARY KEY,
                trading_day TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_events (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                side TEXT,
                reason TEXT,
                price TEXT,
                pip_difference TEXT,
                ticket INTEGER,
                status TEXT NOT NULL,
                message TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_events_symbol ON trade_events(symbol, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Start Prices ====================

    /// Record the reference price for a symbol's trading day.
    pub async fn save_start_price(
        &self,
        symbol: &str,
        trading_day: NaiveDate,
        price: Decimal,
        reference_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO start_prices (symbol, trading_day, price, reference_time)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(symbol, trading_day) DO UPDATE SET
                price = excluded.price,
                reference_time = excluded.reference_time
            "#,
        )
        .bind(symbol)
        .bind(trading_day.to_string())
        .bind(price.to_string())
        .bind(reference_time.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reference price for a symbol's trading day, if one was recorded.
    pub async fn get_start_price(
        &self,
        symbol: &str,
        trading_day: NaiveDate,
    ) -> Result<Option<Decimal>> {
        let row = sqlx::query_as::<_, StoredStartPrice>(
            "SELECT price FROM start_prices WHERE symbol = ? AND trading_day = ?",
        )
        .bind(symbol)
        .bind(trading_day.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch start price")?;

        Ok(row.and_then(|r| r.price()))
    }

    // ==================== Trade States ====================

    /// Save a symbol's trade-state snapshot.
    pub async fn save_trade_state(&self, state: &TradeState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to encode trade state")?;

        sqlx::query(
            r#"
            INSERT INTO trade_states (symbol, trading_day, state_json, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                trading_day = excluded.trading_day,
                state_json = excluded.state_json,
                updated_at = datetime('now')
            "#,
        )
        .bind(&state.symbol)
        .bind(state.trading_day.to_string())
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Snapshot for a symbol, only if it belongs to `trading_day`.
    pub async fn load_trade_state(
        &self,
        symbol: &str,
        trading_day: NaiveDate,
    ) -> Result<Option<TradeState>> {
        let row = sqlx::query_as::<_, StoredTradeState>(
            "SELECT * FROM trade_states WHERE symbol = ? AND trading_day = ?",
        )
        .bind(symbol)
        .bind(trading_day.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch trade state")?;

        row.map(|r| r.state()).transpose()
    }

    /// All stored snapshots, any day.
    pub async fn get_trade_states(&self) -> Result<Vec<StoredTradeState>> {
        sqlx::query_as::<_, StoredTradeState>("SELECT * FROM trade_states ORDER BY symbol")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch trade states")
    }

    // ==================== Trade Events ====================

    /// Append an action to the history. Returns the new event id.
    pub async fn record_event(&self, event: &NewTradeEvent<'_>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let ticket = event.ticket.and_then(|t| i64::try_from(t).ok());

        sqlx::query(
            r#"
            INSERT INTO trade_events (
                id, symbol, kind, side, reason, price, pip_difference,
                ticket, status, message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(event.symbol)
        .bind(event.kind)
        .bind(event.side)
        .bind(event.reason)
        .bind(event.price.map(|p| p.to_string()))
        .bind(event.pip_difference.map(|p| p.to_string()))
        .bind(ticket)
        .bind(event.status)
        .bind(event.message.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Most recent events, newest first.
    pub async fn get_recent_events(&self, limit: i64) -> Result<Vec<TradeEvent>> {
        sqlx::query_as::<_, TradeEvent>(
            "SELECT * FROM trade_events ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trade events")
    }

    /// (total, executed, failed) event counts.
    pub async fn get_event_stats(&self) -> Result<(i64, i64, i64)> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_events")
            .fetch_one(&self.pool)
            .await?;

        let (executed,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trade_events WHERE status = 'executed'")
                .fetch_one(&self.pool)
                .await?;

        let (failed,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trade_events WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        Ok((total, executed, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionState, TradeSide};
    use rust_decimal_macros::dec;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_start_price_upsert() {
        let db = memory_db().await;

        db.save_start_price("EURUSD", day(4), dec!(1.09680), Utc::now())
            .await
            .unwrap();
        db.save_start_price("EURUSD", day(4), dec!(1.09700), Utc::now())
            .await
            .unwrap();

        assert_eq!(
            db.get_start_price("EURUSD", day(4)).await.unwrap(),
            Some(dec!(1.09700))
        );
        assert_eq!(db.get_start_price("EURUSD", day(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_trade_state_only_restored_for_same_day() {
        let db = memory_db().await;

        let mut state = TradeState::new("EURUSD", day(4));
        state.position = PositionState::Open {
            direction: TradeSide::Buy,
            entry_pip_difference: dec!(15),
            peak_thresholds: 1,
        };
        state.trades_today = 1;
        db.save_trade_state(&state).await.unwrap();

        let restored = db.load_trade_state("EURUSD", day(4)).await.unwrap();
        assert_eq!(restored, Some(state));
        assert!(db.load_trade_state("EURUSD", day(5)).await.unwrap().is_none());
        assert_eq!(db.get_trade_states().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_and_stats() {
        let db = memory_db().await;

        db.record_event(&NewTradeEvent {
            symbol: "EURUSD",
            kind: "open",
            side: Some("buy"),
            price: Some(dec!(1.09830)),
            pip_difference: Some(dec!(15)),
            ticket: Some(1),
            status: "executed",
            ..Default::default()
        })
        .await
        .unwrap();
        db.record_event(&NewTradeEvent {
            symbol: "EURUSD",
            kind: "close",
            reason: Some("target"),
            status: "failed",
            message: Some("retcode 10006".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

        let events = db.get_recent_events(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.ticket == Some(1) && e.price.as_deref() == Some("1.09830")));
        assert_eq!(db.get_event_stats().await.unwrap(), (2, 1, 1));
    }
}
