//! HTTP client for an MT5 bridge service.
//!
//! The terminal's client library only runs next to the terminal, so the bot
//! talks to a small bridge process that exposes ticks, rate history, order
//! sending and positions as JSON. One client is built per process and shared.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{TradeError, TradeResult};
use crate::models::{decimal_price, OpenPosition, OrderTicket, PricePoint, TradeSide};

use super::broker::Broker;
use super::types::*;

/// Client for the MT5 bridge.
pub struct BridgeClient {
    client: Client,
    base_url: String,
}

impl BridgeClient {
    /// Create a client with an explicit base URL and request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> TradeResult<Option<T>> {
        debug!(url = %url, "Bridge GET");

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradeError::Transport(format!(
                "GET {} failed: {} - {}",
                url, status, body
            )));
        }

        let parsed = response
            .json()
            .await
            .map_err(|e| TradeError::Transport(format!("Failed to parse {}: {}", url, e)))?;
        Ok(Some(parsed))
    }

    async fn post_trade<B: serde::Serialize>(&self, url: &str, body: &B) -> TradeResult<TradeReply> {
        debug!(url = %url, "Bridge POST");

        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradeError::Transport(format!(
                "POST {} failed: {} - {}",
                url, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TradeError::Transport(format!("Failed to parse trade reply: {}", e)))
    }
}

impl Broker for BridgeClient {
    async fn get_current_price(&self, symbol: &str) -> TradeResult<PricePoint> {
        let url = format!("{}/symbols/{}/tick", self.base_url, symbol);
        let tick: TickResponse = self.get_json(&url).await?.ok_or_else(|| {
            TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: "symbol not available on the terminal".to_string(),
            }
        })?;

        PricePoint::from_f64(symbol, tick.bid, unix_to_utc(tick.time))
    }

    async fn get_reference_bar(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: u32,
    ) -> TradeResult<Decimal> {
        let url = format!(
            "{}/symbols/{}/rates?timeframe=M5&from={}&count={}",
            self.base_url,
            symbol,
            from.timestamp(),
            count.max(1)
        );
        let bars: Vec<RateResponse> = self.get_json(&url).await?.unwrap_or_default();

        let bar = bars
            .into_iter()
            .next()
            .ok_or_else(|| TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: format!("no M5 bar at {}", from),
            })?
            .into_bar(symbol)?;
        debug!(symbol = %symbol, time = %bar.time, close = %bar.close, "Reference bar");
        Ok(bar.close)
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        volume: Decimal,
        comment: &str,
    ) -> TradeResult<OrderTicket> {
        let url = format!("{}/orders", self.base_url);
        let request = OrderRequest::market(symbol, side, volume, comment);
        let reply = self.post_trade(&url, &request).await?;

        if !reply.is_done() {
            warn!(symbol = %symbol, retcode = reply.retcode, comment = %reply.comment, "Order rejected");
            return Err(TradeError::OrderRejected {
                symbol: symbol.to_string(),
                code: reply.retcode,
                message: reply.comment,
            });
        }

        let price = reply
            .price
            .and_then(|p| decimal_price(symbol, p).ok());
        Ok(OrderTicket {
            ticket: reply.order.or(reply.deal).unwrap_or_default(),
            symbol: symbol.to_string(),
            side,
            volume,
            price,
        })
    }

    async fn close_position(&self, ticket: u64) -> TradeResult<()> {
        let url = format!("{}/positions/{}/close", self.base_url, ticket);
        let body = serde_json::json!({
            "deviation": ORDER_DEVIATION,
            "magic": ORDER_MAGIC,
            "comment": "pipwatch close",
        });
        let reply = self.post_trade(&url, &body).await?;

        if !reply.is_done() {
            return Err(TradeError::CloseRejected {
                ticket,
                code: reply.retcode,
                message: reply.comment,
            });
        }
        Ok(())
    }

    async fn list_open_positions(&self, symbol: &str) -> TradeResult<Vec<OpenPosition>> {
        let url = format!("{}/positions?symbol={}", self.base_url, symbol);
        let items: Vec<PositionResponse> = self.get_json(&url).await?.unwrap_or_default();

        items
            .into_iter()
            .map(|p| {
                let side = p.side();
                let volume = decimal_price(&p.symbol, p.volume)?;
                Ok(OpenPosition {
                    ticket: p.ticket,
                    symbol: p.symbol,
                    volume,
                    side,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = BridgeClient::new("http://localhost:8081/", Duration::from_secs(10)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8081");
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_transport_error() {
        // Port 9 (discard) on localhost is not an HTTP server.
        let client =
            BridgeClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.get_current_price("EURUSD").await.unwrap_err();
        assert!(matches!(err, TradeError::Transport(_)));
    }
}
