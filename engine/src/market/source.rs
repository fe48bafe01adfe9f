use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::models::{Candle, Timeframe};

/// The market-data collaborator.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `limit` candles, oldest first.
    async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

// ---------------------------------------------------------------------------
// KlinesSource: Binance-compatible REST klines endpoint
// ---------------------------------------------------------------------------

pub struct KlinesSource {
    client: reqwest::Client,
    url: String,
}

impl KlinesSource {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MarketData for KlinesSource {
    async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let interval = timeframe.to_string();
        let limit = limit.to_string();
        let resp = self
            .client
            .get(&self.url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("klines request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("klines request failed with status {status}: {body}");
        }

        let rows: Vec<Value> = resp.json().await.context("klines response is not JSON")?;
        let mut candles: Vec<Candle> = rows.iter().filter_map(parse_kline).collect();
        candles.sort_by_key(|c| c.time);
        tracing::debug!(symbol, %timeframe, count = candles.len(), "klines_fetched");
        Ok(candles)
    }
}

/// `[open_time_ms, "open", "high", "low", "close", "volume", ...]`
fn parse_kline(row: &Value) -> Option<Candle> {
    let arr = row.as_array()?;
    let num = |i: usize| -> Option<f64> {
        let v = arr.get(i)?;
        v.as_f64().or_else(|| v.as_str()?.parse().ok())
    };
    let open_ms = arr.first()?.as_i64()?;
    Some(Candle {
        time: open_ms / 1000,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
    })
}
