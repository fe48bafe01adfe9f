use std::time::Duration;

use anyhow::{Context, Result};

use crate::condition::FireMode;
use crate::market::models::Timeframe;

/// Consecutive evaluations a condition may stay unresolved before the alert
/// is reported as misconfigured.
pub const MISSING_VALUE_WARN_AFTER: u32 = 5;

/// Base of the webhook retry schedule: attempt `n` waits `base * 2^n`.
pub const WEBHOOK_BACKOFF_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub eval_interval: Duration,
    pub eval_timeframes: Vec<Timeframe>,
    pub group_timeout: Duration,
    pub max_concurrent_groups: usize,
    pub candle_limit: usize,
    /// Trigger dispatches allowed in flight at once, across ticks.
    pub max_inflight_dispatches: usize,
    pub webhook_timeout: Duration,
    pub webhook_max_retries: u32,
    pub webhook_max_age: Duration,
    pub webhook_secret: String,
    pub default_fire_mode: FireMode,
    pub market_data_url: String,
    /// Empty disables Kafka in favour of the in-process broker.
    pub kafka_brokers: String,
    pub redis_url: String,
    pub database_url: String,
    pub store_backend: StoreBackend,
    pub api_port: u16,
    pub registry_sync_interval: Duration,
    pub bot_router_enabled: bool,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_secs(key: &str, default: &str) -> Result<Duration> {
    let secs: u64 = var_or(key, default)
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds"))?;
    Ok(Duration::from_secs(secs))
}

fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Timeframe::parse(s).with_context(|| format!("EVAL_TIMEFRAMES: unknown timeframe `{s}`")))
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let fire_mode_raw = var_or("DEFAULT_FIRE_MODE", "per_bar");
        let store_raw = var_or("STORE_BACKEND", "postgres");

        Ok(Self {
            eval_interval: parse_secs("EVAL_INTERVAL_SECS", "60")?,
            eval_timeframes: parse_timeframes(&var_or("EVAL_TIMEFRAMES", "1m,5m,15m,1h,4h,1d"))?,
            group_timeout: parse_secs("EVAL_GROUP_TIMEOUT_SECS", "10")?,
            max_concurrent_groups: var_or("EVAL_MAX_CONCURRENT_GROUPS", "8")
                .parse()
                .context("EVAL_MAX_CONCURRENT_GROUPS must be usize")?,
            candle_limit: var_or("EVAL_CANDLE_LIMIT", "300")
                .parse()
                .context("EVAL_CANDLE_LIMIT must be usize")?,
            max_inflight_dispatches: var_or("DISPATCH_MAX_INFLIGHT", "256")
                .parse()
                .context("DISPATCH_MAX_INFLIGHT must be usize")?,
            webhook_timeout: parse_secs("WEBHOOK_TIMEOUT_SECS", "10")?,
            webhook_max_retries: var_or("WEBHOOK_MAX_RETRIES", "3")
                .parse()
                .context("WEBHOOK_MAX_RETRIES must be u32")?,
            webhook_max_age: parse_secs("WEBHOOK_MAX_AGE_SECS", "300")?,
            webhook_secret: var_or("WEBHOOK_SECRET", ""),
            default_fire_mode: FireMode::parse(&fire_mode_raw)
                .with_context(|| format!("DEFAULT_FIRE_MODE: unknown mode `{fire_mode_raw}`"))?,
            market_data_url: var_or("MARKET_DATA_URL", "https://api.binance.com/api/v3/klines"),
            kafka_brokers: var_or("KAFKA_BROKERS", "localhost:9092"),
            redis_url: var_or("REDIS_URL", "redis://localhost:6379"),
            database_url: var_or("DATABASE_URL", "postgres://localhost/alertflow"),
            store_backend: match store_raw.trim().to_ascii_lowercase().as_str() {
                "postgres" => StoreBackend::Postgres,
                "memory" => StoreBackend::Memory,
                other => anyhow::bail!("STORE_BACKEND must be `postgres` or `memory`, got `{other}`"),
            },
            api_port: var_or("API_PORT", "8090")
                .parse()
                .context("API_PORT must be u16")?,
            registry_sync_interval: parse_secs("REGISTRY_SYNC_SECS", "30")?,
            bot_router_enabled: var_or("BOT_ROUTER_ENABLED", "true")
                .parse()
                .context("BOT_ROUTER_ENABLED must be true or false")?,
        })
    }

    pub fn kafka_enabled(&self) -> bool {
        !self.kafka_brokers.trim().is_empty()
    }
}
