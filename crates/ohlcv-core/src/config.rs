//! Configuration management for candle synchronization and backtests.

use crate::api::binance::BinanceClient;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    /// Source identifier stored with every candle.
    pub exchange: String,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    /// Start used to bootstrap series that have no stored candles yet.
    pub candle_start_date: DateTime<Utc>,
    pub strategy: String,
    pub base_timeframe: String,
    pub skip_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: BinanceClient::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let start_raw = env::var("CANDLE_SYNC_START_DATE").unwrap_or_else(|_| "2017-01-01".to_string());

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", env::var("DATABASE_MAX_CONNECTIONS").ok(), 5)?,
            },
            feed: FeedConfig {
                base_url: env::var("BINANCE_BASE_URL")
                    .unwrap_or_else(|_| FeedConfig::default().base_url),
                api_key: env::var("BINANCE_API_KEY").ok().filter(|k| !k.is_empty()),
                timeout_secs: parse_or("FEED_TIMEOUT_SECS", env::var("FEED_TIMEOUT_SECS").ok(), 10)?,
            },
            exchange: env::var("EXCHANGE").unwrap_or_else(|_| "binance_spot".to_string()),
            symbols: non_empty_or(split_csv(env::var("SYMBOLS").ok().as_deref()), &["BTCUSDT", "ETHUSDT"]),
            timeframes: non_empty_or(split_csv(env::var("TIMEFRAMES").ok().as_deref()), &["1d", "4h", "1h"]),
            candle_start_date: parse_start_date(&start_raw)?,
            strategy: env::var("STRATEGY").unwrap_or_else(|_| "always_enter".to_string()),
            base_timeframe: env::var("BASE_TIMEFRAME").unwrap_or_else(|_| "1h".to_string()),
            skip_migrations: env::var("SKIP_MIGRATIONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    /// Settings with defaults and no external services, for tests.
    pub fn test_settings() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/ohlcv_test".to_string(),
                max_connections: 2,
            },
            feed: FeedConfig::default(),
            exchange: "binance_spot".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: vec!["1h".to_string(), "4h".to_string(), "1d".to_string()],
            candle_start_date: Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap(),
            strategy: "always_enter".to_string(),
            base_timeframe: "1h".to_string(),
            skip_migrations: true,
        }
    }
}

/// Split a comma separated list, dropping blank items.
pub fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_or(values: Vec<String>, fallback: &[&str]) -> Vec<String> {
    if values.is_empty() {
        fallback.iter().map(|s| s.to_string()).collect()
    } else {
        values
    }
}

/// Parse an optional numeric setting. Unset or blank uses `default`.
fn parse_or<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T> {
    match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| Error::Config {
            message: format!("Invalid {}: {}", name, raw),
        }),
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_start_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| Error::Config {
            message: format!("Invalid candle start date: {}", raw),
        })
}
