//! Binance spot REST client for kline data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration as StdDuration;
use tracing::debug;

use super::{CandleFeed, FeedRequest, MAX_FEED_PAGE};
use crate::config::FeedConfig;
use crate::types::Candle;
use crate::{Error, Result};

/// Binance spot client. One request per call, fixed timeout, no retries.
pub struct BinanceClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl BinanceClient {
    /// Default REST endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.binance.com";

    pub fn new(config: &FeedConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = reqwest::header::HeaderValue::from_str(key).map_err(|_| Error::Config {
                message: "BINANCE_API_KEY contains invalid header characters".to_string(),
            })?;
            headers.insert("X-MBX-APIKEY", value);
        }

        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn query_params(request: &FeedRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", request.symbol.to_uppercase()),
            ("interval", request.interval.clone()),
            ("limit", request.limit.min(MAX_FEED_PAGE).to_string()),
        ];
        if let Some(start) = request.start {
            params.push(("startTime", start.timestamp_millis().to_string()));
        }
        if let Some(end) = request.end {
            params.push(("endTime", end.timestamp_millis().to_string()));
        }
        params
    }
}

#[async_trait]
impl CandleFeed for BinanceClient {
    async fn fetch(&self, request: FeedRequest) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        debug!(symbol = %request.symbol, interval = %request.interval, "Requesting klines");

        let response = self
            .http_client
            .get(&url)
            .query(&Self::query_params(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                message: format!("API error: {}", status),
                status: Some(status.as_u16()),
            });
        }

        let rows: Vec<Vec<Value>> = response.json().await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// Parse one positional kline row.
pub fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 11 {
        return Err(Error::Decode {
            message: format!("kline row has {} fields, expected at least 11", row.len()),
        });
    }

    Ok(Candle {
        open_time: millis(&row[0], "open_time")?,
        open: required_f64(&row[1], "open")?,
        high: required_f64(&row[2], "high")?,
        low: required_f64(&row[3], "low")?,
        close: required_f64(&row[4], "close")?,
        volume: required_f64(&row[5], "volume")?,
        close_time: millis(&row[6], "close_time")?,
        quote_volume: optional_f64(&row[7]),
        trade_count: row[8].as_i64(),
        taker_buy_base: optional_f64(&row[9]),
        taker_buy_quote: optional_f64(&row[10]),
    })
}

fn millis(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| Error::Decode {
            message: format!("invalid {}: {}", field, value),
        })
}

fn optional_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn required_f64(value: &Value, field: &str) -> Result<f64> {
    optional_f64(value).ok_or_else(|| Error::Decode {
        message: format!("invalid {}: {}", field, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1704067200000i64,
            "42283.58",
            "42554.57",
            "42261.02",
            "42475.23",
            "1271.68108",
            1704070799999i64,
            "53957248.99",
            47134,
            "682.57581",
            "28957416.82",
            "0"
        ]);
        let candle = parse_kline(row.as_array().unwrap()).unwrap();

        assert_eq!(candle.open_time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(candle.close, 42475.23);
        assert_eq!(candle.trade_count, Some(47134));
        assert_eq!(candle.taker_buy_quote, Some(28957416.82));
    }

    #[test]
    fn test_parse_kline_optional_garbage() {
        let row = json!([1704067200000i64, "1", "2", "0.5", "1.5", "10", 1704070799999i64, "n/a", null, "", "x"]);
        let candle = parse_kline(row.as_array().unwrap()).unwrap();
        assert_eq!(candle.quote_volume, None);
        assert_eq!(candle.trade_count, None);
        assert_eq!(candle.taker_buy_base, None);
    }

    #[test]
    fn test_parse_kline_rejects_bad_required_field() {
        let row = json!([1704067200000i64, "oops", "2", "0.5", "1.5", "10", 1704070799999i64, "1", 1, "1", "1"]);
        assert!(matches!(parse_kline(row.as_array().unwrap()), Err(Error::Decode { .. })));

        let short = json!([1704067200000i64, "1"]);
        assert!(matches!(parse_kline(short.as_array().unwrap()), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_query_params_cap_limit() {
        let request = FeedRequest {
            symbol: "btcusdt".to_string(),
            interval: "1h".to_string(),
            limit: 5000,
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: None,
        };
        let params = BinanceClient::query_params(&request);
        assert!(params.contains(&("symbol", "BTCUSDT".to_string())));
        assert!(params.contains(&("limit", "1000".to_string())));
        assert!(params.contains(&("startTime", "1704067200000".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "endTime"));
    }
}
