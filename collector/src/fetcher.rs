//! Kline fetching from the exchange REST endpoint.

use crate::error::FetchError;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use shared::{Candle, CollectorConfig, Timeframe};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Fields per kline record: open time, OHLCV, close time, quote volume,
/// trade count, taker base volume, taker quote volume, ignore.
pub const KLINE_FIELDS: usize = 12;

/// Source of native-timeframe candles.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Up to `limit` candles ending at now, oldest first.
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub base_url: String,
    pub timeout: Duration,
    /// Attempts per fetch, at least 1
    pub attempts: u32,
    pub backoff: Duration,
}

impl From<&CollectorConfig> for FetcherSettings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            base_url: config.exchange_base_url.clone(),
            timeout: config.fetch_timeout,
            attempts: config.fetch_attempts,
            backoff: config.fetch_backoff,
        }
    }
}

/// Binance-compatible `/api/v3/klines` client
pub struct BinanceFetcher {
    client: reqwest::Client,
    settings: FetcherSettings,
}

impl BinanceFetcher {
    pub fn new(settings: FetcherSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Fetches a window of klines, optionally bounded by open time.
    ///
    /// Transport and status failures are retried up to the configured number
    /// of attempts with a fixed backoff.
    pub async fn fetch_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, FetchError> {
        let attempts = self.settings.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .request_once(symbol, timeframe, limit, start_time, end_time)
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "Fetch {} {} attempt {}/{} failed: {}, retrying in {:?}",
                        symbol, timeframe, attempt, attempts, e, self.settings.backoff
                    );
                    tokio::time::sleep(self.settings.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, FetchError> {
        let interval = timeframe
            .exchange_interval()
            .ok_or(FetchError::UnsupportedInterval(timeframe))?;

        let mut query: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start_time {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }

        let transport = |source| FetchError::Transport { timeframe, source };
        let response = self
            .client
            .get(format!("{}/api/v3/klines", self.settings.base_url))
            .query(&query)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(FetchError::Status {
                timeframe,
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let payload: Value = serde_json::from_str(&text)
            .map_err(|e| FetchError::malformed(timeframe, format!("invalid JSON: {}", e)))?;
        let candles = parse_klines(symbol, timeframe, &payload, Utc::now().timestamp_millis())?;
        debug!("Fetched {} {} candles for {}", candles.len(), timeframe, symbol);
        Ok(candles)
    }
}

#[async_trait]
impl KlineSource for BinanceFetcher {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.fetch_window(symbol, timeframe, limit, None, None).await
    }
}

/// Converts a kline payload into candles, oldest first.
///
/// A candle is `closed` once its window has ended at `now_ms`. Duplicate open
/// times keep the last record.
pub fn parse_klines(
    symbol: &str,
    timeframe: Timeframe,
    payload: &Value,
    now_ms: i64,
) -> Result<Vec<Candle>, FetchError> {
    let records = payload
        .as_array()
        .ok_or_else(|| FetchError::malformed(timeframe, "expected an array of klines"))?;

    let mut by_open_time = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        let candle = parse_record(symbol, timeframe, record, now_ms)
            .map_err(|reason| FetchError::malformed(timeframe, format!("record {}: {}", index, reason)))?;
        by_open_time.insert(candle.open_time, candle);
    }
    Ok(by_open_time.into_values().collect())
}

fn parse_record(
    symbol: &str,
    timeframe: Timeframe,
    record: &Value,
    now_ms: i64,
) -> Result<Candle, String> {
    let fields = record.as_array().ok_or("not an array")?;
    if fields.len() != KLINE_FIELDS {
        return Err(format!(
            "expected {} fields, got {}",
            KLINE_FIELDS,
            fields.len()
        ));
    }

    let open_time = fields[0].as_i64().ok_or("open time is not an integer")?;
    if open_time < 0 {
        return Err(format!("negative open time {}", open_time));
    }
    if !timeframe.is_aligned(open_time) {
        return Err(format!("open time {} is not on the {} grid", open_time, timeframe));
    }
    let end_time = open_time
        .checked_add(timeframe.duration_ms())
        .ok_or_else(|| format!("open time {} is out of range", open_time))?;
    let volume = decimal_field(&fields[5], "volume")?;
    if volume.is_sign_negative() && !volume.is_zero() {
        return Err(format!("negative volume {}", volume));
    }

    Ok(Candle::new(
        symbol,
        timeframe,
        open_time,
        decimal_field(&fields[1], "open")?,
        decimal_field(&fields[2], "high")?,
        decimal_field(&fields[3], "low")?,
        decimal_field(&fields[4], "close")?,
        volume,
        end_time <= now_ms,
    ))
}

/// Prices arrive as numeric strings, sometimes as bare numbers.
fn decimal_field(value: &Value, name: &str) -> Result<Decimal, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(format!("{} is not numeric: {}", name, other)),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| format!("{} {:?}: {}", name, text, e))
}
