use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle timeframes known to the collector.
///
/// Every variant except [`Timeframe::M10`] maps onto an exchange kline interval.
/// `10m` has no exchange interval and can only be synthesized from a finer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M3,
            Timeframe::M5,
            Timeframe::M10,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H2,
            Timeframe::H4,
            Timeframe::D1,
        ]
    }

    /// Short label, also used in table names ("1m", "10m", "1h").
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M10 => 10,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Duration of one candle in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.minutes() * 60_000
    }

    /// Interval code of the exchange kline endpoint, `None` when the exchange
    /// does not serve this timeframe.
    pub fn exchange_interval(&self) -> Option<&'static str> {
        match self {
            Timeframe::M10 => None,
            other => Some(other.label()),
        }
    }

    pub fn is_native(&self) -> bool {
        self.exchange_interval().is_some()
    }

    /// Finer timeframe a derived timeframe is built from unless configured otherwise.
    pub fn default_source(&self) -> Option<Timeframe> {
        match self {
            Timeframe::M10 => Some(Timeframe::M1),
            _ => None,
        }
    }

    /// Start of the grid slot containing `timestamp_ms`.
    pub fn align(&self, timestamp_ms: i64) -> i64 {
        let duration = self.duration_ms();
        timestamp_ms.div_euclid(duration) * duration
    }

    pub fn is_aligned(&self, timestamp_ms: i64) -> bool {
        timestamp_ms.rem_euclid(self.duration_ms()) == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error parsing a timeframe label
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown timeframe: {0:?}")]
pub struct ParseTimeframeError(pub String);

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.label() == label)
            .ok_or_else(|| ParseTimeframeError(label.to_string()))
    }
}

/// One OHLCV candle of a symbol on a timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument, e.g. "BTCUSDT"
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Opening instant in milliseconds since the Unix epoch
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// The candle's window had fully elapsed when it was observed
    pub closed: bool,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        open_time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        closed: bool,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            open_time,
            open,
            high,
            low,
            close,
            volume,
            closed,
        }
    }

    /// First millisecond after the candle's window.
    ///
    /// Saturates instead of overflowing for open times at the end of the range.
    pub fn end_time(&self) -> i64 {
        self.open_time.saturating_add(self.timeframe.duration_ms())
    }

    /// Rounds prices and volume to `dp` fractional digits.
    pub fn round_dp(&mut self, dp: u32) {
        for value in [
            &mut self.open,
            &mut self.high,
            &mut self.low,
            &mut self.close,
            &mut self.volume,
        ] {
            *value = value.round_dp(dp);
        }
    }

    pub fn open_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.open_time).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels() {
        assert_eq!("1m".parse::<Timeframe>(), Ok(Timeframe::M1));
        assert_eq!(" 10m ".parse::<Timeframe>(), Ok(Timeframe::M10));
        assert_eq!("1h".parse::<Timeframe>(), Ok(Timeframe::H1));
        assert!("7m".parse::<Timeframe>().is_err());
        assert!("1M".parse::<Timeframe>().is_err());
    }

    #[test]
    fn only_ten_minutes_is_derived() {
        let derived: Vec<_> = Timeframe::all().iter().filter(|tf| !tf.is_native()).collect();
        assert_eq!(derived, vec![&Timeframe::M10]);
        assert_eq!(Timeframe::M10.default_source(), Some(Timeframe::M1));
        assert_eq!(Timeframe::M5.default_source(), None);
    }

    #[test]
    fn aligns_to_grid() {
        let tf = Timeframe::M10;
        assert_eq!(tf.duration_ms(), 600_000);
        assert_eq!(tf.align(1_700_000_123_456), 1_699_999_800_000);
        assert!(tf.is_aligned(1_699_999_800_000));
        assert!(!tf.is_aligned(1_699_999_860_000));
        assert!(Timeframe::M1.is_aligned(1_699_999_860_000));
    }

    #[test]
    fn end_time_saturates() {
        let far = Timeframe::M1.align(i64::MAX);
        let candle = Candle::new(
            "BTCUSDT",
            Timeframe::M1,
            far,
            Decimal::ONE,
            Decimal::ONE,
            Decimal::ONE,
            Decimal::ONE,
            Decimal::ONE,
            true,
        );
        assert_eq!(candle.end_time(), i64::MAX);
    }

    #[test]
    fn rounds_to_storage_scale() {
        let price: Decimal = "100.12345678901234567891".parse().unwrap();
        let mut candle = Candle::new(
            "BTCUSDT",
            Timeframe::M1,
            0,
            price,
            price,
            price,
            price,
            Decimal::ONE,
            true,
        );
        candle.round_dp(18);
        assert_eq!(candle.close.to_string(), "100.123456789012345679");
        assert_eq!(candle.volume, Decimal::ONE);
    }

    #[test]
    fn serializes_as_label() {
        let json = serde_json::to_string(&Timeframe::H1).unwrap();
        assert_eq!(json, "\"1h\"");
    }
}
