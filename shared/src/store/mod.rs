//! Per `(symbol, timeframe)` candle storage.
//!
//! Each pair lives in its own table keyed by `open_time`. The collector's writer
//! is the only component that mutates a table; synthesis, reporting and the
//! API only read.

mod memory;
mod mysql;

pub use memory::MemoryCandleStore;
pub use mysql::MySqlCandleStore;

use crate::models::{Candle, Timeframe};
use async_trait::async_trait;
use thiserror::Error;

/// Fractional digits kept for prices and volume; stored columns are `DECIMAL(36, 18)`.
pub const PRICE_SCALE: u32 = 18;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("invalid symbol for table name: {0:?}")]
    InvalidSymbol(String),

    #[error("failed to build statement: {0}")]
    Statement(String),
}

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Creates the table backing `(symbol, timeframe)` if it does not exist yet.
    async fn ensure_table(&self, symbol: &str, timeframe: Timeframe) -> Result<(), StoreError>;

    /// Candles with `from_ms <= open_time < to_ms`, oldest first.
    async fn load_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, StoreError>;

    /// The newest `limit` candles, newest first.
    async fn latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, StoreError>;

    /// Inserts or overwrites `candles` by `open_time`, all or nothing.
    async fn upsert(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<(), StoreError>;
}

/// Table name for a pair, e.g. `klines_btcusdt_10m`.
pub fn table_name(symbol: &str, timeframe: Timeframe) -> Result<String, StoreError> {
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidSymbol(symbol.to_string()));
    }
    Ok(format!(
        "klines_{}_{}",
        symbol.to_ascii_lowercase(),
        timeframe.label()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert_eq!(
            table_name("BTCUSDT", Timeframe::M10).unwrap(),
            "klines_btcusdt_10m"
        );
        assert!(matches!(
            table_name("BTC`; DROP", Timeframe::M1),
            Err(StoreError::InvalidSymbol(_))
        ));
        assert!(table_name("", Timeframe::M1).is_err());
    }
}
