use super::{table_name, CandleStore, StoreError};
use crate::models::{Candle, Timeframe};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-memory candle storage
///
/// Same table naming and keying as the MySQL store, one ordered map per table.
/// Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCandleStore {
    tables: RwLock<HashMap<String, BTreeMap<i64, Candle>>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored candle of a pair, oldest first.
    pub async fn all(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        let Ok(key) = table_name(symbol, timeframe) else {
            return Vec::new();
        };
        self.tables
            .read()
            .await
            .get(&key)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored candles across all tables.
    pub async fn len(&self) -> usize {
        self.tables.read().await.values().map(|t| t.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn table_count(&self) -> usize {
        self.tables.read().await.len()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn ensure_table(&self, symbol: &str, timeframe: Timeframe) -> Result<(), StoreError> {
        let key = table_name(symbol, timeframe)?;
        self.tables.write().await.entry(key).or_default();
        Ok(())
    }

    async fn load_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let key = table_name(symbol, timeframe)?;
        if from_ms >= to_ms {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .get(&key)
            .map(|rows| rows.range(from_ms..to_ms).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        let key = table_name(symbol, timeframe)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(&key)
            .map(|rows| rows.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<(), StoreError> {
        let key = table_name(symbol, timeframe)?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(key).or_default();
        for candle in candles {
            rows.insert(candle.open_time, candle.clone());
        }
        Ok(())
    }
}
