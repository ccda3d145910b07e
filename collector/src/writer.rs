//! Deduplicating upsert of candle batches.

use crate::error::WriteError;
use shared::{Candle, CandleStore, Timeframe, PRICE_SCALE};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// What happened to the records of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl WriteSummary {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn add(&mut self, other: &WriteSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Insert,
    Update,
    Keep,
}

/// Decides how an incoming record treats the stored one with the same key.
///
/// A stored closed candle is never replaced by a forming one.
pub fn classify(stored: Option<&Candle>, incoming: &Candle) -> UpsertAction {
    match stored {
        None => UpsertAction::Insert,
        Some(stored) if stored == incoming => UpsertAction::Keep,
        Some(stored) if stored.closed && !incoming.closed => UpsertAction::Keep,
        Some(_) => UpsertAction::Update,
    }
}

/// Upserts candle batches by `(symbol, timeframe, open_time)`.
#[derive(Clone)]
pub struct DedupWriter {
    store: Arc<dyn CandleStore>,
}

impl DedupWriter {
    pub fn new(store: Arc<dyn CandleStore>) -> Self {
        Self { store }
    }

    /// Writes one batch for a single `(symbol, timeframe)`, all or nothing.
    ///
    /// Later records in the batch win over earlier ones with the same open
    /// time. Values are rounded to the stored scale before comparison, and
    /// identical records are left untouched.
    pub async fn write(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        batch: Vec<Candle>,
    ) -> Result<WriteSummary, WriteError> {
        let mut incoming: BTreeMap<i64, Candle> = BTreeMap::new();
        for mut candle in batch {
            if candle.symbol != symbol || candle.timeframe != timeframe {
                return Err(WriteError::MixedBatch {
                    symbol: symbol.to_string(),
                    timeframe,
                    found_symbol: candle.symbol,
                    found_timeframe: candle.timeframe,
                });
            }
            if !timeframe.is_aligned(candle.open_time) {
                return Err(WriteError::Misaligned {
                    timeframe,
                    open_time: candle.open_time,
                });
            }
            candle.round_dp(PRICE_SCALE);
            incoming.insert(candle.open_time, candle);
        }

        let (Some(&first), Some(&last)) = (incoming.keys().next(), incoming.keys().next_back())
        else {
            return Ok(WriteSummary::default());
        };

        let storage = |source| WriteError::Storage { timeframe, source };
        let stored: HashMap<i64, Candle> = self
            .store
            .load_range(symbol, timeframe, first, last.saturating_add(timeframe.duration_ms()))
            .await
            .map_err(storage)?
            .into_iter()
            .map(|c| (c.open_time, c))
            .collect();

        let mut summary = WriteSummary::default();
        let mut changes = Vec::new();
        for (open_time, candle) in incoming {
            match classify(stored.get(&open_time), &candle) {
                UpsertAction::Insert => {
                    summary.inserted += 1;
                    changes.push(candle);
                }
                UpsertAction::Update => {
                    summary.updated += 1;
                    changes.push(candle);
                }
                UpsertAction::Keep => summary.unchanged += 1,
            }
        }

        if !changes.is_empty() {
            self.store
                .upsert(symbol, timeframe, &changes)
                .await
                .map_err(storage)?;
        }
        debug!(
            "{} {}: {} inserted, {} updated, {} unchanged",
            symbol, timeframe, summary.inserted, summary.updated, summary.unchanged
        );
        Ok(summary)
    }
}
