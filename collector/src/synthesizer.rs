//! Aggregation of finer stored candles into a derived timeframe.
//!
//! A derived slot is only emitted once every constituent exists, is closed and
//! sits on the expected grid step. Anything less is skipped for this round and
//! looked at again in the next one; a partial aggregate would understate the
//! volume and range and could not be told apart from a complete bar later.

use shared::{Candle, CandleStore, StoreError, Timeframe};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a derived slot was not emitted this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer (or more) constituents than the ratio requires
    Missing { have: usize, need: usize },
    /// A constituent is still forming
    Forming { open_time: i64 },
    /// Constituents are not on consecutive grid steps
    Gap { expected: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing { have, need } => write!(f, "{}/{} constituents", have, need),
            SkipReason::Forming { open_time } => write!(f, "constituent {} still forming", open_time),
            SkipReason::Gap { expected } => write!(f, "missing constituent at {}", expected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSkip {
    pub slot: i64,
    pub reason: SkipReason,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub candles: Vec<Candle>,
    pub skipped: Vec<SlotSkip>,
}

/// Builds `derived` candles for every slot implied by `source` that is not in
/// `existing`. `source` must hold candles of one symbol on the `base` timeframe.
pub fn synthesize_slots(
    symbol: &str,
    base: Timeframe,
    derived: Timeframe,
    ratio: u32,
    source: &[Candle],
    existing: &BTreeSet<i64>,
) -> SynthesisOutcome {
    let mut slots: BTreeMap<i64, Vec<&Candle>> = BTreeMap::new();
    for candle in source {
        slots
            .entry(derived.align(candle.open_time))
            .or_default()
            .push(candle);
    }

    let mut outcome = SynthesisOutcome::default();
    for (slot, mut members) in slots {
        if existing.contains(&slot) {
            continue;
        }
        members.sort_by_key(|c| c.open_time);
        match check_group(slot, base, ratio, &members) {
            Ok(()) => outcome.candles.push(aggregate(symbol, derived, slot, &members)),
            Err(reason) => outcome.skipped.push(SlotSkip { slot, reason }),
        }
    }
    outcome
}

fn check_group(slot: i64, base: Timeframe, ratio: u32, members: &[&Candle]) -> Result<(), SkipReason> {
    let need = ratio as usize;
    if members.len() != need {
        return Err(SkipReason::Missing {
            have: members.len(),
            need,
        });
    }
    let step = base.duration_ms();
    for (i, candle) in members.iter().enumerate() {
        let expected = slot + i as i64 * step;
        if candle.open_time != expected {
            return Err(SkipReason::Gap { expected });
        }
    }
    if let Some(forming) = members.iter().find(|c| !c.closed) {
        return Err(SkipReason::Forming {
            open_time: forming.open_time,
        });
    }
    Ok(())
}

/// `members` is non-empty and sorted by open time.
fn aggregate(symbol: &str, derived: Timeframe, slot: i64, members: &[&Candle]) -> Candle {
    let first = members[0];
    let last = members[members.len() - 1];
    let mut candle = Candle::new(
        symbol,
        derived,
        slot,
        first.open,
        first.high,
        first.low,
        last.close,
        first.volume,
        true,
    );
    for c in &members[1..] {
        candle.high = candle.high.max(c.high);
        candle.low = candle.low.min(c.low);
        candle.volume += c.volume;
    }
    candle
}

/// Reads recent source candles from storage and synthesizes missing derived slots.
#[derive(Debug, Clone, Copy)]
pub struct Synthesizer {
    /// Newest source candles examined per run
    lookback: usize,
}

impl Synthesizer {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(1),
        }
    }

    pub async fn synthesize(
        &self,
        store: &dyn CandleStore,
        symbol: &str,
        derived: Timeframe,
        base: Timeframe,
        ratio: u32,
    ) -> Result<SynthesisOutcome, StoreError> {
        let recent = store.latest(symbol, base, self.lookback).await?;
        let (Some(newest), Some(oldest)) = (recent.first(), recent.last()) else {
            return Ok(SynthesisOutcome::default());
        };

        // Widen to the whole derived slot so the oldest group is judged on all its members.
        let from = derived.align(oldest.open_time);
        let to = newest.end_time();
        let source = store.load_range(symbol, base, from, to).await?;
        let existing: BTreeSet<i64> = store
            .load_range(symbol, derived, from, to)
            .await?
            .into_iter()
            .map(|c| c.open_time)
            .collect();

        Ok(synthesize_slots(symbol, base, derived, ratio, &source, &existing))
    }
}
