//! The polling loop: one round walks every symbol through the plan in order.

use crate::error::EntryError;
use crate::fetcher::KlineSource;
use crate::plan::{CollectionPlan, PlanEntry, TimeframeSource};
use crate::reporter::Reporter;
use crate::synthesizer::Synthesizer;
use crate::writer::{DedupWriter, WriteSummary};
use shared::{CandleStore, CollectorConfig, StoreError, Timeframe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of one successful entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryWrite {
    /// Candles handed to the writer
    pub candles: usize,
    /// Derived slots left for a later round
    pub skipped: usize,
    pub summary: WriteSummary,
}

#[derive(Debug)]
pub struct EntryOutcome {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub result: Result<EntryWrite, EntryError>,
}

#[derive(Debug)]
pub struct RoundReport {
    pub round: u64,
    pub entries: Vec<EntryOutcome>,
    /// A stop request ended the round before every entry ran
    pub stopped_early: bool,
}

impl RoundReport {
    pub fn totals(&self) -> WriteSummary {
        let mut totals = WriteSummary::default();
        for write in self.entries.iter().filter_map(|e| e.result.as_ref().ok()) {
            totals.add(&write.summary);
        }
        totals
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_err()).count()
    }
}

pub struct RoundScheduler {
    symbols: Vec<String>,
    plan: CollectionPlan,
    interval: Duration,
    fetch_limit: usize,
    store: Arc<dyn CandleStore>,
    source: Arc<dyn KlineSource>,
    writer: DedupWriter,
    synthesizer: Synthesizer,
    reporter: Reporter,
}

impl RoundScheduler {
    pub fn new(
        config: &CollectorConfig,
        plan: CollectionPlan,
        store: Arc<dyn CandleStore>,
        source: Arc<dyn KlineSource>,
    ) -> Self {
        Self {
            symbols: config.symbols.clone(),
            plan,
            interval: config.poll_interval,
            fetch_limit: config.fetch_limit,
            writer: DedupWriter::new(store.clone()),
            synthesizer: Synthesizer::new(config.synth_lookback),
            reporter: Reporter::new(config.report_rows),
            store,
            source,
        }
    }

    pub fn plan(&self) -> &CollectionPlan {
        &self.plan
    }

    /// Creates the table of every configured pair.
    pub async fn prepare(&self) -> Result<(), StoreError> {
        for symbol in &self.symbols {
            for timeframe in self.plan.timeframes() {
                self.store.ensure_table(symbol, timeframe).await?;
            }
        }
        info!(
            "Storage ready for {} symbol(s) x {} timeframe(s)",
            self.symbols.len(),
            self.plan.entries().len()
        );
        Ok(())
    }

    /// Runs rounds until `stop` turns true or its sender goes away.
    ///
    /// The first round starts immediately, later ones on the interval measured
    /// start to start. A round that overruns delays the next tick instead of
    /// bursting to catch up.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut round = 0u64;

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            round += 1;
            let report = self.run_round(round, &stop).await;
            if report.stopped_early {
                break;
            }
        }
        info!("🛑 Scheduler stopped after {} round(s)", round);
    }

    /// Runs every entry once. A failing entry is logged and recorded, the
    /// remaining entries still run.
    pub async fn run_round(&self, round: u64, stop: &watch::Receiver<bool>) -> RoundReport {
        info!("🔄 Round {} started", round);
        let mut report = RoundReport {
            round,
            entries: Vec::new(),
            stopped_early: false,
        };

        'symbols: for symbol in &self.symbols {
            for entry in self.plan.entries() {
                if *stop.borrow() {
                    report.stopped_early = true;
                    break 'symbols;
                }
                let result = self.run_entry(symbol, entry).await;
                if let Err(e) = &result {
                    warn!("⚠️ {} {} skipped this round: {}", symbol, entry.timeframe, e);
                }
                report.entries.push(EntryOutcome {
                    symbol: symbol.clone(),
                    timeframe: entry.timeframe,
                    result,
                });
            }
        }

        let totals = report.totals();
        info!(
            "✅ Round {} finished: {} entries, {} inserted, {} updated, {} unchanged, {} failed{}",
            round,
            report.entries.len(),
            totals.inserted,
            totals.updated,
            totals.unchanged,
            report.failed(),
            if report.stopped_early { " (stopped early)" } else { "" }
        );
        report
    }

    async fn run_entry(&self, symbol: &str, entry: &PlanEntry) -> Result<EntryWrite, EntryError> {
        let timeframe = entry.timeframe;
        let (batch, skipped) = match entry.source {
            TimeframeSource::Native => {
                let candles = self
                    .source
                    .fetch(symbol, timeframe, self.fetch_limit)
                    .await?;
                (candles, 0)
            }
            TimeframeSource::Derived { source, ratio } => {
                let outcome = self
                    .synthesizer
                    .synthesize(self.store.as_ref(), symbol, timeframe, source, ratio)
                    .await
                    .map_err(|e| EntryError::Read {
                        timeframe: source,
                        source: e,
                    })?;
                for skip in &outcome.skipped {
                    debug!("{} {} slot {} not ready: {}", symbol, timeframe, skip.slot, skip.reason);
                }
                (outcome.candles, outcome.skipped.len())
            }
        };

        let candles = batch.len();
        let summary = self.writer.write(symbol, timeframe, batch).await?;

        if let Err(e) = self.reporter.report(self.store.as_ref(), symbol, timeframe).await {
            warn!("Snapshot of {} {} failed: {}", symbol, timeframe, e);
        }

        Ok(EntryWrite {
            candles,
            skipped,
            summary,
        })
    }
}
