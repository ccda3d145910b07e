use async_trait::async_trait;
use collector::{
    CollectionPlan, EntryError, FetchError, KlineSource, RoundScheduler, WriteSummary,
};
use rust_decimal::Decimal;
use shared::config::parse_timeframes;
use shared::{Candle, CollectorConfig, ConfigError, MemoryCandleStore, Timeframe};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

// 2023-11-14 22:20 UTC, aligned to every timeframe up to 10m
const T0: i64 = 1_700_000_400_000;

fn candle(timeframe: Timeframe, i: i64, close: i64, closed: bool) -> Candle {
    Candle::new(
        "BTCUSDT",
        timeframe,
        T0 + i * timeframe.duration_ms(),
        Decimal::from(100),
        Decimal::from(120),
        Decimal::from(90),
        Decimal::from(close),
        Decimal::ONE,
        closed,
    )
}

/// Answers fetches from per-timeframe queues; an empty queue yields no candles.
#[derive(Default)]
struct ScriptedSource {
    responses: Mutex<HashMap<Timeframe, VecDeque<Result<Vec<Candle>, FetchError>>>>,
    calls: AtomicUsize,
    stop_on_fetch: Mutex<Option<watch::Sender<bool>>>,
}

impl ScriptedSource {
    fn respond(&self, timeframe: Timeframe, response: Result<Vec<Candle>, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(timeframe)
            .or_default()
            .push_back(response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KlineSource for ScriptedSource {
    async fn fetch(
        &self,
        _symbol: &str,
        timeframe: Timeframe,
        _limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop_on_fetch.lock().unwrap().as_ref() {
            let _ = stop.send(true);
        }
        self.responses
            .lock()
            .unwrap()
            .get_mut(&timeframe)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn config(timeframes: &str) -> CollectorConfig {
    CollectorConfig {
        symbols: vec!["BTCUSDT".to_string()],
        timeframes: parse_timeframes(timeframes).unwrap(),
        poll_interval: Duration::from_secs(3600),
        fetch_limit: 200,
        fetch_timeout: Duration::from_secs(1),
        fetch_attempts: 1,
        fetch_backoff: Duration::from_millis(1),
        synth_lookback: 200,
        report_rows: 2,
        exchange_base_url: "http://localhost".to_string(),
    }
}

fn scheduler(
    timeframes: &str,
) -> (RoundScheduler, Arc<MemoryCandleStore>, Arc<ScriptedSource>) {
    let config = config(timeframes);
    let plan = CollectionPlan::resolve(&config.timeframes).unwrap();
    let store = Arc::new(MemoryCandleStore::new());
    let source = Arc::new(ScriptedSource::default());
    let scheduler = RoundScheduler::new(&config, plan, store.clone(), source.clone());
    (scheduler, store, source)
}

#[tokio::test]
async fn failing_entry_does_not_block_later_entries() {
    let (scheduler, store, source) = scheduler("1m,3m,5m");
    source.respond(
        Timeframe::M1,
        Ok((0..3).map(|i| candle(Timeframe::M1, i, 100, true)).collect()),
    );
    source.respond(
        Timeframe::M3,
        Err(FetchError::Status {
            timeframe: Timeframe::M3,
            status: 503,
            body: "unavailable".into(),
        }),
    );
    source.respond(
        Timeframe::M5,
        Ok((0..2).map(|i| candle(Timeframe::M5, i, 100, true)).collect()),
    );

    let (_tx, rx) = watch::channel(false);
    let report = scheduler.run_round(1, &rx).await;

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.entries[1].result,
        Err(EntryError::Fetch(FetchError::Status { status: 503, .. }))
    ));
    let five = report.entries[2].result.as_ref().unwrap();
    assert_eq!(five.summary.inserted, 2);
    assert_eq!(store.all("BTCUSDT", Timeframe::M5).await.len(), 2);
    assert!(store.all("BTCUSDT", Timeframe::M3).await.is_empty());
    assert_eq!(
        report.totals(),
        WriteSummary {
            inserted: 5,
            updated: 0,
            unchanged: 0
        }
    );
}

#[tokio::test]
async fn overlapping_windows_heal_without_duplicates() {
    let (scheduler, store, source) = scheduler("1m");
    let (_tx, rx) = watch::channel(false);

    // Round 1 sees minutes 0..=4 with 4 still forming.
    source.respond(
        Timeframe::M1,
        Ok((0..5).map(|i| candle(Timeframe::M1, i, 100, i < 4)).collect()),
    );
    scheduler.run_round(1, &rx).await;

    // Round 2 overlaps on 2..=4; 4 is now final with a different close.
    source.respond(
        Timeframe::M1,
        Ok((2..8)
            .map(|i| candle(Timeframe::M1, i, if i == 4 { 104 } else { 100 }, i < 7))
            .collect()),
    );
    let report = scheduler.run_round(2, &rx).await;

    let rows = store.all("BTCUSDT", Timeframe::M1).await;
    let opens: Vec<_> = rows.iter().map(|c| c.open_time).collect();
    assert_eq!(opens, (0..8).map(|i| T0 + i * 60_000).collect::<Vec<_>>());
    assert!(rows[4].closed);
    assert_eq!(rows[4].close, Decimal::from(104));
    assert!(!rows[7].closed);

    let summary = report.entries[0].result.as_ref().unwrap().summary;
    assert_eq!(
        summary,
        WriteSummary {
            inserted: 3,
            updated: 1,
            unchanged: 2
        }
    );
}

#[tokio::test]
async fn derived_timeframe_is_built_in_the_same_round() {
    let (scheduler, store, source) = scheduler("1m,10m");
    assert_eq!(scheduler.plan().to_string(), "1m -> 10m (= 10 x 1m)");
    source.respond(
        Timeframe::M1,
        Ok((0..11)
            .map(|i| candle(Timeframe::M1, i, 100 + i, i < 10))
            .collect()),
    );

    let (_tx, rx) = watch::channel(false);
    let report = scheduler.run_round(1, &rx).await;

    let derived = report.entries[1].result.as_ref().unwrap();
    assert_eq!(derived.summary.inserted, 1);
    assert_eq!(derived.skipped, 1);
    assert_eq!(source.calls(), 1);

    let bars = store.all("BTCUSDT", Timeframe::M10).await;
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].open_time, T0);
    assert_eq!(bars[0].close, Decimal::from(109));
    assert_eq!(bars[0].volume, Decimal::from(10));

    // Nothing new to derive on a repeat round.
    let report = scheduler.run_round(2, &rx).await;
    let derived = report.entries[1].result.as_ref().unwrap();
    assert_eq!(derived.summary.written(), 0);
    assert_eq!(store.all("BTCUSDT", Timeframe::M10).await.len(), 1);
}

#[tokio::test]
async fn stop_request_is_honoured_between_entries() {
    let (scheduler, store, source) = scheduler("1m,5m");
    let (tx, rx) = watch::channel(false);
    *source.stop_on_fetch.lock().unwrap() = Some(tx);
    source.respond(
        Timeframe::M1,
        Ok(vec![candle(Timeframe::M1, 0, 100, true)]),
    );

    let report = scheduler.run_round(1, &rx).await;

    // The in-flight entry completes, the next one never starts.
    assert!(report.stopped_early);
    assert_eq!(report.entries.len(), 1);
    assert!(report.entries[0].result.is_ok());
    assert_eq!(store.all("BTCUSDT", Timeframe::M1).await.len(), 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn stopped_scheduler_starts_no_round() {
    let (scheduler, _store, source) = scheduler("1m");
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), scheduler.run(rx))
        .await
        .expect("scheduler did not stop");
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn first_round_runs_immediately_and_stop_ends_the_loop() {
    let (scheduler, store, source) = scheduler("1m");
    source.respond(
        Timeframe::M1,
        Ok(vec![candle(Timeframe::M1, 0, 100, true)]),
    );
    let scheduler = Arc::new(scheduler);
    let (tx, rx) = watch::channel(false);

    let running = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(rx).await })
    };
    for _ in 0..200 {
        if source.calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(source.calls(), 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(store.all("BTCUSDT", Timeframe::M1).await.len(), 1);
}

#[tokio::test]
async fn prepare_creates_every_pair() {
    let mut config = config("1m,5m,10m");
    config.symbols = vec!["BTCUSDT".into(), "ETHUSDT".into()];
    let plan = CollectionPlan::resolve(&config.timeframes).unwrap();
    let store = Arc::new(MemoryCandleStore::new());
    let scheduler = RoundScheduler::new(
        &config,
        plan,
        store.clone(),
        Arc::new(ScriptedSource::default()),
    );

    scheduler.prepare().await.unwrap();
    assert_eq!(store.table_count().await, 6);
    assert!(store.is_empty().await);
}

#[test]
fn derived_before_source_is_rejected_at_startup() {
    let err = CollectionPlan::resolve(&parse_timeframes("10m,1m,5m").unwrap()).unwrap_err();
    assert_eq!(
        err,
        ConfigError::SourceScheduledAfter {
            derived: Timeframe::M10,
            base: Timeframe::M1
        }
    );
}
