use shared::{Candle, CandleStore, StoreError, Timeframe};
use std::fmt::Write;
use tracing::info;

/// Logs the newest rows of a pair after it has been written.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    rows: usize,
}

impl Reporter {
    pub fn new(rows: usize) -> Self {
        Self { rows }
    }

    pub async fn report(
        &self,
        store: &dyn CandleStore,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<String, StoreError> {
        if self.rows == 0 {
            return Ok(String::new());
        }
        let rows = store.latest(symbol, timeframe, self.rows).await?;
        let snapshot = render_snapshot(symbol, timeframe, &rows);
        info!("{}", snapshot);
        Ok(snapshot)
    }
}

/// `rows` newest first, as returned by [`CandleStore::latest`].
pub fn render_snapshot(symbol: &str, timeframe: Timeframe, rows: &[Candle]) -> String {
    let mut out = format!("📊 {} {} latest {}:", symbol, timeframe, rows.len());
    if rows.is_empty() {
        out.push_str(" (no rows)");
    }
    for candle in rows {
        let time = candle
            .open_datetime()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| candle.open_time.to_string());
        let _ = write!(
            out,
            "\n  {} O={} H={} L={} C={} V={}{}",
            time,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            if candle.closed { "" } else { " (forming)" }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::MemoryCandleStore;

    fn candle(open_time: i64, closed: bool) -> Candle {
        Candle::new(
            "BTCUSDT",
            Timeframe::M5,
            open_time,
            Decimal::new(10_050, 2),
            Decimal::from(101),
            Decimal::from(100),
            Decimal::new(10_075, 2),
            Decimal::new(35, 1),
            closed,
        )
    }

    #[test]
    fn snapshot_lists_rows_in_given_order() {
        // 2023-11-14 22:15 and 22:20 UTC
        let rows = vec![candle(1_700_000_400_000, false), candle(1_700_000_100_000, true)];
        let text = render_snapshot("BTCUSDT", Timeframe::M5, &rows);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "📊 BTCUSDT 5m latest 2:");
        assert_eq!(
            lines[1],
            "  2023-11-14 22:20 O=100.50 H=101 L=100 C=100.75 V=3.5 (forming)"
        );
        assert_eq!(lines[2], "  2023-11-14 22:15 O=100.50 H=101 L=100 C=100.75 V=3.5");
    }

    #[test]
    fn empty_snapshot() {
        assert_eq!(
            render_snapshot("ETHUSDT", Timeframe::H1, &[]),
            "📊 ETHUSDT 1h latest 0: (no rows)"
        );
    }

    #[tokio::test]
    async fn report_reads_newest_rows() {
        let store = MemoryCandleStore::new();
        let rows: Vec<_> = (0..5).map(|i| candle(1_700_000_100_000 + i * 300_000, true)).collect();
        store.upsert("BTCUSDT", Timeframe::M5, &rows).await.unwrap();

        let text = Reporter::new(2)
            .report(&store, "BTCUSDT", Timeframe::M5)
            .await
            .unwrap();
        assert!(text.starts_with("📊 BTCUSDT 5m latest 2:"));
        assert_eq!(text.lines().count(), 3);
    }
}
