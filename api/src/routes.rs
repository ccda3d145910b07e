use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{Candle, CandleStore, Timeframe};
use std::sync::Arc;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

pub type SharedStore = Arc<dyn CandleStore>;

#[derive(Debug, Deserialize)]
pub struct CandleQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/candles/:symbol/:timeframe", get(candles))
        .with_state(store)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Newest candles of a pair, newest first.
async fn candles(
    State(store): State<SharedStore>,
    Path((symbol, timeframe)): Path<(String, String)>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Vec<Candle>>, ApiError> {
    let timeframe: Timeframe = timeframe.parse()?;
    let symbol = symbol.to_ascii_uppercase();
    let rows = store
        .latest(&symbol, timeframe, query.limit.min(MAX_LIMIT))
        .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rust_decimal::Decimal;
    use shared::MemoryCandleStore;
    use tower::ServiceExt;

    const T0: i64 = 1_700_000_400_000;

    async fn app_with_rows(n: i64) -> Router {
        let store = MemoryCandleStore::new();
        let rows: Vec<_> = (0..n)
            .map(|i| {
                let price = Decimal::from(100 + i);
                Candle::new(
                    "BTCUSDT",
                    Timeframe::M5,
                    T0 + i * 300_000,
                    price,
                    price,
                    price,
                    price,
                    Decimal::ONE,
                    true,
                )
            })
            .collect();
        store.upsert("BTCUSDT", Timeframe::M5, &rows).await.unwrap();
        router(Arc::new(store))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health() {
        let (status, body) = get_json(app_with_rows(0).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn candles_newest_first_with_limit() {
        let (status, body) = get_json(app_with_rows(5).await, "/api/candles/btcusdt/5m?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["open_time"], T0 + 4 * 300_000);
        assert_eq!(rows[0]["timeframe"], "5m");
        assert_eq!(rows[1]["open_time"], T0 + 3 * 300_000);
    }

    #[tokio::test]
    async fn default_limit_applies() {
        let (_, body) = get_json(app_with_rows(60).await, "/api/candles/BTCUSDT/5m").await;
        assert_eq!(body.as_array().unwrap().len(), DEFAULT_LIMIT);
    }

    #[tokio::test]
    async fn bad_inputs_are_client_errors() {
        let (status, body) = get_json(app_with_rows(0).await, "/api/candles/BTCUSDT/7m").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("7m"));

        let (status, _) = get_json(app_with_rows(0).await, "/api/candles/BTC-USDT/5m").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
