use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shared::{ParseTimeframeError, StoreError};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    BadTimeframe(#[from] ParseTimeframeError),

    #[error("invalid symbol {0:?}")]
    BadSymbol(String),

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidSymbol(symbol) => ApiError::BadSymbol(symbol),
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadTimeframe(_) | ApiError::BadSymbol(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => {
                error!("Candle query failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
