use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::exchange::ExchangeId;

/// Failures raised while talking to a single venue endpoint.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited by venue")]
    RateLimited { retry_after: Option<Duration> },

    #[error("venue error {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("not enough candles: got {got}, need {need}")]
    InsufficientData { got: usize, need: usize },

    #[error("unusable market data: {0}")]
    Degenerate(String),
}

impl FetchError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("{exchange} is unavailable: {reason}")]
    SourceUnavailable { exchange: ExchangeId, reason: String },

    #[error("failed to scan {symbol}: {source}")]
    PairFetchFailed {
        symbol: String,
        #[source]
        source: FetchError,
    },
}

/// Error surface of the HTTP layer.
#[derive(Debug)]
pub enum AppError {
    Scan(ScanError),
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        AppError::Scan(err)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Scan(ScanError::UnsupportedExchange(_)) => StatusCode::BAD_REQUEST,
            AppError::Scan(ScanError::SourceUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Scan(ScanError::PairFetchFailed { .. }) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AppError::Scan(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message() });
        (self.status(), axum::Json(body)).into_response()
    }
}
