//! # error
//!
//! Error types for every layer of the monitor.
//!
//! * [`PositionError`]  — validation / missing-state errors from the
//!   [`Position`](crate::models::Position) algorithms.  Never fatal.
//! * [`GatewayError`]   — the remote trade bridge failed.
//! * [`FeedError`] / [`CacheError`] — upstream collaborators failed.
//! * [`PortfolioError`] — routing a command to a monitor failed.
//! * [`OpenError`]      — the open flow failed before registration.
//! * [`AppError`]       — what HTTP handlers return; converted into a JSON
//!   body `{ "ok": false, "error": ... }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("last price is not known yet")]
    MissingLastPrice,

    #[error("take profit is not set")]
    MissingTakeProfit,

    #[error("short position: stop loss has to be above the last price")]
    InvalidStopLossShort,

    #[error("long position: stop loss has to be below the last price")]
    InvalidStopLossLong,

    #[error("short position: take profit has to be below the last price")]
    InvalidTakeProfitShort,

    #[error("long position: take profit has to be above the last price")]
    InvalidTakeProfitLong,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("trade bridge unreachable: {0}")]
    Unreachable(String),

    #[error("trade bridge HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("trade bridge rejected request: {0}")]
    Rejected(String),

    #[error("trade bridge did not answer within {0} ms")]
    Timeout(u64),

    #[error("trade bridge response parse error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("price feed subscription failed: {0}")]
    Subscribe(String),

    #[error("price feed gave up after {0} reconnect attempts")]
    ReconnectsExhausted(u32),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached price for {0}")]
    NotFound(String),

    #[error("cached price is malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("no position is monitored for {0}")]
    UnknownSymbol(String),

    /// The monitor ended between lookup and delivery.
    #[error("monitor for {0} has already stopped")]
    MonitorGone(String),

    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Opening a position failed before it was registered.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Position(#[from] PositionError),
}

// ─── AppError ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The trade bridge failed.
    #[error("Trade execution error: {0}")]
    ExecutionError(String),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PortfolioError> for AppError {
    fn from(err: PortfolioError) -> Self {
        match err {
            PortfolioError::UnknownSymbol(_) | PortfolioError::MonitorGone(_) => {
                AppError::NotFound(err.to_string())
            }
            PortfolioError::Position(e) => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<PositionError> for AppError {
    fn from(err: PositionError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::ExecutionError(err.to_string())
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(_) => AppError::NotFound(err.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<OpenError> for AppError {
    fn from(err: OpenError) -> Self {
        match err {
            OpenError::Cache(e)    => e.into(),
            OpenError::Gateway(e)  => e.into(),
            OpenError::Position(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::ExecutionError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portfolio_error_maps_to_status() {
        let resp = AppError::from(PortfolioError::UnknownSymbol("X".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::from(PortfolioError::Position(PositionError::InvalidStopLossLong))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_gateway_error_is_bad_gateway() {
        let resp = AppError::from(GatewayError::Timeout(5000)).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
