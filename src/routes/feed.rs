//! # routes::feed
//!
//! Price ingest for collectors that push over HTTP.
//!
//! This route stands in for the external price collector: it is the only
//! writer of the last-price cache the open flow and startup sync read from.
//!
//! | Method | Path             | Description                                   |
//! |--------|------------------|-----------------------------------------------|
//! | POST   | `/api/feed/tick` | Store as last quote, publish to the fan-out   |

use std::sync::atomic::Ordering;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use tracing::trace;

use crate::{error::AppError, models::Price, state::SharedState};

/// POST /api/feed/tick
pub async fn ingest_tick(
    State(state): State<SharedState>,
    Json(tick): Json<Price>,
) -> Result<impl IntoResponse, AppError> {
    if !(tick.bid.is_finite() && tick.ask.is_finite()) || tick.bid <= 0.0 || tick.ask <= 0.0 {
        return Err(AppError::BadRequest(format!("invalid quote for {}", tick.symbol)));
    }

    state.cache.store(&tick).await?;
    state.tick_count.fetch_add(1, Ordering::Relaxed);

    let symbol = tick.symbol.clone();
    let monitored = state.portfolio.position(&symbol).await.is_some();
    let subscribers = state.feed.publish(tick);
    trace!(symbol = %symbol, subscribers, monitored, "Tick ingested");

    Ok(Json(json!({
        "ok":          true,
        "symbol":      symbol,
        "monitored":   monitored,
        "subscribers": subscribers,
    })))
}
