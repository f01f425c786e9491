//! # routes::monitor
//!
//! Dashboard endpoints.
//!
//! | Method   | Path                    | Description                          |
//! |----------|-------------------------|--------------------------------------|
//! | GET (WS) | `/ws/monitor`           | Real-time [`MonitorEvent`] stream    |
//! | GET      | `/api/portfolio/margin` | Equity and margin-call status        |
//! | GET      | `/api/health`           | Liveness, counters, config snapshot  |
//!
//! [`MonitorEvent`]: crate::events::MonitorEvent

use std::sync::atomic::Ordering;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::{
    error::AppError,
    events::MonitorEvent,
    state::SharedState,
};

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade to a WebSocket and forward every event as a JSON text frame.
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── Snapshot on connect ───────────────────────────────────────────────────
    let snapshot = json!({
        "event":      "SNAPSHOT",
        "balance":    state.portfolio.balance().await,
        "positions":  state.portfolio.positions().await,
        "tick_count": state.tick_count.load(Ordering::Relaxed),
    })
    .to_string();

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return;
    }

    // ── Forward events until either side goes away ────────────────────────────
    // Incoming frames are only watched for the close; axum answers pings.
    loop {
        let next = tokio::select! {
            event = rx.recv() => event,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        let json = match next {
            Ok(json) => json,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Dashboard client too slow, events skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if sender.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── REST ─────────────────────────────────────────────────────────────────────

/// GET /api/portfolio/margin
pub async fn get_margin(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let report = match state.portfolio.margin_report().await {
        Ok(r) => r,
        Err(e) => {
            state.events.publish(&MonitorEvent::MarginCheckFailed { error: e.to_string() });
            return Err(e.into());
        }
    };

    Ok(Json(json!({
        "ok":     true,
        "margin": report,
    })))
}

/// GET /api/health
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;
    Json(json!({
        "ok":          true,
        "status":      "healthy",
        "service":     "stopguard",
        "username":    state.portfolio.username(),
        "positions":   state.portfolio.len().await,
        "tick_count":  state.tick_count.load(Ordering::Relaxed),
        "uptime_secs": uptime.num_seconds(),
        "config":      state.portfolio.config(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::engine::testing::FakeGateway;
    use crate::models::{Position, Side};
    use crate::state::build_state;
    use std::sync::Arc;

    fn state() -> SharedState {
        let cfg = ServiceConfig {
            bind_addr:        "127.0.0.1:0".into(),
            gateway_base_url: "mock".into(),
            username:         "lesha".into(),
            initial_balance:  10.0,
            feed_symbols:     Vec::new(),
            monitor:          Default::default(),
        };
        build_state(&cfg, Arc::new(FakeGateway::default()))
    }

    #[tokio::test]
    async fn test_margin_reports_unpriced_as_error() {
        let state = state();
        let mut events = state.events.subscribe();
        state
            .portfolio
            .add_position(Position::new("EURUSD", Side::Long, 1.0, 1.0), 0.0)
            .await;
        // drain POSITION_ADDED
        events.recv().await.unwrap();

        let result = get_margin(State(state.clone())).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(events.recv().await.unwrap().contains("MARGIN_CHECK_FAILED"));
        state.portfolio.shutdown().await;
    }

    #[tokio::test]
    async fn test_margin_on_empty_book() {
        let state = state();
        let resp = get_margin(State(state)).await.map(IntoResponse::into_response).unwrap();
        assert!(resp.status().is_success());
    }
}
