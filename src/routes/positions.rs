//! # routes::positions
//!
//! Operator endpoints for the monitored positions.
//!
//! | Method | Path                                  | Description                  |
//! |--------|---------------------------------------|------------------------------|
//! | POST   | `/api/positions`                      | Open at the venue + monitor  |
//! | GET    | `/api/positions`                      | Snapshot of every monitor    |
//! | DELETE | `/api/positions/:symbol`              | Stop monitoring              |
//! | PUT    | `/api/positions/:symbol/stop-loss`    | Set / disable (`0`) the stop |
//! | DELETE | `/api/positions/:symbol/stop-loss`    | Disable the stop-loss        |
//! | PUT    | `/api/positions/:symbol/take-profit`  | Set the take-profit          |
//! | DELETE | `/api/positions/:symbol/take-profit`  | Disable the take-profit      |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{engine::opener::OpenOrder, error::AppError, state::SharedState};

#[derive(Debug, Deserialize)]
pub struct LevelBody {
    pub value: f64,
}

/// POST /api/positions
pub async fn open_position(
    State(state): State<SharedState>,
    Json(order): Json<OpenOrder>,
) -> Result<impl IntoResponse, AppError> {
    if !order.amount.is_finite() || order.amount <= 0.0 {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }

    let opened = state.opener.open(order).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok":       true,
            "position": opened,
        })),
    ))
}

/// GET /api/positions
pub async fn list_positions(State(state): State<SharedState>) -> impl IntoResponse {
    let positions = state.portfolio.positions().await;
    Json(json!({
        "ok":        true,
        "count":     positions.len(),
        "balance":   state.portfolio.balance().await,
        "positions": positions,
    }))
}

/// DELETE /api/positions/:symbol
pub async fn delete_position(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.portfolio.delete_position(&symbol).await {
        return Err(AppError::NotFound(format!("no position is monitored for {symbol}")));
    }

    Ok(Json(json!({
        "ok":      true,
        "message": format!("Stopped monitoring {symbol}"),
    })))
}

/// PUT /api/positions/:symbol/stop-loss
pub async fn set_stop_loss(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
    Json(body): Json<LevelBody>,
) -> Result<impl IntoResponse, AppError> {
    state.portfolio.set_stop_loss(&symbol, body.value).await?;
    Ok(level_response(&state, &symbol).await)
}

/// PUT /api/positions/:symbol/take-profit
pub async fn set_take_profit(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
    Json(body): Json<LevelBody>,
) -> Result<impl IntoResponse, AppError> {
    state.portfolio.set_take_profit(&symbol, body.value).await?;
    Ok(level_response(&state, &symbol).await)
}

/// DELETE /api/positions/:symbol/stop-loss
pub async fn disable_stop_loss(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.portfolio.disable_stop_loss(&symbol).await?;
    Ok(level_response(&state, &symbol).await)
}

/// DELETE /api/positions/:symbol/take-profit
pub async fn disable_take_profit(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.portfolio.disable_take_profit(&symbol).await?;
    Ok(level_response(&state, &symbol).await)
}

async fn level_response(state: &SharedState, symbol: &str) -> Json<serde_json::Value> {
    let position = state.portfolio.position(symbol).await;
    Json(json!({
        "ok":       true,
        "position": position,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::engine::testing::{quote, FakeGateway};
    use crate::models::{Side, Threshold, TriggerFlags};
    use crate::state::build_state;
    use std::sync::Arc;

    fn state() -> SharedState {
        let cfg = ServiceConfig {
            bind_addr:        "127.0.0.1:0".into(),
            gateway_base_url: "mock".into(),
            username:         "lesha".into(),
            initial_balance:  0.0,
            feed_symbols:     Vec::new(),
            monitor:          Default::default(),
        };
        build_state(&cfg, Arc::new(FakeGateway::default()))
    }

    fn order() -> OpenOrder {
        OpenOrder {
            symbol:        "EURUSD".into(),
            side:          Side::Long,
            amount:        10.0,
            stop_loss:     None,
            take_profit:   None,
            triggers:      TriggerFlags::default(),
            balance_delta: 0.0,
        }
    }

    #[tokio::test]
    async fn test_open_set_level_delete() {
        let state = state();
        state.cache.store(&quote("EURUSD", "q1", 1.10, 1.12)).await.unwrap();

        let resp = open_position(State(state.clone()), Json(order())).await.map(IntoResponse::into_response).unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        set_stop_loss(State(state.clone()), Path("EURUSD".into()), Json(LevelBody { value: 1.05 }))
            .await
            .unwrap();
        let pos = state.portfolio.position("EURUSD").await.unwrap();
        assert_eq!(pos.stop_loss(), Threshold::Active(1.05));

        let bad = set_take_profit(State(state.clone()), Path("EURUSD".into()), Json(LevelBody { value: 1.0 })).await;
        assert!(matches!(bad, Err(AppError::BadRequest(_))));

        assert!(delete_position(State(state.clone()), Path("EURUSD".into())).await.is_ok());
        let again = delete_position(State(state.clone()), Path("EURUSD".into())).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disable_levels() {
        let state = state();
        state.cache.store(&quote("EURUSD", "q1", 1.10, 1.12)).await.unwrap();
        open_position(State(state.clone()), Json(order())).await.unwrap();

        set_stop_loss(State(state.clone()), Path("EURUSD".into()), Json(LevelBody { value: 1.05 }))
            .await
            .unwrap();
        set_take_profit(State(state.clone()), Path("EURUSD".into()), Json(LevelBody { value: 1.20 }))
            .await
            .unwrap();

        disable_stop_loss(State(state.clone()), Path("EURUSD".into())).await.unwrap();
        disable_take_profit(State(state.clone()), Path("EURUSD".into())).await.unwrap();
        let pos = state.portfolio.position("EURUSD").await.unwrap();
        assert_eq!(pos.stop_loss(), Threshold::Disabled);
        assert_eq!(pos.take_profit(), Threshold::Disabled);

        let missing = disable_stop_loss(State(state.clone()), Path("GBPUSD".into())).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
        state.portfolio.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_rejects_zero_amount() {
        let state = state();
        let result = open_position(State(state.clone()), Json(OpenOrder { amount: 0.0, ..order() })).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(state.portfolio.is_empty().await);
    }
}
