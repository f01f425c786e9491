//! # engine::executor
//!
//! **Trade gateway** — the only way the monitor touches the venue.
//!
//! [`TradeGateway`] is the seam: monitors and the opener only see the trait,
//! tests plug in fakes, production uses [`HttpGateway`] which speaks JSON to
//! the MT5-style bridge.
//!
//! ## Bridge API Contract
//! ```text
//! POST {base}/position/open    OpenPositionBody   → BridgeResponse
//! POST {base}/position/close   ClosePositionBody  → BridgeResponse
//! GET  {base}/positions?username=..               → [PositionRecord]
//! ```
//! `retcode` 10009 (`TRADE_RETCODE_DONE`) is the only success code.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::models::{PositionRecord, Side};

const RETCODE_DONE: u32 = 10009;

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Parameters of an open request.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub username:    String,
    pub symbol:      String,
    pub side:        Side,
    pub amount:      f64,
    /// Quote the open is priced against.
    pub price_id:    String,
    pub stop_loss:   Option<f64>,
    pub take_profit: Option<f64>,
}

#[async_trait]
pub trait TradeGateway: Send + Sync {
    /// Open a position; returns the venue's position id.
    async fn open_position(&self, req: &OpenRequest) -> Result<String, GatewayError>;

    async fn close_position(
        &self,
        username: &str,
        symbol:   &str,
        price_id: &str,
    ) -> Result<(), GatewayError>;

    async fn get_open_positions(&self, username: &str) -> Result<Vec<PositionRecord>, GatewayError>;
}

// ─── Bridge Request / Response ────────────────────────────────────────────────

/// Optional threshold as the bridge expects it.
#[derive(Debug, Serialize)]
pub struct ThresholdValue {
    pub value:     f64,
    pub is_enable: bool,
}

impl From<Option<f64>> for ThresholdValue {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(value) => Self { value, is_enable: true },
            None        => Self { value: 0.0, is_enable: false },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenPositionBody<'a> {
    pub username:    &'a str,
    pub symbol:      &'a str,
    pub short:       bool,
    pub amount:      f64,
    pub price_id:    &'a str,
    pub stop_loss:   ThresholdValue,
    pub take_profit: ThresholdValue,
}

impl<'a> From<&'a OpenRequest> for OpenPositionBody<'a> {
    fn from(req: &'a OpenRequest) -> Self {
        Self {
            username:    &req.username,
            symbol:      &req.symbol,
            short:       req.side.is_short(),
            amount:      req.amount,
            price_id:    &req.price_id,
            stop_loss:   req.stop_loss.into(),
            take_profit: req.take_profit.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClosePositionBody<'a> {
    pub username: &'a str,
    pub symbol:   &'a str,
    pub price_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct BridgeResponse {
    pub retcode: u32,
    /// Ticket of the position the bridge acted on.
    pub order:   Option<u64>,
    pub comment: Option<String>,
}

impl BridgeResponse {
    fn into_result(self) -> Result<Self, GatewayError> {
        if self.retcode != RETCODE_DONE {
            let msg = format!(
                "retcode={} comment={}",
                self.retcode,
                self.comment.as_deref().unwrap_or("unknown")
            );
            warn!("Bridge rejected: {msg}");
            return Err(GatewayError::Rejected(msg));
        }
        Ok(self)
    }
}

// ─── HttpGateway ──────────────────────────────────────────────────────────────

pub struct HttpGateway {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
}

impl HttpGateway {
    /// `base_url == "mock"` answers every call with success without I/O.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn is_mock(&self) -> bool {
        self.base_url == "mock"
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<BridgeResponse, GatewayError> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = check_status(response).await?;

        let resp: BridgeResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Bridge response parse failed");
            GatewayError::Decode(e.to_string())
        })?;

        resp.into_result()
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout.as_millis() as u64)
        } else {
            error!(error = %e, "Bridge unreachable");
            GatewayError::Unreachable(e.to_string())
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(http_status = %status, body = %body, "Bridge returned HTTP error");
    Err(GatewayError::Http { status: status.as_u16(), body })
}

#[async_trait]
impl TradeGateway for HttpGateway {
    async fn open_position(&self, req: &OpenRequest) -> Result<String, GatewayError> {
        if self.is_mock() {
            info!(symbol = %req.symbol, "🎭 [GATEWAY] MOCK open");
            return Ok(format!("mock-{}", uuid::Uuid::new_v4()));
        }

        info!(
            symbol   = %req.symbol,
            side     = ?req.side,
            amount   = req.amount,
            price_id = %req.price_id,
            "🚀 [GATEWAY] Opening position"
        );

        let resp = self.post("/position/open", &OpenPositionBody::from(req)).await?;
        let id = resp
            .order
            .map(|t| t.to_string())
            .ok_or_else(|| GatewayError::Decode("open response carries no order ticket".into()))?;

        info!(ticket = %id, "✅ [GATEWAY] Position opened");
        Ok(id)
    }

    async fn close_position(&self, username: &str, symbol: &str, price_id: &str) -> Result<(), GatewayError> {
        if self.is_mock() {
            info!(symbol, price_id, "🎭 [GATEWAY] MOCK close");
            return Ok(());
        }

        info!(symbol, price_id, "🚀 [GATEWAY] Closing position");
        let body = ClosePositionBody { username, symbol, price_id };
        let resp = self.post("/position/close", &body).await?;
        info!(ticket = ?resp.order, "✅ [GATEWAY] Position closed");
        Ok(())
    }

    async fn get_open_positions(&self, username: &str) -> Result<Vec<PositionRecord>, GatewayError> {
        if self.is_mock() {
            return Ok(Vec::new());
        }

        let url = format!("{}/positions", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("username", username)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OpenRequest {
        OpenRequest {
            username:    "lesha".into(),
            symbol:      "EURUSD".into(),
            side:        Side::Short,
            amount:      10.0,
            price_id:    "q-1".into(),
            stop_loss:   Some(1.3),
            take_profit: None,
        }
    }

    #[test]
    fn test_open_body_shape() {
        let req = request();
        let v = serde_json::to_value(OpenPositionBody::from(&req)).unwrap();
        assert_eq!(v["short"], true);
        assert_eq!(v["stop_loss"]["is_enable"], true);
        assert_eq!(v["stop_loss"]["value"], 1.3);
        assert_eq!(v["take_profit"]["is_enable"], false);
    }

    #[test]
    fn test_retcode_check() {
        let ok = BridgeResponse { retcode: RETCODE_DONE, order: Some(7), comment: None };
        assert!(ok.into_result().is_ok());

        let bad = BridgeResponse { retcode: 10013, order: None, comment: Some("Invalid request".into()) };
        assert!(matches!(bad.into_result(), Err(GatewayError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_mock_mode() {
        let gw = HttpGateway::new(reqwest::Client::new(), "mock", Duration::from_secs(1));
        let id = gw.open_position(&request()).await.unwrap();
        assert!(id.starts_with("mock-"));
        assert!(gw.close_position("lesha", "EURUSD", "q-1").await.is_ok());
        assert!(gw.get_open_positions("lesha").await.unwrap().is_empty());
    }
}
