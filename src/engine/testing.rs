//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::executor::{OpenRequest, TradeGateway};
use crate::error::GatewayError;
use crate::models::{PositionRecord, Price};

pub fn quote(symbol: &str, id: &str, bid: f64, ask: f64) -> Price {
    Price {
        id:       id.to_string(),
        symbol:   symbol.to_string(),
        bid,
        ask,
        date:     chrono::Utc::now(),
        currency: "USD".to_string(),
    }
}

/// Records every call; fails the first `fail_closes` close attempts.
#[derive(Default)]
pub struct FakeGateway {
    fail_closes:    u32,
    close_attempts: AtomicU32,
    closes:         Mutex<Vec<(String, String)>>,
    opens:          Mutex<Vec<OpenRequest>>,
    pub open_positions: Mutex<Vec<PositionRecord>>,
}

impl FakeGateway {
    pub fn failing(fail_closes: u32) -> Self {
        Self { fail_closes, ..Self::default() }
    }

    /// Successful closes as `(symbol, price_id)`.
    pub fn closes(&self) -> Vec<(String, String)> {
        self.closes.lock().unwrap().clone()
    }

    pub fn close_attempts(&self) -> u32 {
        self.close_attempts.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> Vec<OpenRequest> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeGateway for FakeGateway {
    async fn open_position(&self, req: &OpenRequest) -> Result<String, GatewayError> {
        let mut opens = self.opens.lock().unwrap();
        opens.push(req.clone());
        Ok(format!("pos-{}", opens.len()))
    }

    async fn close_position(&self, _username: &str, symbol: &str, price_id: &str) -> Result<(), GatewayError> {
        let attempt = self.close_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_closes {
            return Err(GatewayError::Unreachable("connection refused".into()));
        }
        self.closes.lock().unwrap().push((symbol.to_string(), price_id.to_string()));
        Ok(())
    }

    async fn get_open_positions(&self, _username: &str) -> Result<Vec<PositionRecord>, GatewayError> {
        Ok(self.open_positions.lock().unwrap().clone())
    }
}
