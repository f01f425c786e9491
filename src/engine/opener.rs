//! # engine::opener
//!
//! **Open flow** — the only path that creates positions.
//!
//! ```text
//! cache "<symbol>_last" ─▶ seed Position ─▶ validate levels ─▶ gateway open ─▶ add_position
//! ```
//!
//! Levels are validated against the opening quote before the venue is
//! contacted, so an invalid request never reaches it.  On startup
//! [`Opener::sync_open_positions`] re-attaches monitors to positions the
//! venue still reports as open.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{self, LastPriceCache};
use crate::engine::executor::{OpenRequest, TradeGateway};
use crate::engine::portfolio::Portfolio;
use crate::error::{GatewayError, OpenError};
use crate::models::{Position, Side, TriggerFlags};

/// What the operator asks for.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub symbol:      String,
    pub side:        Side,
    pub amount:      f64,
    /// `0.0` opens with the stop switched off.
    #[serde(default)]
    pub stop_loss:   Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub triggers:    TriggerFlags,
    /// Added to the portfolio balance when the position is registered.
    #[serde(default)]
    pub balance_delta: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenedPosition {
    /// Venue-side id.
    pub position_id: String,
    pub monitor_id:  Uuid,
    pub open_price:  f64,
    /// Quote the open was priced against.
    pub price_id:    String,
}

pub struct Opener {
    portfolio: Arc<Portfolio>,
    gateway:   Arc<dyn TradeGateway>,
    cache:     Arc<dyn LastPriceCache>,
}

impl Opener {
    pub fn new(
        portfolio: Arc<Portfolio>,
        gateway:   Arc<dyn TradeGateway>,
        cache:     Arc<dyn LastPriceCache>,
    ) -> Self {
        Self { portfolio, gateway, cache }
    }

    pub async fn open(&self, order: OpenOrder) -> Result<OpenedPosition, OpenError> {
        // ── 1. Opening quote ─────────────────────────────────────────────────
        let quote = cache::last_price(self.cache.as_ref(), &order.symbol).await?;
        let open_price = quote.entry_price(order.side);

        // ── 2. Seed + validate ───────────────────────────────────────────────
        let mut position = Position::new(&order.symbol, order.side, open_price, order.amount)
            .with_quote(&quote)
            .with_triggers(order.triggers);

        if let Some(sl) = order.stop_loss {
            position.set_stop_loss(sl)?;
        }
        if let Some(tp) = order.take_profit {
            position.set_take_profit(tp)?;
        }

        // ── 3. Venue ─────────────────────────────────────────────────────────
        let request = OpenRequest {
            username:    self.portfolio.username().to_string(),
            symbol:      order.symbol.clone(),
            side:        order.side,
            amount:      order.amount,
            price_id:    quote.id.clone(),
            stop_loss:   position.stop_loss().value(),
            take_profit: position.take_profit().value(),
        };
        let position_id = self.gateway.open_position(&request).await?;

        // ── 4. Monitor ───────────────────────────────────────────────────────
        let monitor_id = self.portfolio.add_position(position, order.balance_delta).await;

        info!(
            symbol      = %order.symbol,
            side        = ?order.side,
            open_price,
            position_id = %position_id,
            "✅ Position opened and monitored"
        );

        Ok(OpenedPosition { position_id, monitor_id, open_price, price_id: quote.id })
    }

    /// Register every position the venue reports as open for this account.
    /// Symbols that already have a monitor are left alone.  Returns how many
    /// monitors were started.
    pub async fn sync_open_positions(&self, triggers: TriggerFlags) -> Result<usize, GatewayError> {
        let records = self.gateway.get_open_positions(self.portfolio.username()).await?;
        let known = self.portfolio.symbols().await;

        let mut started = 0usize;
        for record in records {
            if known.contains(&record.symbol) {
                continue;
            }

            let mut position = record.to_position(triggers);
            match cache::last_price(self.cache.as_ref(), &record.symbol).await {
                Ok(quote) => position = position.with_quote(&quote),
                Err(e) => warn!(symbol = %record.symbol, error = %e, "No cached quote for synced position"),
            }

            self.portfolio.add_position(position, 0.0).await;
            started += 1;
        }

        info!(started, "🔁 Open positions synced from venue");
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryPriceCache;
    use crate::config::MonitorConfig;
    use crate::engine::testing::{quote, FakeGateway};
    use crate::error::{CacheError, PositionError};
    use crate::events::EventBus;
    use crate::models::{PositionRecord, Threshold};

    async fn setup() -> (Opener, Arc<Portfolio>, Arc<FakeGateway>, Arc<MemoryPriceCache>) {
        let gw = Arc::new(FakeGateway::default());
        let cache = Arc::new(MemoryPriceCache::new());
        cache.store(&quote("EURUSD", "q-7", 1.10, 1.12)).await.unwrap();

        let portfolio = Arc::new(Portfolio::new(
            "lesha",
            0.0,
            gw.clone(),
            MonitorConfig::default(),
            EventBus::new(),
        ));
        let opener = Opener::new(portfolio.clone(), gw.clone(), cache.clone());
        (opener, portfolio, gw, cache)
    }

    fn order(side: Side) -> OpenOrder {
        OpenOrder {
            symbol:        "EURUSD".into(),
            side,
            amount:        10.0,
            stop_loss:     None,
            take_profit:   None,
            triggers:      TriggerFlags::default(),
            balance_delta: 0.0,
        }
    }

    #[tokio::test]
    async fn test_open_seeds_position_from_cache() {
        let (opener, portfolio, gw, _) = setup().await;
        let opened = opener
            .open(OpenOrder { stop_loss: Some(1.0), ..order(Side::Long) })
            .await
            .unwrap();

        assert_eq!(opened.position_id, "pos-1");
        assert_eq!(opened.open_price, 1.12);
        assert_eq!(opened.price_id, "q-7");

        let sent = gw.opens();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].price_id, "q-7");
        assert_eq!(sent[0].stop_loss, Some(1.0));
        assert_eq!(sent[0].username, "lesha");

        let pos = portfolio.position("EURUSD").await.unwrap();
        assert_eq!(pos.last_price(), Some(1.10));
        assert_eq!(pos.stop_loss(), Threshold::Active(1.0));
        portfolio.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_level_never_reaches_venue() {
        let (opener, portfolio, gw, _) = setup().await;
        let err = opener
            .open(OpenOrder { stop_loss: Some(1.0), ..order(Side::Short) })
            .await
            .unwrap_err();

        assert!(matches!(err, OpenError::Position(PositionError::InvalidStopLossShort)));
        assert!(gw.opens().is_empty());
        assert!(portfolio.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_without_cached_quote() {
        let (opener, portfolio, gw, _) = setup().await;
        let err = opener
            .open(OpenOrder { symbol: "GBPUSD".into(), ..order(Side::Long) })
            .await
            .unwrap_err();

        assert!(matches!(err, OpenError::Cache(CacheError::NotFound(_))));
        assert!(gw.opens().is_empty());
        assert!(portfolio.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_registers_venue_positions() {
        let (opener, portfolio, gw, _) = setup().await;
        gw.open_positions.lock().unwrap().extend([
            PositionRecord {
                position_id: "p1".into(),
                symbol:      "EURUSD".into(),
                short:       false,
                amount:      1.0,
                open_price:  1.05,
                stop_loss:   Some(1.0),
                take_profit: None,
                opened_at:   None,
            },
            PositionRecord {
                position_id: "p2".into(),
                symbol:      "GBPUSD".into(),
                short:       true,
                amount:      2.0,
                open_price:  1.30,
                stop_loss:   None,
                take_profit: None,
                opened_at:   None,
            },
        ]);

        let started = opener.sync_open_positions(TriggerFlags::default()).await.unwrap();
        assert_eq!(started, 2);

        let eur = portfolio.position("EURUSD").await.unwrap();
        assert_eq!(eur.last_price(), Some(1.10));
        assert_eq!(eur.stop_loss(), Threshold::Active(1.0));
        let gbp = portfolio.position("GBPUSD").await.unwrap();
        assert!(gbp.last_price().is_none());

        // second sync leaves live monitors alone
        assert_eq!(opener.sync_open_positions(TriggerFlags::default()).await.unwrap(), 0);
        portfolio.shutdown().await;
    }
}
