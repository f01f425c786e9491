//! # engine::feed
//!
//! **Price feed fan-out** — pulls ticks from a [`PriceFeed`] and routes each
//! one into the portfolio.
//!
//! The transport behind the feed is not this crate's business; anything that
//! can hand out an `mpsc::Receiver<Price>` works.  [`ChannelFeed`] is the
//! in-process implementation fed by the HTTP ingest route.
//!
//! Reconnects use exponential backoff starting at `feed_backoff`.  The budget
//! (`feed_max_reconnects`) counts consecutive failures and is reset by every
//! tick received.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::portfolio::Portfolio;
use crate::error::FeedError;
use crate::models::Price;

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Open a tick stream for `symbols` (empty = every symbol).  The stream
    /// ending means the connection was lost.
    async fn subscribe(&self, symbols: &[String]) -> Result<mpsc::Receiver<Price>, FeedError>;
}

// ─── ChannelFeed ──────────────────────────────────────────────────────────────

/// In-process feed.  Every subscription gets its own bounded receiver,
/// filtered to the symbols it asked for.
pub struct ChannelFeed {
    tx:     broadcast::Sender<Price>,
    buffer: usize,
}

impl ChannelFeed {
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (tx, _) = broadcast::channel(buffer);
        Self { tx, buffer }
    }

    /// Push a tick to every live subscription.  Returns how many there are.
    pub fn publish(&self, price: Price) -> usize {
        self.tx.send(price).unwrap_or(0)
    }
}

#[async_trait]
impl PriceFeed for ChannelFeed {
    async fn subscribe(&self, symbols: &[String]) -> Result<mpsc::Receiver<Price>, FeedError> {
        let mut source = self.tx.subscribe();
        let (out, rx) = mpsc::channel(self.buffer);
        let wanted: Vec<String> = symbols.to_vec();

        tokio::spawn(async move {
            loop {
                let price = tokio::select! {
                    _ = out.closed() => break,
                    msg = source.recv() => match msg {
                        Ok(p) => p,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Feed subscriber lagging — ticks skipped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                if !wanted.is_empty() && !wanted.iter().any(|s| *s == price.symbol) {
                    continue;
                }
                if out.send(price).await.is_err() {
                    break;
                }
            }
            debug!("Feed subscription closed");
        });

        Ok(rx)
    }
}

// ─── Fan-out ──────────────────────────────────────────────────────────────────

/// Route ticks for `symbols` (empty = every symbol) from `feed` into
/// `portfolio` until `shutdown` fires.
///
/// Returns `Err(ReconnectsExhausted)` once the reconnect budget is spent.
pub async fn run_fan_out(
    feed:      Arc<dyn PriceFeed>,
    portfolio: Arc<Portfolio>,
    symbols:   Vec<String>,
    shutdown:  CancellationToken,
) -> Result<(), FeedError> {
    let max_reconnects = portfolio.config().feed_max_reconnects;
    let first_backoff  = portfolio.config().feed_backoff;

    let mut failures = 0u32;
    let mut backoff  = first_backoff;

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        // ── 1. Connect ───────────────────────────────────────────────────────
        match feed.subscribe(&symbols).await {
            Ok(mut rx) => {
                info!(symbols = symbols.len(), "📡 Price feed connected");

                // ── 2. Pump ──────────────────────────────────────────────────
                loop {
                    let tick = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            info!("Price feed fan-out stopped");
                            return Ok(());
                        }
                        tick = rx.recv() => tick,
                    };

                    let Some(tick) = tick else {
                        warn!("Price feed stream ended");
                        break;
                    };

                    failures = 0;
                    backoff  = first_backoff;

                    // unmonitored symbols are expected on a shared feed
                    portfolio.route_tick(tick).await;
                }
            }
            Err(e) => warn!(error = %e, "Price feed subscribe failed"),
        }

        // ── 3. Back off ──────────────────────────────────────────────────────
        failures += 1;
        if failures > max_reconnects {
            error!(attempts = max_reconnects, "⛔ Price feed reconnect budget exhausted");
            return Err(FeedError::ReconnectsExhausted(max_reconnects));
        }

        warn!(attempt = failures, max = max_reconnects, backoff_ms = backoff.as_millis() as u64, "🔄 Reconnecting price feed");
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = backoff.saturating_mul(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::engine::testing::{quote, FakeGateway};
    use crate::events::EventBus;
    use crate::models::{Position, Side};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails the first `fail` subscriptions; later ones get a stream that
    /// stays open and is fed through `senders`.
    struct FlakyFeed {
        fail:     u32,
        attempts: AtomicU32,
        senders:  Mutex<Vec<mpsc::Sender<Price>>>,
    }

    impl FlakyFeed {
        fn new(fail: u32) -> Self {
            Self { fail, attempts: AtomicU32::new(0), senders: Mutex::new(Vec::new()) }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        fn sender(&self) -> Option<mpsc::Sender<Price>> {
            self.senders.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl PriceFeed for FlakyFeed {
        async fn subscribe(&self, _symbols: &[String]) -> Result<mpsc::Receiver<Price>, FeedError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail {
                return Err(FeedError::Subscribe("connection refused".into()));
            }
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn portfolio(max_reconnects: u32) -> Arc<Portfolio> {
        let cfg = MonitorConfig {
            feed_max_reconnects: max_reconnects,
            feed_backoff: Duration::from_millis(1),
            ..MonitorConfig::default()
        };
        Arc::new(Portfolio::new("lesha", 0.0, Arc::new(FakeGateway::default()), cfg, EventBus::new()))
    }

    #[tokio::test]
    async fn test_fan_out_reconnects_then_routes() {
        let feed = Arc::new(FlakyFeed::new(2));
        let p = portfolio(5);
        p.add_position(Position::new("EURUSD", Side::Long, 1.0, 1.0), 0.0).await;
        let mut snap = p.watch("EURUSD").await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_fan_out(feed.clone(), p.clone(), vec!["EURUSD".into()], shutdown.clone()));

        let tx = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(tx) = feed.sender() {
                    return tx;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(feed.attempts(), 3);

        tx.send(quote("EURUSD", "q1", 1.2, 1.3)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), snap.wait_for(|p| p.last_price() == Some(1.2)))
            .await
            .unwrap()
            .unwrap();

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());
        p.shutdown().await;
    }

    #[tokio::test]
    async fn test_fan_out_gives_up() {
        let feed = Arc::new(FlakyFeed::new(u32::MAX));
        let p = portfolio(2);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run_fan_out(feed.clone(), p, Vec::new(), CancellationToken::new()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(FeedError::ReconnectsExhausted(2))));
        assert_eq!(feed.attempts(), 3);
    }

    #[tokio::test]
    async fn test_channel_feed_filters_symbols() {
        let feed = ChannelFeed::new(8);
        let mut eur = feed.subscribe(&["EURUSD".to_string()]).await.unwrap();
        let mut all = feed.subscribe(&[]).await.unwrap();

        assert_eq!(feed.publish(quote("GBPUSD", "g", 1.0, 1.1)), 2);
        assert_eq!(feed.publish(quote("EURUSD", "e", 1.0, 1.1)), 2);

        assert_eq!(eur.recv().await.unwrap().id, "e");
        assert_eq!(all.recv().await.unwrap().id, "g");
        assert_eq!(all.recv().await.unwrap().id, "e");
    }
}
