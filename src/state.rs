//! # state
//!
//! Shared application state injected into every Axum handler.
//!
//! The portfolio owns all position state behind its own lock; `AppState`
//! only bundles the handles the routes need.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::MemoryPriceCache;
use crate::config::ServiceConfig;
use crate::engine::executor::TradeGateway;
use crate::engine::feed::ChannelFeed;
use crate::engine::opener::Opener;
use crate::engine::portfolio::Portfolio;
use crate::events::EventBus;

/// Per-subscription buffer of the in-process feed.
const FEED_BUFFER: usize = 1024;

// ─── AppState ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub portfolio: Arc<Portfolio>,
    pub opener:    Arc<Opener>,

    // ── Price ingest ──────────────────────────────────────────────────────────
    /// Ticks posted to `/api/feed/tick` are published here and picked up by
    /// the fan-out task.
    pub feed:  Arc<ChannelFeed>,
    /// Last quote per symbol; read by the open flow.
    pub cache: Arc<MemoryPriceCache>,

    // ── Monitor / WebSocket ───────────────────────────────────────────────────
    pub events: EventBus,

    // ── Metrics ───────────────────────────────────────────────────────────────
    pub tick_count: Arc<AtomicU64>,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

/// Wire the portfolio, open flow and ingest side together.
pub fn build_state(config: &ServiceConfig, gateway: Arc<dyn TradeGateway>) -> SharedState {
    let events = EventBus::new();
    let cache  = Arc::new(MemoryPriceCache::new());

    let portfolio = Arc::new(Portfolio::new(
        config.username.clone(),
        config.initial_balance,
        Arc::clone(&gateway),
        config.monitor.clone(),
        events.clone(),
    ));

    let opener = Arc::new(Opener::new(
        Arc::clone(&portfolio),
        gateway,
        cache.clone(),
    ));

    Arc::new(AppState {
        portfolio,
        opener,
        feed: Arc::new(ChannelFeed::new(FEED_BUFFER)),
        cache,
        events,
        tick_count: Arc::new(AtomicU64::new(0)),
        started_at: Utc::now(),
    })
}
