//! # engine::portfolio
//!
//! **Portfolio** — owns every [`MonitorHandle`] (keyed by symbol) and the
//! aggregate balance, routes ticks, and computes margin exposure.
//!
//! ## Lock discipline
//! One `tokio::sync::RwLock` over the [`Book`]:
//! * read  — tick lookup, margin fold, listing
//! * write — add, delete, retire, balance change
//!
//! No tick delivery, trigger evaluation or gateway call ever runs while the
//! lock is held: senders are cloned out and used after release.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{oneshot, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{MarginPolicy, MonitorConfig};
use crate::engine::executor::TradeGateway;
use crate::engine::monitor::{
    self, deliver, Delivery, DropReason, MonitorContext, MonitorHandle, MonitorMsg,
    MonitorState, OnExit, Reply,
};
use crate::error::{PortfolioError, PositionError};
use crate::events::{EventBus, MonitorEvent};
use crate::models::{Position, Price, TriggerKind};

// ─── Book ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Book {
    monitors: HashMap<String, MonitorHandle>,
    balance:  f64,
}

impl Book {
    /// Remove `symbol` only if it still belongs to monitor `id`.
    fn retire(&mut self, symbol: &str, id: Uuid) -> bool {
        if self.monitors.get(symbol).map(|h| h.id()) == Some(id) {
            self.monitors.remove(symbol);
            return true;
        }
        false
    }
}

// ─── Views ────────────────────────────────────────────────────────────────────

/// Read-only view of one monitored position.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub monitor_id: Uuid,
    pub state:      MonitorState,
    pub pnl:        Option<f64>,
    pub position:   Position,
}

/// Result of one margin evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarginReport {
    /// `balance + Σ pnl`.
    pub equity:     f64,
    pub balance:    f64,
    /// Positions counted as zero because they have no price yet.
    pub unpriced:   usize,
    pub margin_call: bool,
}

// ─── Portfolio ────────────────────────────────────────────────────────────────

pub struct Portfolio {
    book:     Arc<RwLock<Book>>,
    ctx:      MonitorContext,
    shutdown: CancellationToken,
}

impl Portfolio {
    pub fn new(
        username: impl Into<String>,
        balance:  f64,
        gateway:  Arc<dyn TradeGateway>,
        config:   MonitorConfig,
        events:   EventBus,
    ) -> Self {
        let username: String = username.into();
        Self {
            book: Arc::new(RwLock::new(Book { monitors: HashMap::new(), balance })),
            ctx: MonitorContext {
                username:      Arc::from(username),
                gateway,
                events,
                config:        Arc::new(config),
                price_updated: Arc::new(Notify::new()),
            },
            shutdown: CancellationToken::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.ctx.username
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.ctx.config
    }

    /// Portfolio-wide scope; cancelled by [`Portfolio::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Register `position` and start monitoring it.  A monitor already
    /// registered for the symbol is replaced and cancelled.
    pub async fn add_position(&self, position: Position, balance_delta: f64) -> Uuid {
        let symbol = position.symbol().to_string();
        let side   = position.side();

        let book = Arc::clone(&self.book);
        let retire_symbol = symbol.clone();
        let on_exit: OnExit = Box::new(move |id, outcome| {
            Box::pin(async move {
                let removed = book.write().await.retire(&retire_symbol, id);
                if removed {
                    debug!(symbol = %retire_symbol, ?outcome, "Monitor retired from portfolio");
                }
            })
        });

        let (handle, gate) = monitor::spawn(position, self.ctx.clone(), self.shutdown.clone(), on_exit);
        let id = handle.id();

        let (replaced, balance) = {
            let mut book = self.book.write().await;
            let replaced = book.monitors.insert(symbol.clone(), handle);
            if let Some(old) = &replaced {
                old.cancel();
            }
            book.balance += balance_delta;
            (replaced, book.balance)
        };

        gate.open();

        info!(symbol = %symbol, ?side, balance_delta, balance, monitor_id = %id, "📥 Position added");
        self.ctx.events.publish(&MonitorEvent::PositionAdded { symbol: symbol.clone(), side, balance });

        if let Some(old) = replaced {
            warn!(symbol = %symbol, old_monitor = %old.id(), "Replaced an existing monitor");
            old.join().await;
        }

        id
    }

    /// Stop monitoring `symbol`.  Returns `false` if nothing was registered.
    /// The monitor is cancelled together with its removal and joined
    /// before returning.
    pub async fn delete_position(&self, symbol: &str) -> bool {
        let removed = {
            let mut book = self.book.write().await;
            let removed = book.monitors.remove(symbol);
            if let Some(handle) = &removed {
                handle.cancel();
            }
            removed
        };

        match removed {
            Some(handle) => {
                handle.join().await;
                info!(symbol, "📤 Position removed");
                self.ctx.events.publish(&MonitorEvent::PositionRemoved { symbol: symbol.to_string() });
                true
            }
            None => false,
        }
    }

    /// Cancel every monitor and wait for all of them to end.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<MonitorHandle> = {
            let mut book = self.book.write().await;
            book.monitors.drain().map(|(_, h)| h).collect()
        };

        let count = handles.len();
        for handle in handles {
            handle.join().await;
        }
        info!(monitors = count, "Portfolio shut down");
    }

    // ── Ticks ─────────────────────────────────────────────────────────────────

    /// Route `tick` to its monitor's inbox and report what happened.
    pub async fn route_tick(&self, tick: Price) -> Delivery {
        let tx = {
            let book = self.book.read().await;
            match book.monitors.get(&tick.symbol) {
                Some(handle) => handle.sender(),
                None => {
                    trace!(symbol = %tick.symbol, "Tick for unmonitored symbol dropped");
                    return Delivery::Unknown;
                }
            }
        };

        let symbol = tick.symbol.clone();
        let delivery = deliver(&tx, MonitorMsg::Tick(tick), self.ctx.config.overflow).await;

        match delivery {
            Delivery::Dropped(DropReason::InboxFull) => {
                warn!(symbol = %symbol, "Monitor inbox full, tick dropped");
                self.ctx.events.publish(&MonitorEvent::TickDropped { symbol });
            }
            Delivery::Dropped(DropReason::MonitorEnded) => {
                debug!(symbol = %symbol, "Monitor already ended, tick dropped");
            }
            _ => {}
        }

        delivery
    }

    /// `true` if a monitor was registered for the tick's symbol.
    pub async fn update_price(&self, tick: Price) -> bool {
        !matches!(self.route_tick(tick).await, Delivery::Unknown)
    }

    // ── Thresholds ────────────────────────────────────────────────────────────

    pub async fn set_stop_loss(&self, symbol: &str, value: f64) -> Result<(), PortfolioError> {
        self.command(symbol, |reply| MonitorMsg::SetStopLoss { value, reply }).await
    }

    pub async fn set_take_profit(&self, symbol: &str, value: f64) -> Result<(), PortfolioError> {
        self.command(symbol, |reply| MonitorMsg::SetTakeProfit { value, reply }).await
    }

    pub async fn disable_stop_loss(&self, symbol: &str) -> Result<(), PortfolioError> {
        self.command(symbol, |reply| MonitorMsg::DisableStopLoss { reply }).await
    }

    pub async fn disable_take_profit(&self, symbol: &str) -> Result<(), PortfolioError> {
        self.command(symbol, |reply| MonitorMsg::DisableTakeProfit { reply }).await
    }

    async fn command(
        &self,
        symbol: &str,
        make:   impl FnOnce(Reply) -> MonitorMsg,
    ) -> Result<(), PortfolioError> {
        let tx = self
            .sender_for(symbol)
            .await
            .ok_or_else(|| PortfolioError::UnknownSymbol(symbol.to_string()))?;

        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .await
            .map_err(|_| PortfolioError::MonitorGone(symbol.to_string()))?;

        rx.await
            .map_err(|_| PortfolioError::MonitorGone(symbol.to_string()))?
            .map_err(PortfolioError::from)
    }

    async fn sender_for(&self, symbol: &str) -> Option<tokio::sync::mpsc::Sender<MonitorMsg>> {
        self.book.read().await.monitors.get(symbol).map(|h| h.sender())
    }

    // ── Margin ────────────────────────────────────────────────────────────────

    /// Fold `balance + Σ pnl` over every position.
    pub async fn margin_report(&self) -> Result<MarginReport, PositionError> {
        let policy = self.ctx.config.margin_policy;
        let book = self.book.read().await;

        let mut equity = book.balance;
        let mut unpriced = 0usize;
        for (symbol, handle) in &book.monitors {
            match handle.with_position(|p| p.pnl()) {
                Ok(pnl) => equity += pnl,
                Err(e) if policy == MarginPolicy::SkipUnpriced => {
                    warn!(symbol = %symbol, error = %e, "Margin: position without price counted as zero");
                    unpriced += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(MarginReport { equity, balance: book.balance, unpriced, margin_call: equity < 0.0 })
    }

    /// `true` when balance plus unrealised PnL is negative.
    pub async fn trigger_margin_call(&self) -> Result<bool, PositionError> {
        Ok(self.margin_report().await?.margin_call)
    }

    /// Evaluate the margin call and, when it fires, force-close every
    /// position that opted in through `triggers.margin_call`.
    pub async fn check_margin(&self) -> Result<bool, PositionError> {
        let report = self.margin_report().await?;
        if !report.margin_call {
            return Ok(false);
        }

        warn!(equity = report.equity, balance = report.balance, "⚠️ MARGIN CALL");
        self.ctx.events.publish(&MonitorEvent::MarginCall { equity: report.equity });

        let targets: Vec<(String, tokio::sync::mpsc::Sender<MonitorMsg>)> = {
            let book = self.book.read().await;
            book.monitors
                .iter()
                .filter(|(_, h)| h.state() == MonitorState::Open && h.with_position(|p| p.triggers.margin_call))
                .map(|(s, h)| (s.clone(), h.sender()))
                .collect()
        };

        for (symbol, tx) in targets {
            let delivery = deliver(&tx, MonitorMsg::ForceClose(TriggerKind::MarginCall), self.ctx.config.overflow).await;
            info!(symbol = %symbol, ?delivery, "Margin call: force close requested");
        }

        Ok(true)
    }

    /// Spawn the task that re-checks margin after monitor price updates.
    ///
    /// A failing check is reported once (`warn!` + `MARGIN_CHECK_FAILED`)
    /// when it starts failing; repeats stay at `debug!` until a check
    /// succeeds again.
    pub fn start_margin_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let portfolio = Arc::clone(self);
        tokio::spawn(async move {
            let notify = Arc::clone(&portfolio.ctx.price_updated);
            let mut failing = false;
            loop {
                tokio::select! {
                    _ = portfolio.shutdown.cancelled() => break,
                    _ = notify.notified() => {}
                }

                match portfolio.check_margin().await {
                    Err(e) if !failing => {
                        warn!(error = %e, "⚠️ Margin check failing, margin calls suspended");
                        portfolio
                            .ctx
                            .events
                            .publish(&MonitorEvent::MarginCheckFailed { error: e.to_string() });
                        failing = true;
                    }
                    Err(e) => debug!(error = %e, "Margin check still failing"),
                    Ok(_) if failing => {
                        info!("✅ Margin check recovered");
                        failing = false;
                    }
                    Ok(_) => {}
                }
            }
            debug!("Margin supervisor stopped");
        })
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub async fn balance(&self) -> f64 {
        self.book.read().await.balance
    }

    pub async fn len(&self) -> usize {
        self.book.read().await.monitors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.book.read().await.monitors.keys().cloned().collect()
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.book.read().await.monitors.get(symbol).map(|h| h.position())
    }

    /// Subscribe to snapshots of `symbol`'s position.
    pub async fn watch(&self, symbol: &str) -> Option<watch::Receiver<Position>> {
        self.book.read().await.monitors.get(symbol).map(|h| h.watch())
    }

    pub async fn positions(&self) -> Vec<PositionView> {
        let book = self.book.read().await;
        let mut views: Vec<PositionView> = book
            .monitors
            .values()
            .map(|h| {
                let position = h.position();
                PositionView {
                    monitor_id: h.id(),
                    state:      h.state(),
                    pnl:        position.pnl().ok(),
                    position,
                }
            })
            .collect();
        views.sort_by(|a, b| a.position.symbol().cmp(b.position.symbol()));
        views
    }
}
