//! # engine::monitor
//!
//! **Position Monitor** — one tokio task per open position.
//!
//! ## Lifecycle
//! ```text
//!   Open ──trigger──▶ Closing ──gateway ok──────▶ Closed
//!     │                  └────all retries failed─▶ Degraded
//!     └──shutdown / own token cancelled──────────▶ Closed   (no gateway call)
//!
//! Cancellation while `Closing` stops the retry chain: the attempt in flight
//! finishes, no further attempt is made.
//! ```
//!
//! The task is the only code that mutates its [`Position`].  Everything else
//! talks to it through the bounded inbox ([`MonitorMsg`]) and reads the
//! `watch` snapshot it republishes after every change.
//!
//! On exit the inbox is closed and drained so no sender stays parked on it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{MonitorConfig, OverflowPolicy};
use crate::engine::executor::TradeGateway;
use crate::error::{GatewayError, PositionError};
use crate::events::{EventBus, MonitorEvent};
use crate::models::{Position, Price, TriggerKind};

// ─── Messages ─────────────────────────────────────────────────────────────────

pub type Reply = oneshot::Sender<Result<(), PositionError>>;

#[derive(Debug)]
pub enum MonitorMsg {
    Tick(Price),
    SetStopLoss { value: f64, reply: Reply },
    SetTakeProfit { value: f64, reply: Reply },
    DisableStopLoss { reply: Reply },
    DisableTakeProfit { reply: Reply },
    /// Close at the last observed quote regardless of thresholds.
    ForceClose(TriggerKind),
}

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MonitorState {
    Open = 0,
    Closing = 1,
    Closed = 2,
    /// Close failed after every retry; escalated through `CloseFailed`.
    Degraded = 3,
}

impl MonitorState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MonitorState::Open,
            1 => MonitorState::Closing,
            2 => MonitorState::Closed,
            _ => MonitorState::Degraded,
        }
    }
}

/// How the task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Closed(TriggerKind),
    Degraded(TriggerKind),
    Cancelled,
}

// ─── Context ──────────────────────────────────────────────────────────────────

/// Collaborators shared by every monitor of a portfolio.
#[derive(Clone)]
pub struct MonitorContext {
    pub username:      Arc<str>,
    pub gateway:       Arc<dyn TradeGateway>,
    pub events:        EventBus,
    pub config:        Arc<MonitorConfig>,
    /// Pinged after every price update; wakes the margin supervisor.
    pub price_updated: Arc<Notify>,
}

// ─── Delivery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    InboxFull,
    MonitorEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "delivery", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Delivery {
    Delivered,
    /// No monitor is registered for the symbol.
    Unknown,
    Dropped(DropReason),
}

/// Push `msg` into an inbox following `policy`.  Never blocks longer than
/// the policy allows; a closed inbox is a silent drop.
pub async fn deliver(tx: &mpsc::Sender<MonitorMsg>, msg: MonitorMsg, policy: OverflowPolicy) -> Delivery {
    use mpsc::error::{SendTimeoutError, TrySendError};

    match policy {
        OverflowPolicy::RejectNew => match tx.try_send(msg) {
            Ok(())                         => Delivery::Delivered,
            Err(TrySendError::Full(_))     => Delivery::Dropped(DropReason::InboxFull),
            Err(TrySendError::Closed(_))   => Delivery::Dropped(DropReason::MonitorEnded),
        },
        OverflowPolicy::BlockWithTimeout { timeout_ms } => {
            match tx.send_timeout(msg, std::time::Duration::from_millis(timeout_ms)).await {
                Ok(())                          => Delivery::Delivered,
                Err(SendTimeoutError::Timeout(_)) => Delivery::Dropped(DropReason::InboxFull),
                Err(SendTimeoutError::Closed(_))  => Delivery::Dropped(DropReason::MonitorEnded),
            }
        }
    }
}

// ─── Handle ───────────────────────────────────────────────────────────────────

/// The portfolio's side of a running monitor.
pub struct MonitorHandle {
    id:       Uuid,
    tx:       mpsc::Sender<MonitorMsg>,
    token:    CancellationToken,
    snapshot: watch::Receiver<Position>,
    state:    Arc<AtomicU8>,
    join:     JoinHandle<()>,
}

impl MonitorHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> mpsc::Sender<MonitorMsg> {
        self.tx.clone()
    }

    /// Latest published copy of the position.
    pub fn position(&self) -> Position {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Position> {
        self.snapshot.clone()
    }

    /// Run `f` against the current snapshot without cloning it.
    pub fn with_position<R>(&self, f: impl FnOnce(&Position) -> R) -> R {
        f(&self.snapshot.borrow())
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancel the monitor's own scope.  Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the task to finish.
    pub async fn join(self) {
        let id = self.id;
        if let Err(e) = self.join.await {
            error!(monitor_id = %id, error = %e, "Monitor task panicked or was aborted");
        }
    }
}

/// Holds a freshly spawned monitor until its owner has registered it.
pub struct StartGate(oneshot::Sender<()>);

impl StartGate {
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

/// Called once the task has ended, with the monitor id and outcome.
pub type OnExit = Box<dyn FnOnce(Uuid, MonitorOutcome) -> BoxFuture<'static, ()> + Send>;

/// Spawn a monitor for `position`.  The task does nothing until the returned
/// [`StartGate`] is opened; dropping the gate ends it as cancelled.
pub fn spawn(
    position: Position,
    ctx:      MonitorContext,
    shutdown: CancellationToken,
    on_exit:  OnExit,
) -> (MonitorHandle, StartGate) {
    let id = Uuid::new_v4();
    let (tx, inbox)          = mpsc::channel(ctx.config.inbox_capacity.max(1));
    let (snap_tx, snap_rx)   = watch::channel(position.clone());
    let (gate_tx, gate_rx)   = oneshot::channel();
    let token = CancellationToken::new();
    let state = Arc::new(AtomicU8::new(MonitorState::Open as u8));

    let monitor = PositionMonitor {
        id,
        position,
        inbox,
        own: token.clone(),
        shutdown,
        snapshot: snap_tx,
        state: Arc::clone(&state),
        ctx,
    };

    let join = tokio::spawn(async move {
        let outcome = match gate_rx.await {
            Ok(())  => monitor.run().await,
            Err(_)  => monitor.finish(MonitorOutcome::Cancelled),
        };
        on_exit(id, outcome).await;
    });

    let handle = MonitorHandle { id, tx, token, snapshot: snap_rx, state, join };
    (handle, StartGate(gate_tx))
}

// ─── Task ─────────────────────────────────────────────────────────────────────

pub struct PositionMonitor {
    id:       Uuid,
    position: Position,
    inbox:    mpsc::Receiver<MonitorMsg>,
    own:      CancellationToken,
    shutdown: CancellationToken,
    snapshot: watch::Sender<Position>,
    state:    Arc<AtomicU8>,
    ctx:      MonitorContext,
}

impl PositionMonitor {
    async fn run(mut self) -> MonitorOutcome {
        info!(
            monitor_id = %self.id,
            symbol     = %self.position.symbol(),
            side       = ?self.position.side(),
            "👁️ Monitor started"
        );

        let outcome = loop {
            let msg = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(symbol = %self.position.symbol(), "Monitor stopped: portfolio shutdown");
                    break MonitorOutcome::Cancelled;
                }
                _ = self.own.cancelled() => {
                    info!(symbol = %self.position.symbol(), "Monitor stopped: position scope cancelled");
                    break MonitorOutcome::Cancelled;
                }
                msg = self.inbox.recv() => match msg {
                    Some(m) => m,
                    None => break MonitorOutcome::Cancelled,
                },
            };

            match msg {
                MonitorMsg::Tick(price) => {
                    if let Some(kind) = self.on_tick(&price) {
                        break self.close(kind).await;
                    }
                }
                MonitorMsg::SetStopLoss { value, reply } => {
                    let result = self.position.set_stop_loss(value);
                    self.after_update(&result);
                    let _ = reply.send(result);
                }
                MonitorMsg::SetTakeProfit { value, reply } => {
                    let result = self.position.set_take_profit(value);
                    self.after_update(&result);
                    let _ = reply.send(result);
                }
                MonitorMsg::DisableStopLoss { reply } => {
                    self.position.disable_stop_loss();
                    self.after_update(&Ok(()));
                    let _ = reply.send(Ok(()));
                }
                MonitorMsg::DisableTakeProfit { reply } => {
                    self.position.disable_take_profit();
                    self.after_update(&Ok(()));
                    let _ = reply.send(Ok(()));
                }
                MonitorMsg::ForceClose(kind) => {
                    if self.position.last_price_id().is_some() {
                        break self.close(kind).await;
                    }
                    warn!(symbol = %self.position.symbol(), ?kind, "Force close ignored: no quote seen yet");
                }
            }
        };

        self.finish(outcome)
    }

    /// Apply a tick; returns the trigger that fired, if any.
    fn on_tick(&mut self, price: &Price) -> Option<TriggerKind> {
        if price.symbol != self.position.symbol() {
            warn!(expected = %self.position.symbol(), got = %price.symbol, "Tick for another symbol ignored");
            return None;
        }

        let last = self.position.observe(price);
        self.snapshot.send_replace(self.position.clone());
        self.ctx.price_updated.notify_one();

        match self.position.evaluate() {
            Ok(Some(kind)) => {
                info!(
                    symbol   = %self.position.symbol(),
                    trigger  = %kind,
                    last,
                    price_id = %price.id,
                    "🎯 Trigger fired"
                );
                Some(kind)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(symbol = %self.position.symbol(), error = %e, "Trigger not evaluable yet");
                None
            }
        }
    }

    fn after_update(&self, result: &Result<(), PositionError>) {
        match result {
            Ok(()) => {
                self.snapshot.send_replace(self.position.clone());
            }
            Err(e) => debug!(symbol = %self.position.symbol(), error = %e, "Threshold rejected"),
        }
    }

    /// Ask the venue to close, retrying with exponential backoff.
    async fn close(&mut self, kind: TriggerKind) -> MonitorOutcome {
        self.set_state(MonitorState::Closing);

        let symbol   = self.position.symbol().to_string();
        let price_id = self.position.last_price_id().unwrap_or_default().to_string();
        let cfg      = Arc::clone(&self.ctx.config);
        let attempts = cfg.close_retries + 1;
        let mut backoff = cfg.close_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if self.scope_cancelled() {
                warn!(symbol = %symbol, attempt, "Monitor cancelled during close retries, position may still be open");
                return MonitorOutcome::Cancelled;
            }

            let call = self.ctx.gateway.close_position(&self.ctx.username, &symbol, &price_id);
            let result = match tokio::time::timeout(cfg.close_timeout, call).await {
                Ok(r)  => r,
                Err(_) => Err(GatewayError::Timeout(cfg.close_timeout.as_millis() as u64)),
            };

            match result {
                Ok(()) => {
                    info!(symbol = %symbol, trigger = %kind, price_id = %price_id, attempt, "✅ Position closed");
                    self.ctx.events.publish(&MonitorEvent::PositionClosed {
                        symbol,
                        reason: kind,
                        price_id,
                        last_price: self.position.last_price(),
                    });
                    return MonitorOutcome::Closed(kind);
                }
                Err(e) => {
                    warn!(symbol = %symbol, attempt, attempts, error = %e, "Close attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = self.own.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = backoff.saturating_mul(2);
            }
        }

        error!(
            symbol = %symbol,
            trigger = %kind,
            error = %last_error,
            "⛔ Close failed, position may still be open at the venue"
        );
        self.ctx.events.publish(&MonitorEvent::CloseFailed {
            symbol,
            reason: kind,
            attempts,
            error: last_error,
        });
        MonitorOutcome::Degraded(kind)
    }

    /// End the lifecycle: cancel own scope, close and drain the inbox.
    fn finish(mut self, outcome: MonitorOutcome) -> MonitorOutcome {
        self.own.cancel();
        self.inbox.close();
        let mut dropped = 0usize;
        while self.inbox.try_recv().is_ok() {
            dropped += 1;
        }

        self.set_state(match outcome {
            MonitorOutcome::Degraded(_) => MonitorState::Degraded,
            _ => MonitorState::Closed,
        });

        debug!(monitor_id = %self.id, symbol = %self.position.symbol(), dropped, ?outcome, "Monitor finished");
        outcome
    }

    fn scope_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.own.is_cancelled()
    }

    fn set_state(&self, state: MonitorState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
