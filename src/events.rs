//! # events
//!
//! [`MonitorEvent`] — everything the monitor reports to operators.
//!
//! Events are serialized to JSON once and fanned out over a
//! `tokio::sync::broadcast` channel; the `/ws/monitor` route forwards them to
//! connected dashboards.  Close failures and margin calls land here as well
//! as in the log so they are never silently swallowed.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Side, TriggerKind};

/// Capacity of the broadcast ring; slow subscribers see `Lagged`.
pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorEvent {
    PositionAdded {
        symbol:  String,
        side:    Side,
        balance: f64,
    },

    /// Removed by an operator (`delete_position`).
    PositionRemoved {
        symbol: String,
    },

    /// The monitor closed the position at the venue.
    PositionClosed {
        symbol:     String,
        reason:     TriggerKind,
        price_id:   String,
        last_price: Option<f64>,
    },

    /// Every close attempt failed; the position may still be open at the
    /// venue and needs manual attention.
    CloseFailed {
        symbol:   String,
        reason:   TriggerKind,
        attempts: u32,
        error:    String,
    },

    MarginCall {
        equity: f64,
    },

    MarginCheckFailed {
        error: String,
    },

    /// A tick could not be queued for a monitor (inbox full).
    TickDropped {
        symbol: String,
    },
}

impl MonitorEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

/// Cloneable publishing side of the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Publish to every subscriber.  No subscriber is not an error.
    pub fn publish(&self, event: &MonitorEvent) {
        let _ = self.tx.send(event.to_json());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
