//! # models::tick
//!
//! Defines [`Price`], one quote update pushed by the price feed.
//!
//! The same shape is used on the wire (feed / HTTP ingest) and as the
//! serialized value stored in the last-price cache under `"<symbol>_last"`,
//! so the timestamp travels as plain epoch seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Side;

/// A single price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Quote identifier issued by the venue.  Passed back on close so the
    /// venue knows which quote the decision was made against.
    pub id: String,

    /// The trading symbol, e.g. `"EURUSD"`.
    pub symbol: String,

    /// Price at which the venue buys from us.
    pub bid: f64,

    /// Price at which the venue sells to us.
    pub ask: f64,

    /// Quote time, epoch seconds on the wire.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,

    #[serde(default)]
    pub currency: String,
}

impl Price {
    /// The price a position of `side` would actually realise on close.
    ///
    /// Closing a short buys back at the ask; closing a long sells at the bid.
    #[inline]
    pub fn realizable_price(&self, side: Side) -> f64 {
        match side {
            Side::Short => self.ask,
            Side::Long  => self.bid,
        }
    }

    /// Price a new position is opened at: a long buys at the ask, a short
    /// sells at the bid.
    #[inline]
    pub fn entry_price(&self, side: Side) -> f64 {
        match side {
            Side::Short => self.bid,
            Side::Long  => self.ask,
        }
    }

    /// Decode the JSON form kept in the last-price cache.
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
