//! # models::record
//!
//! [`PositionRecord`] — a position as the trade-execution venue reports it.
//! Used at startup to re-attach monitors to positions opened in an earlier
//! session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Position, Side, Threshold, TriggerFlags};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Venue-side id of the position.
    pub position_id: String,
    pub symbol:      String,
    pub short:       bool,
    pub amount:      f64,
    pub open_price:  f64,
    /// `None` when the venue has no stop configured.
    #[serde(default)]
    pub stop_loss:   Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub opened_at:   Option<DateTime<Utc>>,
}

impl PositionRecord {
    pub fn side(&self) -> Side {
        Side::from_short(self.short)
    }

    /// Build the monitored [`Position`].  The venue's levels are restored
    /// as they are; a missing level stays unset.
    pub fn to_position(&self, triggers: TriggerFlags) -> Position {
        let level = |v: Option<f64>| match v {
            Some(v) if v != 0.0 => Threshold::Active(v),
            Some(_) => Threshold::Disabled,
            None => Threshold::Unset,
        };

        Position::new(&self.symbol, self.side(), self.open_price, self.amount)
            .with_triggers(triggers)
            .with_thresholds(level(self.stop_loss), level(self.take_profit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_decodes_with_defaults() {
        let raw = r#"{"position_id":"p1","symbol":"EURUSD2","short":true,"amount":10,"open_price":1.2}"#;
        let rec: PositionRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.side(), Side::Short);
        assert!(rec.stop_loss.is_none());

        let pos = rec.to_position(TriggerFlags::default());
        assert_eq!(pos.symbol(), "EURUSD2");
        assert_eq!(pos.amount, 10.0);
        assert!(pos.last_price().is_none());
        assert_eq!(pos.stop_loss(), Threshold::Unset);
    }

    #[test]
    fn test_record_restores_levels() {
        let raw = r#"{"position_id":"p2","symbol":"EURUSD","short":false,"amount":1,"open_price":1.2,"stop_loss":1.1,"take_profit":0}"#;
        let rec: PositionRecord = serde_json::from_str(raw).unwrap();
        let pos = rec.to_position(TriggerFlags::default());
        assert_eq!(pos.stop_loss(), Threshold::Active(1.1));
        assert_eq!(pos.take_profit(), Threshold::Disabled);
    }
}
